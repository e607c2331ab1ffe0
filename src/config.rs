// Runtime settings, loaded from an optional `carfeed.toml` plus
// CARFEED_-prefixed environment variables. Defaults match the values the
// pipeline was tuned with; everything here is configuration, not policy
// hard-coded at call sites.

use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// User agent sent on every request, replay and capture alike.
    pub user_agent: String,

    /// Bound for multi-query gathering and per-page detail fan-out.
    pub concurrency: usize,

    /// Per-request timeout. A timeout counts as a retryable failure.
    pub request_timeout_secs: u64,

    /// Retries after the initial attempt; total attempts = max_retries + 1.
    pub max_retries: u32,

    /// Exponential backoff: base doubles per attempt, clamped to the
    /// floor/ceiling window.
    pub backoff_base_ms: u64,
    pub backoff_floor_ms: u64,
    pub backoff_ceiling_ms: u64,

    /// Proxy URLs rotated across attempts. Empty means direct connections.
    pub proxy_pool: Vec<String>,

    /// Run the capture browser headless.
    pub headless: bool,

    /// How long the capture session waits for a matching search request.
    pub capture_timeout_secs: u64,

    pub mobile_de_base_url: String,
    pub coches_net_base_url: String,
}

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        dotenv::dotenv().ok(); // Load .env file if present

        let builder = Config::builder()
            .set_default("user_agent", DEFAULT_USER_AGENT)?
            .set_default("concurrency", 8)?
            .set_default("request_timeout_secs", 15)?
            .set_default("max_retries", 3)?
            .set_default("backoff_base_ms", 500)?
            .set_default("backoff_floor_ms", 1_000)?
            .set_default("backoff_ceiling_ms", 10_000)?
            .set_default("proxy_pool", Vec::<String>::new())?
            .set_default("headless", true)?
            .set_default("capture_timeout_secs", 20)?
            .set_default("mobile_de_base_url", "https://www.mobile.de")?
            .set_default("coches_net_base_url", "https://www.coches.net")?
            .add_source(File::with_name("carfeed").required(false))
            .add_source(
                Environment::with_prefix("CARFEED")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("proxy_pool"),
            );

        builder.build()?.try_deserialize()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            concurrency: 8,
            request_timeout_secs: 15,
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_floor_ms: 1_000,
            backoff_ceiling_ms: 10_000,
            proxy_pool: Vec::new(),
            headless: true,
            capture_timeout_secs: 20,
            mobile_de_base_url: "https://www.mobile.de".to_string(),
            coches_net_base_url: "https://www.coches.net".to_string(),
        }
    }
}
