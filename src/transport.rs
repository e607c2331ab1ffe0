// Resilient HTTP transport shared by template replay and raw-page
// traffic. Retry/backoff and proxy rotation live here and only here;
// callers see either a response or a final TransportError and never
// re-decide retriability themselves.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use reqwest::{Method, Proxy, StatusCode};
use serde_json::Value;

use crate::bootstrap::TemplateCookie;
use crate::config::Settings;
use crate::error::TransportError;

// Baseline browser-like header set; caller headers win on conflict.
const BASELINE_HEADERS: &[(&str, &str)] = &[
    (
        "accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
    ),
    ("accept-language", "es-ES,es;q=0.9,en;q=0.8"),
    ("cache-control", "no-cache"),
    ("pragma", "no-cache"),
    ("upgrade-insecure-requests", "1"),
];

fn baseline_header_map(user_agent: &str) -> Result<HeaderMap, TransportError> {
    let mut headers = HeaderMap::new();
    for &(name, value) in BASELINE_HEADERS {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    let ua = HeaderValue::from_str(user_agent)
        .map_err(|err| TransportError::InvalidRequest(format!("user agent: {err}")))?;
    headers.insert(reqwest::header::USER_AGENT, ua);
    Ok(headers)
}

/// Retry budget and backoff window; configuration, not per-call policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base: Duration,
    floor: Duration,
    ceiling: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base: Duration::from_millis(settings.backoff_base_ms),
            floor: Duration::from_millis(settings.backoff_floor_ms),
            ceiling: Duration::from_millis(settings.backoff_ceiling_ms),
        }
    }

    /// Total attempts = retries after the first one, plus the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Exponential wait before the attempt following `attempt` (1-based),
    /// clamped into the configured window.
    fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let raw = self.base.saturating_mul(factor);
        let ceiling = self.ceiling.max(self.floor);
        raw.clamp(self.floor, ceiling)
    }
}

enum StatusClass {
    Ok,
    Transient,
    Fatal,
}

fn classify_status(status: StatusCode) -> StatusClass {
    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::REQUEST_TIMEOUT {
        StatusClass::Transient
    } else if status.is_server_error() {
        StatusClass::Transient
    } else if status.is_client_error() {
        StatusClass::Fatal
    } else {
        StatusClass::Ok
    }
}

fn cookie_header(cookies: &[TemplateCookie]) -> String {
    cookies
        .iter()
        .map(|cookie| format!("{}={}", cookie.name, cookie.value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Shuffled cycle over one client per proxy. Every pool member is used
/// once before any repeats; an empty pool degenerates to a single direct
/// client.
struct Ring<C> {
    items: Vec<C>,
    order: Mutex<Vec<usize>>,
}

impl<C> Ring<C> {
    fn new(items: Vec<C>) -> Self {
        debug_assert!(!items.is_empty());
        Self {
            items,
            order: Mutex::new(Vec::new()),
        }
    }

    fn next(&self) -> &C {
        let mut order = self.order.lock().unwrap_or_else(|poisoned| {
            // A panic while shuffling cannot leave the indices invalid.
            poisoned.into_inner()
        });
        if order.is_empty() {
            let mut refill: Vec<usize> = (0..self.items.len()).collect();
            refill.shuffle(&mut rand::rng());
            *order = refill;
        }
        let index = order.pop().unwrap_or(0);
        &self.items[index]
    }
}

/// Per-request extras layered on top of the client's baseline.
#[derive(Default)]
pub struct RequestOptions<'a> {
    pub query: Option<&'a BTreeMap<String, String>>,
    pub json: Option<&'a Value>,
    pub headers: Option<&'a BTreeMap<String, String>>,
    /// Assembled into a single `Cookie` header by the transport.
    pub cookies: &'a [TemplateCookie],
}

/// Asynchronous client; the workhorse of the pipeline.
pub struct HttpClient {
    ring: Ring<reqwest::Client>,
    policy: RetryPolicy,
}

impl HttpClient {
    pub fn new(settings: &Settings) -> Result<Self, TransportError> {
        let headers = baseline_header_map(&settings.user_agent)?;
        let proxies = proxy_urls(settings);

        let mut clients = Vec::with_capacity(proxies.len());
        for proxy in &proxies {
            let mut builder = reqwest::Client::builder()
                .default_headers(headers.clone())
                .timeout(settings.request_timeout());
            if let Some(url) = proxy {
                builder = builder.proxy(Proxy::all(url).map_err(TransportError::Build)?);
            }
            clients.push(builder.build().map_err(TransportError::Build)?);
        }

        Ok(Self {
            ring: Ring::new(clients),
            policy: RetryPolicy::from_settings(settings),
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn get(
        &self,
        url: &str,
        opts: RequestOptions<'_>,
    ) -> Result<reqwest::Response, TransportError> {
        self.request(Method::GET, url, opts).await
    }

    pub async fn post(
        &self,
        url: &str,
        opts: RequestOptions<'_>,
    ) -> Result<reqwest::Response, TransportError> {
        self.request(Method::POST, url, opts).await
    }

    pub async fn request(
        &self,
        method: Method,
        url: &str,
        opts: RequestOptions<'_>,
    ) -> Result<reqwest::Response, TransportError> {
        let max_attempts = self.policy.max_attempts();
        let mut last = String::new();

        for attempt in 1..=max_attempts {
            // A fresh pick per attempt so a dead proxy does not doom the
            // whole request.
            let client = self.ring.next();
            let mut request = client.request(method.clone(), url);
            if let Some(query) = opts.query {
                request = request.query(query);
            }
            if let Some(body) = opts.json {
                request = request.json(body);
            }
            if let Some(extra) = opts.headers {
                for (name, value) in extra {
                    request = request.header(name.as_str(), value.as_str());
                }
            }
            if !opts.cookies.is_empty() {
                request = request.header(COOKIE, cookie_header(opts.cookies));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    match classify_status(status) {
                        StatusClass::Ok => {
                            tracing::debug!(%method, url, attempt, %status, "request succeeded");
                            return Ok(response);
                        }
                        StatusClass::Transient => {
                            last = format!("status {status}");
                            tracing::warn!(%method, url, attempt, %status, "transient HTTP status, backing off");
                        }
                        StatusClass::Fatal => {
                            return Err(TransportError::Status {
                                method: method.to_string(),
                                url: url.to_string(),
                                status: status.as_u16(),
                            });
                        }
                    }
                }
                Err(err) if err.is_builder() => {
                    return Err(TransportError::InvalidRequest(err.to_string()));
                }
                Err(err) => {
                    // Timeouts and connection-level failures; all worth
                    // another attempt.
                    last = err.to_string();
                    tracing::warn!(%method, url, attempt, error = %err, "network error, backing off");
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.policy.delay_after(attempt)).await;
            }
        }

        Err(TransportError::RetriesExhausted {
            method: method.to_string(),
            url: url.to_string(),
            attempts: max_attempts,
            last,
        })
    }
}

/// Synchronous counterpart for call sites that cannot be async. Same
/// retry/backoff and rotation policy as [`HttpClient`], not a weaker one.
/// Must be constructed and used outside an async runtime.
pub struct BlockingClient {
    ring: Ring<reqwest::blocking::Client>,
    policy: RetryPolicy,
}

impl BlockingClient {
    pub fn new(settings: &Settings) -> Result<Self, TransportError> {
        let headers = baseline_header_map(&settings.user_agent)?;
        let proxies = proxy_urls(settings);

        let mut clients = Vec::with_capacity(proxies.len());
        for proxy in &proxies {
            let mut builder = reqwest::blocking::Client::builder()
                .default_headers(headers.clone())
                .timeout(settings.request_timeout());
            if let Some(url) = proxy {
                builder = builder.proxy(Proxy::all(url).map_err(TransportError::Build)?);
            }
            clients.push(builder.build().map_err(TransportError::Build)?);
        }

        Ok(Self {
            ring: Ring::new(clients),
            policy: RetryPolicy::from_settings(settings),
        })
    }

    pub fn get(
        &self,
        url: &str,
        opts: RequestOptions<'_>,
    ) -> Result<reqwest::blocking::Response, TransportError> {
        self.request(Method::GET, url, opts)
    }

    pub fn post(
        &self,
        url: &str,
        opts: RequestOptions<'_>,
    ) -> Result<reqwest::blocking::Response, TransportError> {
        self.request(Method::POST, url, opts)
    }

    pub fn request(
        &self,
        method: Method,
        url: &str,
        opts: RequestOptions<'_>,
    ) -> Result<reqwest::blocking::Response, TransportError> {
        let max_attempts = self.policy.max_attempts();
        let mut last = String::new();

        for attempt in 1..=max_attempts {
            let client = self.ring.next();
            let mut request = client.request(method.clone(), url);
            if let Some(query) = opts.query {
                request = request.query(query);
            }
            if let Some(body) = opts.json {
                request = request.json(body);
            }
            if let Some(extra) = opts.headers {
                for (name, value) in extra {
                    request = request.header(name.as_str(), value.as_str());
                }
            }
            if !opts.cookies.is_empty() {
                request = request.header(COOKIE, cookie_header(opts.cookies));
            }

            match request.send() {
                Ok(response) => {
                    let status = response.status();
                    match classify_status(status) {
                        StatusClass::Ok => return Ok(response),
                        StatusClass::Transient => {
                            last = format!("status {status}");
                            tracing::warn!(%method, url, attempt, %status, "transient HTTP status, backing off");
                        }
                        StatusClass::Fatal => {
                            return Err(TransportError::Status {
                                method: method.to_string(),
                                url: url.to_string(),
                                status: status.as_u16(),
                            });
                        }
                    }
                }
                Err(err) if err.is_builder() => {
                    return Err(TransportError::InvalidRequest(err.to_string()));
                }
                Err(err) => {
                    last = err.to_string();
                    tracing::warn!(%method, url, attempt, error = %err, "network error, backing off");
                }
            }

            if attempt < max_attempts {
                std::thread::sleep(self.policy.delay_after(attempt));
            }
        }

        Err(TransportError::RetriesExhausted {
            method: method.to_string(),
            url: url.to_string(),
            attempts: max_attempts,
            last,
        })
    }
}

fn proxy_urls(settings: &Settings) -> Vec<Option<String>> {
    if settings.proxy_pool.is_empty() {
        // "No proxy" is itself a one-element cycle.
        vec![None]
    } else {
        settings.proxy_pool.iter().cloned().map(Some).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base: u64, floor: u64, ceiling: u64, retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries: retries,
            base: Duration::from_millis(base),
            floor: Duration::from_millis(floor),
            ceiling: Duration::from_millis(ceiling),
        }
    }

    #[test]
    fn backoff_doubles_and_clamps() {
        let policy = policy(500, 1_000, 10_000, 5);
        assert_eq!(policy.delay_after(1), Duration::from_millis(1_000)); // 500 -> floor
        assert_eq!(policy.delay_after(2), Duration::from_millis(1_000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(2_000));
        assert_eq!(policy.delay_after(4), Duration::from_millis(4_000));
        assert_eq!(policy.delay_after(6), Duration::from_millis(10_000)); // ceiling
    }

    #[test]
    fn attempt_budget_counts_first_attempt() {
        assert_eq!(policy(1, 1, 1, 3).max_attempts(), 4);
        assert_eq!(policy(1, 1, 1, 0).max_attempts(), 1);
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(StatusCode::OK),
            StatusClass::Ok
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            StatusClass::Transient
        ));
        assert!(matches!(
            classify_status(StatusCode::REQUEST_TIMEOUT),
            StatusClass::Transient
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY),
            StatusClass::Transient
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND),
            StatusClass::Fatal
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN),
            StatusClass::Fatal
        ));
    }

    #[test]
    fn ring_uses_every_member_before_repeating() {
        let ring = Ring::new(vec![10u32, 20, 30]);
        let mut first_pass: Vec<u32> = (0..3).map(|_| *ring.next()).collect();
        first_pass.sort_unstable();
        assert_eq!(first_pass, vec![10, 20, 30]);

        let mut second_pass: Vec<u32> = (0..3).map(|_| *ring.next()).collect();
        second_pass.sort_unstable();
        assert_eq!(second_pass, vec![10, 20, 30]);
    }

    #[test]
    fn single_member_ring_always_yields_it() {
        let ring = Ring::new(vec![7u32]);
        for _ in 0..5 {
            assert_eq!(*ring.next(), 7);
        }
    }

    #[test]
    fn cookie_header_joins_pairs() {
        let cookies = vec![
            TemplateCookie {
                name: "sid".into(),
                value: "abc".into(),
                domain: None,
                path: "/".into(),
            },
            TemplateCookie {
                name: "lang".into(),
                value: "es".into(),
                domain: None,
                path: "/".into(),
            },
        ];
        assert_eq!(cookie_header(&cookies), "sid=abc; lang=es");
    }
}
