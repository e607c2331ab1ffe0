// One-shot interactive capture of a working search request, plus the
// read-through `ensure` protocol on top of the store.
//
// A capture drives a real browsing session once and records the first
// outbound request that looks like the source's search API. Replays then
// go through the cheap HTTP transport; this path only runs again on a
// cache miss or an operator-forced refresh.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use serde_json::Value;
use url::Url;

use crate::bootstrap::{
    sanitize_headers, BootstrapStore, RequestTemplate, TemplateCookie, TemplateMethod,
};
use crate::config::Settings;
use crate::error::BootstrapError;

// Pagination params are volatile per request; the replay layer sets them.
const VOLATILE_QUERY_PARAMS: &[&str] = &["page", "pageSize", "pageNumber"];

/// Produces a fresh template by whatever heavyweight means necessary.
#[async_trait]
pub trait RequestCapturer: Send + Sync {
    async fn capture(&self) -> Result<RequestTemplate, BootstrapError>;
}

/// Serializes captures per key and persists results before returning
/// them, so concurrent callers all see the first completed capture.
pub struct Bootstrapper<C> {
    key: String,
    store: BootstrapStore,
    capturer: C,
    lock: tokio::sync::Mutex<()>,
}

impl<C: RequestCapturer> Bootstrapper<C> {
    pub fn new(key: impl Into<String>, store: BootstrapStore, capturer: C) -> Self {
        Self {
            key: key.into(),
            store,
            capturer,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read-through template lookup. `force` skips the cache and always
    /// recaptures; the fresh template replaces the stored one wholesale.
    pub async fn ensure(&self, force: bool) -> Result<RequestTemplate, BootstrapError> {
        if !force {
            if let Some(template) = self.store.load(&self.key)? {
                tracing::debug!(key = %self.key, "bootstrap template served from cache");
                return Ok(template);
            }
        }

        let _guard = self.lock.lock().await;
        if !force {
            // A concurrent caller may have finished while we waited.
            if let Some(template) = self.store.load(&self.key)? {
                return Ok(template);
            }
        }

        tracing::info!(key = %self.key, force, "capturing fresh request template");
        let template = self.capturer.capture().await?;
        self.store.save(&self.key, &template)?;
        Ok(template)
    }
}

/// Captures by driving an isolated Chromium session to the source's
/// search entry point and watching outbound traffic.
pub struct ChromiumCapturer {
    settings: Settings,
    key: String,
    entry_url: String,
    /// The request URL must contain this to be considered API traffic.
    url_marker: String,
    /// And its path must contain this to be the search endpoint.
    path_marker: String,
}

impl ChromiumCapturer {
    pub fn new(
        settings: Settings,
        key: impl Into<String>,
        entry_url: impl Into<String>,
    ) -> Self {
        Self {
            settings,
            key: key.into(),
            entry_url: entry_url.into(),
            url_marker: "api".to_string(),
            path_marker: "search".to_string(),
        }
    }

    pub fn with_markers(
        mut self,
        url_marker: impl Into<String>,
        path_marker: impl Into<String>,
    ) -> Self {
        self.url_marker = url_marker.into();
        self.path_marker = path_marker.into();
        self
    }
}

fn browser_err(err: impl std::fmt::Display) -> BootstrapError {
    BootstrapError::Browser(err.to_string())
}

#[async_trait]
impl RequestCapturer for ChromiumCapturer {
    async fn capture(&self) -> Result<RequestTemplate, BootstrapError> {
        let mut config = BrowserConfig::builder().no_sandbox().window_size(1280, 1024);
        if !self.settings.headless {
            config = config.with_head();
        }
        let config = config.build().map_err(browser_err)?;

        let (mut browser, mut handler) = Browser::launch(config).await.map_err(browser_err)?;
        let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

        let result = self.drive(&browser).await;

        let _ = browser.close().await;
        handler_task.abort();
        result
    }
}

impl ChromiumCapturer {
    async fn drive(&self, browser: &Browser) -> Result<RequestTemplate, BootstrapError> {
        use chromiumoxide::cdp::browser_protocol::network::EventRequestWillBeSent;

        let page = browser.new_page("about:blank").await.map_err(browser_err)?;
        page.set_user_agent(self.settings.user_agent.as_str())
            .await
            .map_err(browser_err)?;

        let mut events = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(browser_err)?;

        let url_marker = self.url_marker.clone();
        let path_marker = self.path_marker.clone();
        // The accumulator lives inside this task and is returned, never
        // stored on shared state.
        let watcher = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let request = &event.request;
                let headers = serde_json::to_value(&request.headers).unwrap_or(Value::Null);
                let post_data = request.post_data_entries.as_ref().map(|entries| {
                    entries
                        .iter()
                        .filter_map(|entry| entry.bytes.as_ref())
                        .map(|bytes| AsRef::<str>::as_ref(bytes))
                        .collect::<String>()
                });
                if let Some(template) = match_search_request(
                    &request.url,
                    &request.method,
                    &headers,
                    post_data.as_deref(),
                    &url_marker,
                    &path_marker,
                ) {
                    return Some(template);
                }
            }
            None
        });

        page.goto(self.entry_url.clone()).await.map_err(browser_err)?;

        let observed = tokio::time::timeout(self.settings.capture_timeout(), watcher).await;
        let mut template = match observed {
            Ok(Ok(Some(template))) => template,
            Ok(Ok(None)) | Err(_) => {
                return Err(BootstrapError::NoRequestObserved {
                    key: self.key.clone(),
                    timeout_secs: self.settings.capture_timeout_secs,
                })
            }
            Ok(Err(join_err)) => return Err(browser_err(join_err)),
        };

        let cookies = page.get_cookies().await.map_err(browser_err)?;
        template.cookies = cookies
            .into_iter()
            .map(|cookie| TemplateCookie {
                name: cookie.name,
                value: cookie.value,
                domain: Some(cookie.domain),
                path: cookie.path,
            })
            .collect();

        tracing::info!(
            key = %self.key,
            endpoint = %template.url,
            method = template.method.as_str(),
            cookie_count = template.cookies.len(),
            "search request captured"
        );
        Ok(template)
    }
}

/// Turns an observed request into a template when it matches the target
/// API shape. Pagination params are stripped from the recorded query;
/// transport-managed headers are stripped outright.
fn match_search_request(
    raw_url: &str,
    method: &str,
    headers: &Value,
    post_data: Option<&str>,
    url_marker: &str,
    path_marker: &str,
) -> Option<RequestTemplate> {
    if !raw_url.contains(url_marker) {
        return None;
    }
    let parsed = Url::parse(raw_url).ok()?;
    if !parsed.path().contains(path_marker) {
        return None;
    }
    let method = TemplateMethod::parse(method)?;

    let header_map: BTreeMap<String, String> = headers
        .as_object()
        .map(|object| {
            object
                .iter()
                .filter_map(|(name, value)| {
                    value.as_str().map(|text| (name.clone(), text.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    let mut query: BTreeMap<String, String> = parsed.query_pairs().into_owned().collect();
    for param in VOLATILE_QUERY_PARAMS {
        query.remove(*param);
    }

    let payload = match method {
        TemplateMethod::Post => post_data.map(|raw| {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
        }),
        TemplateMethod::Get => None,
    };

    let mut endpoint = parsed;
    endpoint.set_query(None);
    endpoint.set_fragment(None);

    Some(RequestTemplate {
        url: endpoint.to_string(),
        method,
        headers: sanitize_headers(&header_map),
        payload,
        query: Some(query),
        cookies: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingCapturer {
        calls: AtomicUsize,
    }

    impl CountingCapturer {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RequestCapturer for CountingCapturer {
        async fn capture(&self) -> Result<RequestTemplate, BootstrapError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RequestTemplate {
                url: format!("https://api.example.test/search/v{call}"),
                method: TemplateMethod::Get,
                headers: BTreeMap::new(),
                payload: None,
                query: Some(BTreeMap::new()),
                cookies: Vec::new(),
            })
        }
    }

    fn store() -> (tempfile::TempDir, BootstrapStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BootstrapStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn ensure_captures_once_then_serves_from_cache() {
        let (_dir, store) = store();
        let bootstrapper = Bootstrapper::new("src_search", store, CountingCapturer::new());

        let first = bootstrapper.ensure(false).await.unwrap();
        let second = bootstrapper.ensure(false).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(bootstrapper.capturer.calls(), 1);
    }

    #[tokio::test]
    async fn force_refresh_replaces_the_stored_template() {
        let (_dir, store) = store();
        let bootstrapper = Bootstrapper::new("src_search", store, CountingCapturer::new());

        let first = bootstrapper.ensure(false).await.unwrap();
        let refreshed = bootstrapper.ensure(true).await.unwrap();
        assert_ne!(first, refreshed);
        assert_eq!(bootstrapper.capturer.calls(), 2);

        // The refresh is what later callers see.
        let cached = bootstrapper.ensure(false).await.unwrap();
        assert_eq!(cached, refreshed);
        assert_eq!(bootstrapper.capturer.calls(), 2);
    }

    #[tokio::test]
    async fn concurrent_ensure_serializes_to_a_single_capture() {
        let (_dir, store) = store();
        let bootstrapper = Arc::new(Bootstrapper::new(
            "src_search",
            store,
            CountingCapturer::new(),
        ));

        let a = Arc::clone(&bootstrapper);
        let b = Arc::clone(&bootstrapper);
        let (left, right) = tokio::join!(
            tokio::spawn(async move { a.ensure(false).await }),
            tokio::spawn(async move { b.ensure(false).await }),
        );
        let left = left.unwrap().unwrap();
        let right = right.unwrap().unwrap();

        assert_eq!(left, right);
        assert_eq!(bootstrapper.capturer.calls(), 1);
    }

    #[test]
    fn matcher_accepts_only_the_target_api_shape() {
        let headers = json!({"accept": "application/json", "host": "api.example.test"});

        // Wrong host/url marker.
        assert!(match_search_request(
            "https://cdn.example.test/assets/logo.png",
            "GET",
            &headers,
            None,
            "api",
            "search",
        )
        .is_none());

        // Right marker, wrong path.
        assert!(match_search_request(
            "https://api.example.test/metrics",
            "GET",
            &headers,
            None,
            "api",
            "search",
        )
        .is_none());

        // Unsupported method.
        assert!(match_search_request(
            "https://api.example.test/search",
            "OPTIONS",
            &headers,
            None,
            "api",
            "search",
        )
        .is_none());

        let template = match_search_request(
            "https://api.example.test/vehicles/search?make=bmw&page=3&pageSize=30",
            "GET",
            &headers,
            None,
            "api",
            "search",
        )
        .unwrap();

        assert_eq!(template.url, "https://api.example.test/vehicles/search");
        assert_eq!(template.method, TemplateMethod::Get);
        // Pagination params stripped, the rest kept.
        let query = template.query.unwrap();
        assert_eq!(query.get("make").map(String::as_str), Some("bmw"));
        assert!(!query.contains_key("page"));
        assert!(!query.contains_key("pageSize"));
        // Managed headers stripped.
        assert!(!template.headers.contains_key("host"));
        assert!(template.headers.contains_key("accept"));
    }

    #[test]
    fn post_payload_parses_as_json_with_raw_fallback() {
        let headers = json!({});
        let template = match_search_request(
            "https://api.example.test/search",
            "POST",
            &headers,
            Some(r#"{"pagination":{"size":30}}"#),
            "api",
            "search",
        )
        .unwrap();
        assert_eq!(
            template.payload,
            Some(json!({"pagination": {"size": 30}}))
        );

        let template = match_search_request(
            "https://api.example.test/search",
            "POST",
            &headers,
            Some("not-json"),
            "api",
            "search",
        )
        .unwrap();
        assert_eq!(template.payload, Some(Value::String("not-json".into())));
    }
}
