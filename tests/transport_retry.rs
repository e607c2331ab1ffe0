//! Retry-policy behavior of the transport against a live mock server.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use carfeed::bootstrap::TemplateCookie;
use carfeed::transport::{HttpClient, RequestOptions};
use carfeed::{Settings, TransportError};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

/// Settings tuned for tests: real policy, negligible waits.
fn test_settings(max_retries: u32) -> Settings {
    Settings {
        max_retries,
        backoff_base_ms: 1,
        backoff_floor_ms: 1,
        backoff_ceiling_ms: 5,
        request_timeout_secs: 5,
        ..Settings::default()
    }
}

#[tokio::test]
async fn recovers_from_429_bursts_within_the_attempt_budget() {
    let server = MockServer::start().await;
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_in_mock = Arc::clone(&hits);

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(move |_req: &Request| {
            let attempt = hits_in_mock.fetch_add(1, Ordering::SeqCst);
            if attempt < 3 {
                ResponseTemplate::new(429)
            } else {
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true}))
            }
        })
        .mount(&server)
        .await;

    let client = HttpClient::new(&test_settings(3)).unwrap();
    let response = client
        .get(&format!("{}/search", server.uri()), RequestOptions::default())
        .await
        .expect("4th attempt should succeed");

    assert_eq!(response.status(), 200);
    assert_eq!(hits.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn persistent_500_exhausts_exactly_the_attempt_budget() {
    let server = MockServer::start().await;
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_in_mock = Arc::clone(&hits);

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(move |_req: &Request| {
            hits_in_mock.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(500)
        })
        .mount(&server)
        .await;

    let url = format!("{}/search", server.uri());
    let client = HttpClient::new(&test_settings(3)).unwrap();
    let err = client
        .get(&url, RequestOptions::default())
        .await
        .expect_err("must give up after the budget");

    match err {
        TransportError::RetriesExhausted { attempts, method, url: reported, .. } => {
            assert_eq!(attempts, 4); // max_retries = 3 retries + first attempt
            assert_eq!(method, "GET");
            assert_eq!(reported, url);
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(hits.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn plain_404_fails_immediately_without_retry() {
    let server = MockServer::start().await;
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_in_mock = Arc::clone(&hits);

    Mock::given(method("GET"))
        .respond_with(move |_req: &Request| {
            hits_in_mock.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(404)
        })
        .mount(&server)
        .await;

    let client = HttpClient::new(&test_settings(3)).unwrap();
    let err = client
        .get(&format!("{}/missing", server.uri()), RequestOptions::default())
        .await
        .expect_err("404 is not retryable");

    assert_eq!(err.status(), Some(404));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn caller_headers_and_cookies_reach_the_wire() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(|req: &Request| {
            let cookie = req
                .headers
                .get("cookie")
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let accept = req
                .headers
                .get("accept")
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"cookie": cookie, "accept": accept}))
        })
        .mount(&server)
        .await;

    let mut headers = BTreeMap::new();
    // Overrides the baseline accept header.
    headers.insert("accept".to_string(), "application/json".to_string());
    let cookies = vec![
        TemplateCookie {
            name: "sid".to_string(),
            value: "abc".to_string(),
            domain: None,
            path: "/".to_string(),
        },
        TemplateCookie {
            name: "lang".to_string(),
            value: "es".to_string(),
            domain: None,
            path: "/".to_string(),
        },
    ];
    let payload = serde_json::json!({"q": "replay"});

    let client = HttpClient::new(&test_settings(0)).unwrap();
    let response = client
        .post(
            &format!("{}/search", server.uri()),
            RequestOptions {
                query: None,
                json: Some(&payload),
                headers: Some(&headers),
                cookies: &cookies,
            },
        )
        .await
        .unwrap();

    let echoed: serde_json::Value = response.json().await.unwrap();
    assert_eq!(echoed["cookie"], "sid=abc; lang=es");
    assert_eq!(echoed["accept"], "application/json");
}

#[test]
fn blocking_client_applies_the_same_policy() {
    // The blocking client is for call sites without an async runtime, so
    // this test drives it from a plain thread; the mock server lives on
    // its own multi-threaded runtime that keeps serving in the background.
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let server = {
        let hits_in_mock = Arc::clone(&hits);
        runtime.block_on(async move {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(move |_req: &Request| {
                    hits_in_mock.fetch_add(1, Ordering::SeqCst);
                    ResponseTemplate::new(503)
                })
                .mount(&server)
                .await;
            server
        })
    };

    let client = carfeed::transport::BlockingClient::new(&test_settings(2)).unwrap();
    let err = client
        .get(&format!("{}/search", server.uri()), RequestOptions::default())
        .expect_err("503 forever must exhaust retries");

    assert!(matches!(
        err,
        TransportError::RetriesExhausted { attempts: 3, .. }
    ));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}
