//! Live delivery: the SSE stream endpoint and cache failover.
//!
//! The cache only shortens delivery latency. These tests check that a dead
//! primary backend never costs a message.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::json;
use tower::ServiceExt;

use common::{request, TestApp};
use sudoroot::cache::{CacheBackend, CacheError, FanoutCache, MemoryBackend};
use sudoroot::chat::ChatScope;
use sudoroot::config::Config;

/// Primary that never answers.
#[derive(Default)]
struct HangingBackend {
    calls: AtomicUsize,
}

#[async_trait]
impl CacheBackend for HangingBackend {
    fn name(&self) -> &'static str {
        "hanging"
    }

    async fn lpush(&self, _key: &str, _value: &str) -> Result<(), CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn ltrim(&self, _key: &str, _start: isize, _stop: isize) -> Result<(), CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn lrange(&self, _key: &str, _start: isize, _stop: isize) -> Result<Vec<String>, CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Primary that rejects every call.
struct FailingBackend;

#[async_trait]
impl CacheBackend for FailingBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn lpush(&self, _key: &str, _value: &str) -> Result<(), CacheError> {
        Err(CacheError::backend("failing", "connection refused"))
    }

    async fn ltrim(&self, _key: &str, _start: isize, _stop: isize) -> Result<(), CacheError> {
        Err(CacheError::backend("failing", "connection refused"))
    }

    async fn lrange(&self, _key: &str, _start: isize, _stop: isize) -> Result<Vec<String>, CacheError> {
        Err(CacheError::backend("failing", "connection refused"))
    }
}

fn fast_stream_config() -> Config {
    let mut config = Config::default();
    config.stream.poll_interval_ms = 20;
    config.stream.max_lifetime_secs = 1;
    config.stream.reconnect_delay_ms = 1500;
    config
}

#[tokio::test]
async fn hanging_primary_does_not_lose_messages() {
    let primary = Arc::new(HangingBackend::default());
    let cache = FanoutCache::new(
        Some(primary.clone()),
        Arc::new(MemoryBackend::default()),
        Duration::from_millis(50),
        Duration::from_secs(60),
    );
    let app = TestApp::with(Config::default(), cache);
    let neo = app.member("neo@zion.io", "Neo", "Sudo Access").await;

    let res = tokio::time::timeout(
        Duration::from_secs(5),
        app.post("/api/sudo-chat", Some(&neo), json!({ "type": "message", "message": "still here" })),
    )
    .await
    .expect("post must not hang on the primary cache");
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(app.count("SELECT COUNT(*) FROM sudo_chat_messages"), 1);

    // A reconnecting client re-reads history from the store.
    let history = app.get("/api/sudo-chat", Some(&neo)).await;
    assert_eq!(history.body["messages"][0]["message"], "still here");

    // The fan-out copy landed on the fallback, and the primary is now skipped.
    let cached = app
        .cache
        .range(ChatScope::Sudo.cache_key(), 0, -1)
        .await
        .unwrap();
    assert_eq!(cached.len(), 1);
    assert!(cached[0].contains("still here"));
    assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    assert!(app.cache.prefers_fallback());
}

#[tokio::test]
async fn failing_primary_falls_back_for_every_operation() {
    let cache = FanoutCache::new(
        Some(Arc::new(FailingBackend)),
        Arc::new(MemoryBackend::default()),
        Duration::from_millis(200),
        Duration::ZERO,
    );
    let app = TestApp::with(Config::default(), cache);
    let neo = app.member("neo@zion.io", "Neo", "Root Access").await;

    for text in ["one", "two"] {
        let res = app
            .post("/api/root-chat", Some(&neo), json!({ "type": "message", "message": text }))
            .await;
        assert_eq!(res.status, StatusCode::OK);
    }

    let cached = app
        .cache
        .range(ChatScope::Root.cache_key(), 0, -1)
        .await
        .unwrap();
    assert_eq!(cached.len(), 2);
    // Newest first.
    assert!(cached[0].contains("two"));
}

#[tokio::test]
async fn stream_requires_session_and_valid_scope() {
    let app = TestApp::new();
    let res = app.get("/api/chat-stream?type=sudo", None).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    let neo = app.member("neo@zion.io", "Neo", "Sudo Access").await;
    let res = app.get("/api/chat-stream?type=admin", Some(&neo)).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["error"], "Invalid chat type");

    let res = app.get("/api/chat-stream?type=root", Some(&neo)).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn stream_delivers_messages_posted_after_connect() {
    let app = TestApp::with(fast_stream_config(), FanoutCache::in_memory());
    let neo = app.member("neo@zion.io", "Neo", "Sudo Access").await;

    let response = app
        .router()
        .oneshot(request("GET", "/api/chat-stream?type=sudo", Some(&neo), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );

    // The body ends when the connection hits its lifetime ceiling.
    let body = tokio::spawn(axum::body::to_bytes(response.into_body(), usize::MAX));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let posted = app
        .post("/api/sudo-chat", Some(&neo), json!({ "type": "message", "message": "knock knock" }))
        .await;
    assert_eq!(posted.status, StatusCode::OK);

    let bytes = tokio::time::timeout(Duration::from_secs(5), body)
        .await
        .expect("stream closes at its lifetime ceiling")
        .unwrap()
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    let connected = text.find(r#"{"type":"connected"}"#).expect("connected event");
    let update = text.find(r#""type":"update""#).expect("update event");
    assert!(connected < update);
    assert!(text.contains("retry: 1500"));
    assert_eq!(text.matches("knock knock").count(), 1);
}

#[tokio::test]
async fn stream_is_blocked_by_maintenance() {
    let app = TestApp::new();
    let neo = app.member("neo@zion.io", "Neo", "Sudo Access").await;
    {
        let conn = app.pool.get().unwrap();
        conn.execute("UPDATE chat_settings SET sudo_chat_enabled = 0", [])
            .unwrap();
    }
    let res = app.get("/api/chat-stream?type=sudo", Some(&neo)).await;
    assert_eq!(res.status, StatusCode::SERVICE_UNAVAILABLE);
}
