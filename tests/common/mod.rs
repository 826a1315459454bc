//! Shared harness: a fresh database per test and helpers that drive the full
//! router through `oneshot`.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use sudoroot::auth::admin;
use sudoroot::cache::FanoutCache;
use sudoroot::config::Config;
use sudoroot::state::{AppState, DbPool};
use sudoroot::{db, members, routes};

pub struct TestApp {
    _dir: TempDir,
    pub pool: DbPool,
    pub config: Config,
    pub cache: Arc<FanoutCache>,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with(Config::default(), FanoutCache::in_memory())
    }

    pub fn with(config: Config, cache: FanoutCache) -> Self {
        let dir = TempDir::new().unwrap();
        let pool = db::create_pool(&dir.path().join("test.db")).expect("create pool");
        db::run_migrations(&pool).expect("run migrations");
        Self {
            _dir: dir,
            pool,
            config,
            cache: Arc::new(cache),
        }
    }

    pub fn router(&self) -> Router {
        routes::app(AppState {
            db: self.pool.clone(),
            config: self.config.clone(),
            cache: self.cache.clone(),
        })
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> TestResponse {
        self.send(request("GET", uri, cookie, None)).await
    }

    pub async fn post(&self, uri: &str, cookie: Option<&str>, body: Value) -> TestResponse {
        self.send(request("POST", uri, cookie, Some(body))).await
    }

    /// Record an active membership and log in through the API.
    /// Returns the `name=value` cookie pair.
    pub async fn member(&self, email: &str, name: &str, tier: &str) -> String {
        {
            let conn = self.pool.get().unwrap();
            members::record_payment(&conn, email, name, tier, "test", 29).unwrap();
        }
        let res = self
            .post(
                "/api/user/login",
                None,
                serde_json::json!({ "email": email }),
            )
            .await;
        assert_eq!(res.status, StatusCode::OK, "member login: {}", res.body);
        session_cookie(&res.headers)
    }

    pub async fn admin(&self) -> String {
        {
            let conn = self.pool.get().unwrap();
            admin::upsert_admin(&conn, "morpheus", "redpill", 4).unwrap();
        }
        let res = self
            .post(
                "/api/admin/login",
                None,
                serde_json::json!({ "username": "morpheus", "password": "redpill" }),
            )
            .await;
        assert_eq!(res.status, StatusCode::OK, "admin login: {}", res.body);
        session_cookie(&res.headers)
    }

    pub fn count(&self, sql: &str) -> i64 {
        let conn = self.pool.get().unwrap();
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }
}

pub fn request(method: &str, uri: &str, cookie: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// `name=value` from the first Set-Cookie header.
pub fn session_cookie(headers: &HeaderMap) -> String {
    let raw = headers
        .get(header::SET_COOKIE)
        .expect("set-cookie header")
        .to_str()
        .unwrap();
    raw.split(';').next().unwrap().trim().to_string()
}
