pub mod admin;
pub mod chat;
pub mod membership;
pub mod stream;
pub mod support;
pub mod user;
pub mod writeups;

use axum::routing::get;
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// The full HTTP surface, ready to serve.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .merge(chat::router())
        .merge(stream::router())
        .merge(admin::router())
        .merge(user::router())
        .merge(writeups::router())
        .merge(support::router())
        .merge(membership::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Decode a `{"type": ..., ...}` body into a tagged action enum.
///
/// A missing or unknown `type` is a 400 "Invalid type"; a known type with
/// missing or mistyped fields is a 400 describing the field.
pub(crate) fn parse_action<T: DeserializeOwned>(body: &[u8], known: &[&str]) -> AppResult<T> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {e}")))?;

    match value.get("type").and_then(Value::as_str) {
        Some(kind) if known.contains(&kind) => {}
        _ => return Err(AppError::BadRequest("Invalid type".to_string())),
    }

    serde_json::from_value(value).map_err(|e| AppError::BadRequest(format!("Invalid payload: {e}")))
}

/// Trimmed, non-empty text field or a 400 naming it.
pub(crate) fn required<'a>(value: &'a str, field: &str) -> AppResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(AppError::BadRequest(format!("{field} is required")))
    } else {
        Ok(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(tag = "type", rename_all = "lowercase")]
    enum Action {
        Ping { n: i64 },
        Stop,
    }

    #[test]
    fn parse_action_accepts_known_types() {
        let action: Action = parse_action(br#"{"type":"ping","n":3}"#, &["ping", "stop"]).unwrap();
        assert_eq!(action, Action::Ping { n: 3 });
    }

    #[test]
    fn parse_action_rejects_unknown_or_missing_type() {
        for body in [&br#"{"type":"dance"}"#[..], br#"{"n":1}"#, br#"{"type":7}"#] {
            match parse_action::<Action>(body, &["ping", "stop"]) {
                Err(AppError::BadRequest(msg)) => assert_eq!(msg, "Invalid type"),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn parse_action_rejects_bad_fields_and_json() {
        assert!(matches!(
            parse_action::<Action>(br#"{"type":"ping","n":"x"}"#, &["ping"]),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            parse_action::<Action>(b"not json", &["ping"]),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn required_trims_and_rejects_blank() {
        assert_eq!(required("  hi ", "message").unwrap(), "hi");
        assert!(required("   ", "message").is_err());
    }
}
