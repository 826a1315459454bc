use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::access::Tier;
use crate::error::{AppError, AppResult};
use crate::members;
use crate::routes::{parse_action, required};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/membership-webhook", post(webhook))
        .route("/api/check-expired-members", post(check_expired))
}

const EVENTS: &[&str] = &["membership_paid", "membership_expired"];

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MembershipEvent {
    MembershipPaid {
        email: String,
        #[serde(default)]
        name: Option<String>,
        tier: String,
        #[serde(default)]
        source: Option<String>,
    },
    MembershipExpired {
        expired_members: Vec<ExpiredMember>,
    },
}

#[derive(Debug, Deserialize)]
struct ExpiredMember {
    email: String,
}

/// Compare a configured secret with a presented one. `None` config means the
/// endpoint is switched off.
fn check_secret(configured: Option<&str>, presented: Option<&str>) -> AppResult<()> {
    let Some(expected) = configured.filter(|s| !s.is_empty()) else {
        return Err(AppError::ServiceUnavailable(
            "membership secret not configured".to_string(),
        ));
    };
    match presented {
        Some(given) if given == expected => Ok(()),
        _ => Err(AppError::Unauthorized),
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Payment processor callback. Only this endpoint and the expiry sweep write
/// membership state.
async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    check_secret(
        state.config.membership.webhook_secret.as_deref(),
        bearer(&headers),
    )?;
    let event: MembershipEvent = parse_action(&body, EVENTS)?;

    let conn = state.db.get()?;
    match event {
        MembershipEvent::MembershipPaid {
            email,
            name,
            tier,
            source,
        } => {
            let email = required(&email, "email")?;
            let tier = match Tier::parse(&tier) {
                Tier::None => return Err(AppError::BadRequest("Invalid tier".to_string())),
                tier => tier,
            };
            let name = name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .unwrap_or(email);
            let source = source.as_deref().unwrap_or("webhook");

            members::record_payment(
                &conn,
                email,
                name,
                tier.as_str(),
                source,
                state.config.membership.paid_days,
            )?;
            tracing::info!(email, tier = %tier, source, "Membership activated");

            Ok(Json(json!({
                "success": true,
                "email": email,
                "tier": tier.as_str(),
            })))
        }
        MembershipEvent::MembershipExpired { expired_members } => {
            let mut results = Vec::with_capacity(expired_members.len());
            for member in &expired_members {
                let changed = members::deactivate(&conn, member.email.trim())?;
                results.push(json!({
                    "email": member.email,
                    "success": true,
                    "changes": usize::from(changed),
                }));
            }
            tracing::info!(count = results.len(), "Processed membership expiries");

            Ok(Json(json!({
                "message": "Expired memberships processed",
                "processed": results.len(),
                "results": results,
            })))
        }
    }
}

/// Run the expiry sweep now, on behalf of an external scheduler.
async fn check_expired(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let presented = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    check_secret(state.config.membership.api_key.as_deref(), presented)?;

    let conn = state.db.get()?;
    let expired = members::expire_overdue(&conn)?;
    tracing::info!(count = expired.len(), "Manual membership check");

    Ok(Json(json!({
        "message": "Membership check completed",
        "expired": expired,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}
