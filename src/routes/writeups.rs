use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::access::{self, Caller, Tier, WriteupAccess};
use crate::auth::SessionError;
use crate::error::AppResult;
use crate::extractors::OptionalMemberSession;
use crate::members;
use crate::state::AppState;
use crate::writeups::{self, WriteupKind};

pub fn router() -> Router<AppState> {
    Router::new().route("/api/check-writeup-access", post(check_writeup_access))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequest {
    pub writeup_id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

fn denied(status: StatusCode, reason: &str, message: &str) -> Response {
    (
        status,
        Json(json!({ "hasAccess": false, "reason": reason, "message": message })),
    )
        .into_response()
}

/// Decide whether the caller may read a writeup and, if so, return it.
async fn check_writeup_access(
    State(state): State<AppState>,
    OptionalMemberSession(session): OptionalMemberSession,
    Json(req): Json<AccessRequest>,
) -> AppResult<Response> {
    let Some(kind) = WriteupKind::parse(&req.kind) else {
        return Ok(denied(
            StatusCode::BAD_REQUEST,
            "invalid_type",
            "Invalid writeup type",
        ));
    };

    let conn = state.db.get()?;
    let Some(writeup) = writeups::find(&conn, kind, req.writeup_id)? else {
        return Ok(denied(
            StatusCode::NOT_FOUND,
            "writeup_not_found",
            "Writeup not found",
        ));
    };

    let caller = match session {
        None | Some(Err(SessionError::Malformed)) => Caller::Anonymous,
        Some(Err(SessionError::Expired)) => Caller::ExpiredSession,
        Some(Ok(session)) => match members::find_active_member(&conn, &session.email)? {
            Some(member) => Caller::Member(member.tier()),
            None => Caller::NoMembership,
        },
    };

    let required = Tier::required(writeup.access_tier.as_deref());
    let response = match access::writeup_access(writeup.is_active, required, caller) {
        WriteupAccess::Free => Json(json!({
            "hasAccess": true,
            "userTier": "Free",
            "requiredTier": "None",
            "writeup": writeup,
        }))
        .into_response(),
        WriteupAccess::Granted(tier) => Json(json!({
            "hasAccess": true,
            "userTier": tier.as_str(),
            "requiredTier": required.as_str(),
            "writeup": writeup,
        }))
        .into_response(),
        WriteupAccess::Denied(denial) => {
            let status = if denial.is_authentication() {
                StatusCode::UNAUTHORIZED
            } else {
                StatusCode::FORBIDDEN
            };
            let mut body = json!({
                "hasAccess": false,
                "reason": denial.reason(),
                "message": denial.message(),
                "requiredTier": required.as_str(),
            });
            if let Caller::Member(tier) = caller {
                body["userTier"] = json!(tier.as_str());
            }
            (status, Json(body)).into_response()
        }
    };

    Ok(response)
}
