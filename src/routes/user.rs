use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::access::Tier;
use crate::auth::session;
use crate::error::{AppError, AppResult};
use crate::extractors::{MemberSession, OptionalMemberSession};
use crate::members;
use crate::routes::required;
use crate::state::AppState;
use crate::writeups;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/user/login", post(login))
        .route("/api/user/session", get(current_session))
        .route("/api/user/profile", get(profile))
        .route("/api/user/logout", post(logout))
        .route("/api/user/downloadable-writeups", get(downloadable_writeups))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
}

/// Start a member session for an active membership email.
async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    let email = required(&req.email, "email")?;

    let conn = state.db.get()?;
    let member = members::find_active_member(&conn, email)?.ok_or_else(|| {
        AppError::Forbidden("No active membership found for this email".to_string())
    })?;

    let token = session::encode_member_token(&member.email, chrono::Utc::now().timestamp_millis());
    let max_age = state.config.auth.session_hours * 3600;
    let cookie = session::cookie(&state.config.auth.cookie_name, &token, max_age);
    tracing::info!(email = %member.email, "Member logged in");

    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(json!({
            "success": true,
            "user": { "email": member.email, "name": member.name },
        })),
    ))
}

async fn current_session(
    State(state): State<AppState>,
    OptionalMemberSession(session): OptionalMemberSession,
) -> AppResult<Response> {
    let unauthenticated = || {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "authenticated": false })),
        )
            .into_response()
    };

    let Some(Ok(session)) = session else {
        return Ok(unauthenticated());
    };

    let conn = state.db.get()?;
    let Some(member) = members::find_member(&conn, &session.email)? else {
        return Ok(unauthenticated());
    };

    Ok(Json(json!({
        "authenticated": true,
        "user": {
            "email": member.email,
            "name": member.name,
            "memberSince": member.created_at,
        },
    }))
    .into_response())
}

async fn profile(
    State(state): State<AppState>,
    session: MemberSession,
) -> AppResult<impl IntoResponse> {
    let conn = state.db.get()?;
    let member = members::find_member(&conn, &session.email)?.ok_or(AppError::NotFound)?;

    Ok(Json(json!({
        "profile": {
            "name": member.name,
            "email": member.email,
        },
        "membership": {
            "platform": member.source,
            "tier_name": member.tier_name,
            "status": member.status,
            "subscribed_at": member.subscribed_at,
            "expiry_date": member.expiry_date,
        },
    })))
}

/// Markdown downloads are a perk of the Sudo tier only.
async fn downloadable_writeups(
    State(state): State<AppState>,
    session: MemberSession,
) -> AppResult<impl IntoResponse> {
    let conn = state.db.get()?;
    let is_sudo = members::find_active_member(&conn, &session.email)?
        .is_some_and(|m| m.tier() == Tier::Sudo);
    if !is_sudo {
        return Err(AppError::Forbidden(
            "Access denied. Sudo Access tier required.".to_string(),
        ));
    }

    let writeups = writeups::downloadable(&conn)?;
    Ok(Json(json!({ "writeups": writeups })))
}

async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(
            header::SET_COOKIE,
            session::cookie(&state.config.auth.cookie_name, "", 0),
        )],
        Json(json!({ "success": true })),
    )
}
