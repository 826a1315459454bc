use axum::extract::FromRequestParts;
use axum::http::{header, HeaderMap};
use axum::http::request::Parts;
use std::time::Duration;

use crate::auth::session::{self, MemberClaims, SessionError};
use crate::auth::Admin;
use crate::error::AppError;
use crate::state::AppState;

/// A member with a decodable, unexpired session cookie.
/// Returns 401 if the cookie is missing, malformed or expired.
///
/// This only proves who the caller claims to be; tier, status and bans are
/// checked against the store by the handlers that need them.
#[derive(Debug, Clone)]
pub struct MemberSession {
    pub email: String,
    pub issued_at_ms: i64,
}

impl From<MemberClaims> for MemberSession {
    fn from(claims: MemberClaims) -> Self {
        Self {
            email: claims.email,
            issued_at_ms: claims.issued_at_ms,
        }
    }
}

impl FromRequestParts<AppState> for MemberSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match member_claims(parts, state) {
            Some(Ok(claims)) => Ok(claims.into()),
            Some(Err(e)) => {
                tracing::debug!("Rejected member session: {}", e);
                Err(AppError::Unauthorized)
            }
            None => Err(AppError::Unauthorized),
        }
    }
}

/// Member session that may be absent or invalid. Used where the reason for a
/// missing identity changes the response (e.g. "session expired" vs "log in").
pub struct OptionalMemberSession(pub Option<Result<MemberSession, SessionError>>);

impl FromRequestParts<AppState> for OptionalMemberSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(OptionalMemberSession(
            member_claims(parts, state).map(|r| r.map(MemberSession::from)),
        ))
    }
}

/// An administrator with a live DB-backed session. Returns 401 otherwise.
#[derive(Debug, Clone)]
pub struct AdminUser(pub Admin);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = read_cookie(&parts.headers, &state.config.auth.admin_cookie_name)
            .ok_or(AppError::Unauthorized)?;

        let conn = state.db.get()?;
        session::lookup_admin_session(&conn, token)?
            .map(|(id, username)| AdminUser(Admin { id, username }))
            .ok_or(AppError::Unauthorized)
    }
}

/// Optional admin extractor. Returns None instead of 401 when not authenticated.
pub struct MaybeAdmin(pub Option<Admin>);

impl FromRequestParts<AppState> for MaybeAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match AdminUser::from_request_parts(parts, state).await {
            Ok(AdminUser(admin)) => Ok(MaybeAdmin(Some(admin))),
            Err(AppError::Unauthorized) => Ok(MaybeAdmin(None)),
            Err(e) => Err(e),
        }
    }
}

fn member_claims(parts: &Parts, state: &AppState) -> Option<Result<MemberClaims, SessionError>> {
    let token = read_cookie(&parts.headers, &state.config.auth.cookie_name)?;
    let lifetime = Duration::from_secs(state.config.auth.session_hours * 3600);
    Some(session::decode_member_token(
        token,
        chrono::Utc::now().timestamp_millis(),
        lifetime,
    ))
}

pub fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let (key, val) = cookie.split_once('=')?;
            if key.trim() == name && !val.trim().is_empty() {
                Some(val.trim())
            } else {
                None
            }
        })
}
