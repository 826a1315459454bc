use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::{admin, session};
use crate::chat::{self, store, ChatScope};
use crate::db::models::ChatSettings;
use crate::error::{AppError, AppResult};
use crate::extractors::{read_cookie, AdminUser};
use crate::routes::chat::ChatHistory;
use crate::routes::{parse_action, required};
use crate::state::AppState;

const ADMIN_HISTORY_LIMIT: usize = 100;
const POLL_LIMIT: usize = 20;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/admin/login", post(login))
        .route("/api/admin/logout", post(logout))
        .route("/api/admin-chat", get(chat_history).post(chat_action))
        .route(
            "/api/admin/chat-settings",
            get(get_chat_settings).post(update_chat_settings),
        )
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    let conn = state.db.get()?;
    let admin = admin::verify_credentials(&conn, req.username.trim(), &req.password)?
        .ok_or(AppError::Unauthorized)?;

    let hours = state.config.auth.admin_session_hours;
    let token = session::create_admin_session(&conn, &admin.id, hours)?;
    tracing::info!(username = %admin.username, "Admin logged in");

    let cookie = session::cookie(&state.config.auth.admin_cookie_name, &token, hours * 3600);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "success": true, "username": admin.username })),
    ))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<impl IntoResponse> {
    let name = &state.config.auth.admin_cookie_name;
    if let Some(token) = read_cookie(&headers, name) {
        let conn = state.db.get()?;
        session::delete_admin_session(&conn, token)?;
    }

    Ok((
        [(header::SET_COOKIE, session::cookie(name, "", 0))],
        Json(json!({ "success": true })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ScopeQuery {
    #[serde(rename = "type")]
    pub scope: Option<String>,
}

fn parse_scope(value: Option<&str>) -> AppResult<ChatScope> {
    value
        .and_then(ChatScope::parse)
        .ok_or_else(|| AppError::BadRequest("Invalid chat type".to_string()))
}

/// Full view of a scope for moderators, ignoring maintenance and tiers.
async fn chat_history(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<ScopeQuery>,
) -> AppResult<Json<ChatHistory>> {
    let scope = parse_scope(query.scope.as_deref())?;
    let conn = state.db.get()?;
    let messages = store::recent_messages(&conn, scope, ADMIN_HISTORY_LIMIT)?;
    let polls = store::recent_polls(&conn, scope, POLL_LIMIT)?;
    Ok(Json(ChatHistory { messages, polls }))
}

const ADMIN_ACTIONS: &[&str] = &["message", "adminDelete", "ban", "unban"];

#[derive(Debug, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
enum AdminChatAction {
    Message {
        chat_type: String,
        message: String,
    },
    AdminDelete {
        chat_type: String,
        message_id: i64,
    },
    Ban {
        user_email: String,
        #[serde(default)]
        reason: Option<String>,
    },
    Unban {
        user_email: String,
    },
}

async fn chat_action(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let action: AdminChatAction = parse_action(&body, ADMIN_ACTIONS)?;

    let posted = {
        let conn = state.db.get()?;
        match action {
            AdminChatAction::Message { chat_type, message } => {
                let scope = parse_scope(Some(&chat_type))?;
                let body = required(&message, "message")?;
                let stored = store::insert_message(
                    &conn,
                    scope,
                    &admin.chat_name(),
                    &admin.chat_email(),
                    body,
                )?;
                Some((scope, stored))
            }
            AdminChatAction::AdminDelete {
                chat_type,
                message_id,
            } => {
                let scope = parse_scope(Some(&chat_type))?;
                if !store::admin_delete(&conn, scope, message_id, &admin.chat_email())? {
                    return Err(AppError::NotFound);
                }
                tracing::info!(scope = %scope, message_id, admin = %admin.username, "Admin deleted chat message");
                None
            }
            AdminChatAction::Ban { user_email, reason } => {
                let email = required(&user_email, "userEmail")?;
                store::ban(&conn, email, &admin.chat_email(), reason.as_deref())?;
                tracing::info!(email, admin = %admin.username, "User banned from chat");
                None
            }
            AdminChatAction::Unban { user_email } => {
                let email = required(&user_email, "userEmail")?;
                store::unban(&conn, email)?;
                tracing::info!(email, admin = %admin.username, "User unbanned from chat");
                None
            }
        }
    };

    match posted {
        Some((scope, message)) => {
            chat::publish(&state.cache, scope, &message, state.config.cache.max_len).await;
            Ok(Json(json!({ "success": true, "message": message })))
        }
        None => Ok(Json(json!({ "success": true }))),
    }
}

/// Public: clients read it to show the maintenance banner.
async fn get_chat_settings(State(state): State<AppState>) -> AppResult<Json<ChatSettings>> {
    let conn = state.db.get()?;
    Ok(Json(store::load_settings(&conn)?))
}

async fn update_chat_settings(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(settings): Json<ChatSettings>,
) -> AppResult<Json<Value>> {
    let conn = state.db.get()?;
    store::save_settings(&conn, settings)?;
    tracing::info!(
        sudo = settings.sudo_chat_enabled,
        root = settings.root_chat_enabled,
        admin = %admin.username,
        "Chat settings updated"
    );
    Ok(Json(json!({
        "success": true,
        "sudo_chat_enabled": settings.sudo_chat_enabled,
        "root_chat_enabled": settings.root_chat_enabled,
    })))
}
