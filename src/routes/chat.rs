use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::chat::{self, gate, store, ChatScope};
use crate::db::models::{ChatMessage, Poll};
use crate::error::{AppError, AppResult};
use crate::extractors::MemberSession;
use crate::routes::{parse_action, required};
use crate::state::AppState;

/// Messages returned when the client asks without `after`.
const HISTORY_LIMIT: usize = 50;
const POLL_LIMIT: usize = 20;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/sudo-chat", get(sudo_history).post(sudo_post))
        .route("/api/root-chat", get(root_history).post(root_post))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Store timestamp; only messages created strictly later are returned.
    pub after: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatHistory {
    pub messages: Vec<ChatMessage>,
    pub polls: Vec<Poll>,
}

const ACTIONS: &[&str] = &[
    "message", "reaction", "unreact", "poll", "vote", "pin", "delete",
];

#[derive(Debug, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "lowercase",
    rename_all_fields = "camelCase"
)]
enum ChatAction {
    Message { message: String },
    Reaction { message_id: i64, reaction: String },
    Unreact { message_id: i64, reaction: String },
    Poll { poll: NewPoll },
    Vote { poll: PollVoteInput },
    Pin { message_id: i64, pin: bool },
    Delete { message_id: i64 },
}

#[derive(Debug, Deserialize)]
struct NewPoll {
    question: String,
    options: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PollVoteInput {
    poll_id: i64,
    option_index: i64,
}

async fn sudo_history(
    State(state): State<AppState>,
    session: MemberSession,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<ChatHistory>> {
    history(&state, ChatScope::Sudo, &session, query)
}

async fn root_history(
    State(state): State<AppState>,
    session: MemberSession,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<ChatHistory>> {
    history(&state, ChatScope::Root, &session, query)
}

async fn sudo_post(
    State(state): State<AppState>,
    session: MemberSession,
    body: Bytes,
) -> AppResult<Json<Value>> {
    post(&state, ChatScope::Sudo, &session, &body).await
}

async fn root_post(
    State(state): State<AppState>,
    session: MemberSession,
    body: Bytes,
) -> AppResult<Json<Value>> {
    post(&state, ChatScope::Root, &session, &body).await
}

fn history(
    state: &AppState,
    scope: ChatScope,
    session: &MemberSession,
    query: HistoryQuery,
) -> AppResult<Json<ChatHistory>> {
    let conn = state.db.get()?;
    gate::authorize(&conn, scope, session)?;

    let messages = match query.after.as_deref().map(str::trim) {
        Some(after) if !after.is_empty() => store::messages_after(&conn, scope, after)?,
        _ => store::recent_messages(&conn, scope, HISTORY_LIMIT)?,
    };
    let polls = store::recent_polls(&conn, scope, POLL_LIMIT)?;

    Ok(Json(ChatHistory { messages, polls }))
}

async fn post(
    state: &AppState,
    scope: ChatScope,
    session: &MemberSession,
    body: &[u8],
) -> AppResult<Json<Value>> {
    // The connection is not Sync, so it must be gone before any await.
    let posted = {
        let conn = state.db.get()?;
        let member = gate::authorize(&conn, scope, session)?;
        let action: ChatAction = parse_action(body, ACTIONS)?;
        apply(&conn, scope, &member, action)?
    };

    match posted {
        Some(message) => {
            chat::publish(&state.cache, scope, &message, state.config.cache.max_len).await;
            tracing::debug!(scope = %scope, id = message.id, "Chat message posted");
            Ok(Json(json!({ "success": true, "message": message })))
        }
        None => Ok(Json(json!({ "success": true }))),
    }
}

/// Apply one action. Returns the stored message when a new one was posted.
fn apply(
    conn: &rusqlite::Connection,
    scope: ChatScope,
    member: &gate::ChatMember,
    action: ChatAction,
) -> AppResult<Option<ChatMessage>> {
    match action {
        ChatAction::Message { message } => {
            let body = required(&message, "message")?;
            let stored = store::insert_message(conn, scope, &member.name, &member.email, body)?;
            return Ok(Some(stored));
        }
        ChatAction::Reaction {
            message_id,
            reaction,
        } => {
            let emoji = required(&reaction, "reaction")?;
            ensure_message(conn, scope, message_id)?;
            store::add_reaction(conn, scope, message_id, &member.email, emoji)?;
        }
        ChatAction::Unreact {
            message_id,
            reaction,
        } => {
            let emoji = required(&reaction, "reaction")?;
            store::remove_reaction(conn, scope, message_id, &member.email, emoji)?;
        }
        ChatAction::Poll { poll } => {
            let question = required(&poll.question, "question")?;
            let options: Vec<String> = poll
                .options
                .iter()
                .map(|o| o.trim())
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
            if options.len() < 2 {
                return Err(AppError::BadRequest(
                    "A poll needs at least two options".to_string(),
                ));
            }
            store::create_poll(conn, scope, &member.name, &member.email, question, &options)?;
        }
        ChatAction::Vote { poll } => {
            let stored = store::get_poll(conn, scope, poll.poll_id)?.ok_or(AppError::NotFound)?;
            let in_range = usize::try_from(poll.option_index)
                .map(|i| i < stored.options.len())
                .unwrap_or(false);
            if !in_range {
                return Err(AppError::BadRequest("Invalid poll option".to_string()));
            }
            store::cast_vote(conn, scope, poll.poll_id, &member.email, poll.option_index)?;
        }
        ChatAction::Pin { message_id, pin } => {
            if !store::set_pinned(conn, scope, message_id, pin)? {
                return Err(AppError::NotFound);
            }
        }
        ChatAction::Delete { message_id } => {
            if !store::soft_delete_own(conn, scope, message_id, &member.email)? {
                return Err(AppError::NotFound);
            }
        }
    }
    Ok(None)
}

fn ensure_message(conn: &rusqlite::Connection, scope: ChatScope, id: i64) -> AppResult<()> {
    match store::get_message(conn, scope, id)? {
        Some(_) => Ok(()),
        None => Err(AppError::NotFound),
    }
}
