use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::Admin;
use crate::db::models::SupportTicket;
use crate::error::{AppError, AppResult};
use crate::extractors::{MaybeAdmin, MemberSession, OptionalMemberSession};
use crate::members;
use crate::routes::required;
use crate::state::AppState;
use crate::support::{self, NewTicketMessage, Party};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/support", get(list_tickets).post(open_ticket))
        .route(
            "/api/ticket-messages",
            get(ticket_messages).post(ticket_action),
        )
}

/// Who is talking to the helpdesk. An admin cookie wins over a member one.
enum Requester {
    Admin(Admin),
    Member(MemberSession),
}

impl Requester {
    fn resolve(admin: MaybeAdmin, member: OptionalMemberSession) -> AppResult<Self> {
        if let MaybeAdmin(Some(admin)) = admin {
            return Ok(Requester::Admin(admin));
        }
        match member {
            OptionalMemberSession(Some(Ok(session))) => Ok(Requester::Member(session)),
            _ => Err(AppError::Unauthorized),
        }
    }

    fn party(&self) -> Party {
        match self {
            Requester::Admin(_) => Party::Admin,
            Requester::Member(_) => Party::Member,
        }
    }

    /// Load a ticket the requester is allowed to see.
    fn ticket(&self, conn: &rusqlite::Connection, id: i64) -> AppResult<SupportTicket> {
        let ticket = support::get_ticket(conn, id)?.ok_or(AppError::NotFound)?;
        match self {
            Requester::Admin(_) => Ok(ticket),
            Requester::Member(session) if ticket.user_email == session.email => Ok(ticket),
            Requester::Member(_) => Err(AppError::Forbidden("Access denied".to_string())),
        }
    }
}

async fn list_tickets(
    State(state): State<AppState>,
    admin: MaybeAdmin,
    member: OptionalMemberSession,
) -> AppResult<Json<Value>> {
    let requester = Requester::resolve(admin, member)?;
    let conn = state.db.get()?;
    let tickets = match &requester {
        Requester::Admin(_) => support::list_all(&conn)?,
        Requester::Member(session) => support::list_for_member(&conn, &session.email)?,
    };
    Ok(Json(json!({ "tickets": tickets })))
}

#[derive(Debug, Deserialize)]
pub struct OpenTicketRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub issue: String,
}

async fn open_ticket(
    State(state): State<AppState>,
    session: MemberSession,
    Json(req): Json<OpenTicketRequest>,
) -> AppResult<Json<Value>> {
    let (name, subject, issue) = (req.name.trim(), req.subject.trim(), req.issue.trim());
    if name.is_empty() || subject.is_empty() || issue.is_empty() {
        return Err(AppError::BadRequest("All fields required".to_string()));
    }

    let conn = state.db.get()?;
    let ticket = support::open_ticket(&conn, name, &session.email, subject, issue)?;
    tracing::info!(ticket = ticket.id, email = %session.email, "Support ticket opened");

    Ok(Json(json!({ "success": true, "ticket": ticket })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketQuery {
    pub ticket_id: Option<i64>,
}

/// Thread of one ticket. Reading it clears the caller's unread counter.
async fn ticket_messages(
    State(state): State<AppState>,
    admin: MaybeAdmin,
    member: OptionalMemberSession,
    Query(query): Query<TicketQuery>,
) -> AppResult<Json<Value>> {
    let requester = Requester::resolve(admin, member)?;
    let ticket_id = query
        .ticket_id
        .ok_or_else(|| AppError::BadRequest("ticketId is required".to_string()))?;

    let conn = state.db.get()?;
    let ticket = requester.ticket(&conn, ticket_id)?;
    support::mark_read(&conn, ticket.id, requester.party())?;
    let messages = support::messages(&conn, ticket.id)?;

    Ok(Json(json!({ "messages": messages })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketActionRequest {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub ticket_id: i64,
    pub message: Option<String>,
    pub attachment_url: Option<String>,
    pub attachment_name: Option<String>,
}

async fn ticket_action(
    State(state): State<AppState>,
    admin: MaybeAdmin,
    member: OptionalMemberSession,
    Json(req): Json<TicketActionRequest>,
) -> AppResult<Json<Value>> {
    let requester = Requester::resolve(admin, member)?;
    let conn = state.db.get()?;
    let ticket = requester.ticket(&conn, req.ticket_id)?;

    match req.kind.as_deref() {
        Some("close") => {
            let Requester::Admin(admin) = &requester else {
                return Err(AppError::Forbidden("Admin only".to_string()));
            };
            support::close(&conn, ticket.id)?;
            tracing::info!(ticket = ticket.id, admin = %admin.username, "Support ticket closed");
            Ok(Json(json!({ "success": true })))
        }
        Some("markRead") => {
            support::mark_read(&conn, ticket.id, requester.party())?;
            Ok(Json(json!({ "success": true })))
        }
        None | Some("message") => {
            if !ticket.is_open() {
                return Err(AppError::BadRequest("Ticket is closed".to_string()));
            }
            let text = required(req.message.as_deref().unwrap_or_default(), "message")?;

            let (sender_email, sender_name) = match &requester {
                Requester::Admin(admin) => ("admin".to_string(), admin.username.clone()),
                Requester::Member(session) => {
                    let name = members::find_member(&conn, &session.email)?
                        .map(|m| m.name)
                        .unwrap_or_else(|| "User".to_string());
                    (session.email.clone(), name)
                }
            };

            let message = support::append_message(
                &conn,
                ticket.id,
                NewTicketMessage {
                    sender: requester.party(),
                    sender_email: &sender_email,
                    sender_name: &sender_name,
                    message: text,
                    attachment_url: req.attachment_url.as_deref(),
                    attachment_name: req.attachment_name.as_deref(),
                },
            )?;

            Ok(Json(json!({ "success": true, "message": message })))
        }
        Some(_) => Err(AppError::BadRequest("Invalid type".to_string())),
    }
}
