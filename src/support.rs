//! Support helpdesk store: tickets, their message threads and the two unread
//! counters. Each counter has a single writer that increments it (the other
//! party) and a single reader that zeroes it (its owner).

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::models::{SupportTicket, TicketMessage};

/// Which side of a ticket is acting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Member,
    Admin,
}

impl Party {
    /// The counter this party reads (and zeroes).
    fn own_counter(&self) -> &'static str {
        match self {
            Party::Member => "user_unread",
            Party::Admin => "admin_unread",
        }
    }

    /// The counter bumped when this party writes.
    fn counterpart_counter(&self) -> &'static str {
        match self {
            Party::Member => "admin_unread",
            Party::Admin => "user_unread",
        }
    }
}

impl SupportTicket {
    pub fn is_open(&self) -> bool {
        self.status == "open"
    }
}

const TICKET_COLUMNS: &str =
    "id, user_name, user_email, subject, issue, status, admin_unread, user_unread, created_at";

const MESSAGE_COLUMNS: &str =
    "id, ticket_id, sender_email, sender_name, message, attachment_url, attachment_name, created_at";

fn ticket_from_row(row: &Row<'_>) -> rusqlite::Result<SupportTicket> {
    Ok(SupportTicket {
        id: row.get(0)?,
        user_name: row.get(1)?,
        user_email: row.get(2)?,
        subject: row.get(3)?,
        issue: row.get(4)?,
        status: row.get(5)?,
        admin_unread: row.get(6)?,
        user_unread: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<TicketMessage> {
    Ok(TicketMessage {
        id: row.get(0)?,
        ticket_id: row.get(1)?,
        sender_email: row.get(2)?,
        sender_name: row.get(3)?,
        message: row.get(4)?,
        attachment_url: row.get(5)?,
        attachment_name: row.get(6)?,
        created_at: row.get(7)?,
    })
}

pub fn open_ticket(
    conn: &Connection,
    user_name: &str,
    user_email: &str,
    subject: &str,
    issue: &str,
) -> rusqlite::Result<SupportTicket> {
    conn.query_row(
        &format!(
            "INSERT INTO support_tickets (user_name, user_email, subject, issue)
             VALUES (?1, ?2, ?3, ?4)
             RETURNING {TICKET_COLUMNS}"
        ),
        params![user_name, user_email, subject, issue],
        ticket_from_row,
    )
}

pub fn get_ticket(conn: &Connection, id: i64) -> rusqlite::Result<Option<SupportTicket>> {
    conn.query_row(
        &format!("SELECT {TICKET_COLUMNS} FROM support_tickets WHERE id = ?1"),
        params![id],
        ticket_from_row,
    )
    .optional()
}

/// Every ticket, newest first.
pub fn list_all(conn: &Connection) -> rusqlite::Result<Vec<SupportTicket>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TICKET_COLUMNS} FROM support_tickets ORDER BY created_at DESC, id DESC"
    ))?;
    let tickets = stmt
        .query_map([], ticket_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tickets)
}

/// One member's tickets, newest first.
pub fn list_for_member(conn: &Connection, email: &str) -> rusqlite::Result<Vec<SupportTicket>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TICKET_COLUMNS} FROM support_tickets WHERE user_email = ?1
         ORDER BY created_at DESC, id DESC"
    ))?;
    let tickets = stmt
        .query_map(params![email], ticket_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tickets)
}

pub fn messages(conn: &Connection, ticket_id: i64) -> rusqlite::Result<Vec<TicketMessage>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM ticket_messages WHERE ticket_id = ?1
         ORDER BY created_at ASC, id ASC"
    ))?;
    let messages = stmt
        .query_map(params![ticket_id], message_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(messages)
}

pub struct NewTicketMessage<'a> {
    pub sender: Party,
    pub sender_email: &'a str,
    pub sender_name: &'a str,
    pub message: &'a str,
    pub attachment_url: Option<&'a str>,
    pub attachment_name: Option<&'a str>,
}

/// Append to a ticket's thread and bump the counterpart's unread counter.
pub fn append_message(
    conn: &Connection,
    ticket_id: i64,
    new: NewTicketMessage<'_>,
) -> rusqlite::Result<TicketMessage> {
    let tx = conn.unchecked_transaction()?;
    let message = tx.query_row(
        &format!(
            "INSERT INTO ticket_messages
               (ticket_id, sender_email, sender_name, message, attachment_url, attachment_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             RETURNING {MESSAGE_COLUMNS}"
        ),
        params![
            ticket_id,
            new.sender_email,
            new.sender_name,
            new.message,
            new.attachment_url,
            new.attachment_name
        ],
        message_from_row,
    )?;
    tx.execute(
        &format!(
            "UPDATE support_tickets SET {col} = {col} + 1 WHERE id = ?1",
            col = new.sender.counterpart_counter()
        ),
        params![ticket_id],
    )?;
    tx.commit()?;
    Ok(message)
}

/// Zero the reader's own unread counter.
pub fn mark_read(conn: &Connection, ticket_id: i64, reader: Party) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        &format!(
            "UPDATE support_tickets SET {} = 0 WHERE id = ?1",
            reader.own_counter()
        ),
        params![ticket_id],
    )?;
    Ok(changed > 0)
}

pub fn close(conn: &Connection, ticket_id: i64) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE support_tickets SET status = 'closed' WHERE id = ?1",
        params![ticket_id],
    )?;
    Ok(changed > 0)
}
