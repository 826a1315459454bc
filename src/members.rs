//! Member Store. The only code that writes membership rows.

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::db::models::Member;
use crate::state::DbPool;

const MEMBER_COLUMNS: &str =
    "email, name, tier_name, status, source, subscribed_at, expiry_date, created_at";

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<Member> {
    Ok(Member {
        email: row.get(0)?,
        name: row.get(1)?,
        tier_name: row.get(2)?,
        status: row.get(3)?,
        source: row.get(4)?,
        subscribed_at: row.get(5)?,
        expiry_date: row.get(6)?,
        created_at: row.get(7)?,
    })
}

pub fn find_member(conn: &Connection, email: &str) -> rusqlite::Result<Option<Member>> {
    conn.query_row(
        &format!("SELECT {MEMBER_COLUMNS} FROM members WHERE email = ?1"),
        params![email],
        member_from_row,
    )
    .optional()
}

pub fn find_active_member(conn: &Connection, email: &str) -> rusqlite::Result<Option<Member>> {
    Ok(find_member(conn, email)?.filter(Member::is_active))
}

/// Record a paid membership: insert or re-activate with a fresh expiry.
pub fn record_payment(
    conn: &Connection,
    email: &str,
    name: &str,
    tier: &str,
    source: &str,
    paid_days: u32,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO members (email, name, tier_name, status, source, subscribed_at, expiry_date)
         VALUES (?1, ?2, ?3, 'active', ?4, datetime('now'), datetime('now', ?5))
         ON CONFLICT(email) DO UPDATE SET
           name = excluded.name,
           tier_name = excluded.tier_name,
           status = 'active',
           source = excluded.source,
           subscribed_at = excluded.subscribed_at,
           expiry_date = excluded.expiry_date",
        params![email, name, tier, source, format!("+{} days", paid_days)],
    )?;
    Ok(())
}

/// Flip one active member to inactive. Returns whether a row changed.
pub fn deactivate(conn: &Connection, email: &str) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE members SET status = 'inactive' WHERE email = ?1 AND status = 'active'",
        params![email],
    )?;
    Ok(changed > 0)
}

/// Deactivate every active member whose expiry date has passed.
/// Returns the affected emails.
pub fn expire_overdue(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "UPDATE members SET status = 'inactive'
         WHERE status = 'active'
           AND expiry_date IS NOT NULL
           AND LENGTH(expiry_date) > 0
           AND expiry_date < datetime('now')
         RETURNING email",
    )?;
    let emails = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(emails)
}

/// Periodically run [`expire_overdue`] for the lifetime of the process.
pub fn spawn_expiry_sweep(pool: DbPool, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let result = pool
                .get()
                .map_err(|e| e.to_string())
                .and_then(|conn| expire_overdue(&conn).map_err(|e| e.to_string()));
            match result {
                Ok(expired) if expired.is_empty() => {
                    tracing::debug!("Membership sweep: nothing expired");
                }
                Ok(expired) => {
                    tracing::info!(count = expired.len(), "Membership sweep deactivated members");
                }
                Err(e) => tracing::error!("Membership sweep failed: {}", e),
            }
        }
    })
}
