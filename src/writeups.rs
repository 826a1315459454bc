//! Gated writeup content (HackTheBox machines and CTF writeups).

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteupKind {
    Htb,
    Ctf,
}

impl WriteupKind {
    pub fn parse(value: &str) -> Option<WriteupKind> {
        match value {
            "htb" => Some(WriteupKind::Htb),
            "ctf" => Some(WriteupKind::Ctf),
            _ => None,
        }
    }

    fn select(&self) -> &'static str {
        match self {
            WriteupKind::Htb => {
                "SELECT id, name, difficulty, content, access_tier, is_active, created_at
                 FROM htb_machines WHERE id = ?1"
            }
            WriteupKind::Ctf => {
                "SELECT id, title, category, content, access_tier, is_active, created_at
                 FROM ctf_writeups WHERE id = ?1"
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Writeup {
    pub id: i64,
    pub title: String,
    /// Difficulty for machines, category for CTF challenges.
    pub label: Option<String>,
    pub content: String,
    pub access_tier: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

pub fn find(conn: &Connection, kind: WriteupKind, id: i64) -> rusqlite::Result<Option<Writeup>> {
    conn.query_row(kind.select(), params![id], |row| {
        Ok(Writeup {
            id: row.get(0)?,
            title: row.get(1)?,
            label: row.get(2)?,
            content: row.get(3)?,
            access_tier: row.get(4)?,
            is_active: row.get(5)?,
            created_at: row.get(6)?,
        })
    })
    .optional()
}

/// A writeup offered as a markdown download.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Downloadable {
    pub id: i64,
    pub name: String,
    /// "HTB" or "CTF".
    #[serde(rename = "type")]
    pub kind: String,
    pub download_link: String,
    /// Completion date for machines, creation time for CTF writeups.
    pub date: Option<String>,
}

/// Every writeup with a download link, newest first. Rows without a date go last.
pub fn downloadable(conn: &Connection) -> rusqlite::Result<Vec<Downloadable>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, 'HTB', md_download_link, date_completed FROM htb_machines
           WHERE md_download_link IS NOT NULL AND md_download_link <> ''
         UNION ALL
         SELECT id, title, 'CTF', md_download_link, created_at FROM ctf_writeups
           WHERE md_download_link IS NOT NULL AND md_download_link <> ''
         ORDER BY 5 DESC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(Downloadable {
                id: row.get(0)?,
                name: row.get(1)?,
                kind: row.get(2)?,
                download_link: row.get(3)?,
                date: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
