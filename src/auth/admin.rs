use rusqlite::{params, Connection, OptionalExtension};

/// An authenticated administrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admin {
    pub id: String,
    pub username: String,
}

impl Admin {
    /// Display name used when an admin writes into a member chat.
    pub fn chat_name(&self) -> String {
        format!("👑 {}", self.username)
    }

    /// Pseudo email recorded as author / moderator of admin actions.
    pub fn chat_email(&self) -> String {
        format!("admin@{}", self.username)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Hash error: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

/// Create an admin, or reset the password of an existing one.
pub fn upsert_admin(
    conn: &Connection,
    username: &str,
    password: &str,
    cost: u32,
) -> Result<Admin, AdminError> {
    let hash = bcrypt::hash(password, cost)?;
    let id = uuid::Uuid::now_v7().to_string();

    conn.execute(
        "INSERT INTO admin_users (id, username, password_hash) VALUES (?1, ?2, ?3)
         ON CONFLICT(username) DO UPDATE SET
           password_hash = excluded.password_hash,
           is_active = 1",
        params![id, username, hash],
    )?;

    let id: String = conn.query_row(
        "SELECT id FROM admin_users WHERE username = ?1",
        params![username],
        |row| row.get(0),
    )?;

    Ok(Admin {
        id,
        username: username.to_string(),
    })
}

/// Check credentials; `None` for unknown users, inactive users, or a wrong password.
pub fn verify_credentials(
    conn: &Connection,
    username: &str,
    password: &str,
) -> Result<Option<Admin>, AdminError> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT id, password_hash FROM admin_users WHERE username = ?1 AND is_active = 1",
            params![username],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((id, hash)) = row else {
        return Ok(None);
    };

    if bcrypt::verify(password, &hash)? {
        Ok(Some(Admin {
            id,
            username: username.to_string(),
        }))
    } else {
        Ok(None)
    }
}
