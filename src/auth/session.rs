use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use std::time::Duration;

/// Tolerated clock skew for member tokens issued "in the future".
const MAX_FUTURE_SKEW_MS: i64 = 60_000;

/// Identity carried by a member session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberClaims {
    pub email: String,
    pub issued_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("malformed session token")]
    Malformed,
    #[error("session expired")]
    Expired,
}

/// Build the member cookie value: base64 of `email:issuedAtMillis`.
///
/// The payload is not signed. Integrity rests on the cookie being `HttpOnly`,
/// `Secure` and `SameSite=Strict`.
pub fn encode_member_token(email: &str, issued_at_ms: i64) -> String {
    STANDARD.encode(format!("{}:{}", email, issued_at_ms))
}

/// `Set-Cookie` value for a session cookie. A zero `max_age` clears it.
pub fn cookie(name: &str, value: &str, max_age_secs: u64) -> String {
    format!(
        "{}={}; HttpOnly; Secure; SameSite=Strict; Path=/; Max-Age={}",
        name, value, max_age_secs
    )
}

/// Decode and validate a member cookie value against `now_ms`.
pub fn decode_member_token(
    token: &str,
    now_ms: i64,
    lifetime: Duration,
) -> Result<MemberClaims, SessionError> {
    let bytes = STANDARD_NO_PAD
        .decode(token.trim().trim_end_matches('='))
        .map_err(|_| SessionError::Malformed)?;
    let decoded = String::from_utf8(bytes).map_err(|_| SessionError::Malformed)?;

    let (email, issued) = decoded.rsplit_once(':').ok_or(SessionError::Malformed)?;
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(SessionError::Malformed);
    }
    let issued_at_ms: i64 = issued.trim().parse().map_err(|_| SessionError::Malformed)?;

    if issued_at_ms > now_ms + MAX_FUTURE_SKEW_MS {
        return Err(SessionError::Malformed);
    }
    let lifetime_ms = i64::try_from(lifetime.as_millis()).unwrap_or(i64::MAX);
    if now_ms.saturating_sub(issued_at_ms) >= lifetime_ms {
        return Err(SessionError::Expired);
    }

    Ok(MemberClaims {
        email: email.to_string(),
        issued_at_ms,
    })
}

/// Create a new admin session. Returns the session token.
pub fn create_admin_session(
    conn: &Connection,
    user_id: &str,
    hours: u64,
) -> Result<String, rusqlite::Error> {
    let token = generate_token();
    let id = uuid::Uuid::now_v7().to_string();

    conn.execute(
        "INSERT INTO admin_sessions (id, user_id, token, expires_at) VALUES (?1, ?2, ?3, datetime('now', ?4))",
        params![id, user_id, token, format!("+{} hours", hours)],
    )?;

    Ok(token)
}

/// Delete an admin session by token.
pub fn delete_admin_session(conn: &Connection, token: &str) -> Result<(), rusqlite::Error> {
    conn.execute("DELETE FROM admin_sessions WHERE token = ?1", params![token])?;
    Ok(())
}

/// Username owning a live admin session, if any.
pub fn lookup_admin_session(
    conn: &Connection,
    token: &str,
) -> Result<Option<(String, String)>, rusqlite::Error> {
    conn.query_row(
        "SELECT u.id, u.username FROM admin_sessions s \
         JOIN admin_users u ON u.id = s.user_id \
         WHERE s.token = ?1 AND s.expires_at > datetime('now') AND u.is_active = 1",
        params![token],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);
    const DAY_MS: i64 = 24 * 60 * 60 * 1000;
    const NOW: i64 = 1_760_000_000_000;

    #[test]
    fn generate_token_is_64_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generate_token_is_unique() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn fresh_token_decodes() {
        let token = encode_member_token("neo@zion.io", NOW - 1000);
        let claims = decode_member_token(&token, NOW, DAY).unwrap();
        assert_eq!(claims.email, "neo@zion.io");
        assert_eq!(claims.issued_at_ms, NOW - 1000);
    }

    #[test]
    fn token_expires_at_exactly_24_hours() {
        let just_valid = encode_member_token("neo@zion.io", NOW - DAY_MS + 1);
        assert!(decode_member_token(&just_valid, NOW, DAY).is_ok());

        let at_limit = encode_member_token("neo@zion.io", NOW - DAY_MS);
        assert_eq!(
            decode_member_token(&at_limit, NOW, DAY),
            Err(SessionError::Expired)
        );

        let old = encode_member_token("neo@zion.io", NOW - 3 * DAY_MS);
        assert_eq!(decode_member_token(&old, NOW, DAY), Err(SessionError::Expired));
    }

    #[test]
    fn unpadded_token_is_accepted() {
        let token = encode_member_token("a@b.co", NOW);
        let trimmed = token.trim_end_matches('=');
        assert!(decode_member_token(trimmed, NOW, DAY).is_ok());
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let cases = [
            "not base64 at all!".to_string(),
            STANDARD.encode("no-separator"),
            STANDARD.encode("neo@zion.io:yesterday"),
            STANDARD.encode(format!(":{}", NOW)),
            STANDARD.encode(format!("no-at-sign:{}", NOW)),
            STANDARD.encode([0xff, 0xfe, 0x3a, 0x31]),
        ];
        for token in cases {
            assert_eq!(
                decode_member_token(&token, NOW, DAY),
                Err(SessionError::Malformed),
                "token {token:?}"
            );
        }
    }

    #[test]
    fn far_future_issue_time_is_rejected() {
        let token = encode_member_token("neo@zion.io", NOW + DAY_MS);
        assert_eq!(
            decode_member_token(&token, NOW, DAY),
            Err(SessionError::Malformed)
        );
    }

    #[test]
    fn cookie_carries_transport_attributes() {
        let set = cookie("user_session", "abc", 86400);
        assert!(set.starts_with("user_session=abc;"));
        assert!(set.contains("HttpOnly"));
        assert!(set.contains("SameSite=Strict"));
        assert!(set.ends_with("Max-Age=86400"));
        assert!(cookie("user_session", "", 0).ends_with("Max-Age=0"));
    }

    #[test]
    fn admin_session_lifecycle() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(include_str!("../../migrations/001_initial.sql"))
            .unwrap();
        conn.execute(
            "INSERT INTO admin_users (id, username, password_hash) VALUES ('u1', 'morpheus', 'x')",
            [],
        )
        .unwrap();

        let token = create_admin_session(&conn, "u1", 24).unwrap();
        assert_eq!(
            lookup_admin_session(&conn, &token).unwrap(),
            Some(("u1".to_string(), "morpheus".to_string()))
        );
        assert_eq!(lookup_admin_session(&conn, "bogus").unwrap(), None);

        delete_admin_session(&conn, &token).unwrap();
        assert_eq!(lookup_admin_session(&conn, &token).unwrap(), None);
    }

    #[test]
    fn expired_admin_session_is_ignored() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(include_str!("../../migrations/001_initial.sql"))
            .unwrap();
        conn.execute_batch(
            "INSERT INTO admin_users (id, username, password_hash) VALUES ('u1', 'morpheus', 'x');
             INSERT INTO admin_sessions (id, user_id, token, expires_at)
             VALUES ('s1', 'u1', 'old', datetime('now', '-1 hour'));",
        )
        .unwrap();
        assert_eq!(lookup_admin_session(&conn, "old").unwrap(), None);
    }
}
