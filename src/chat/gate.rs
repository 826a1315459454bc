use rusqlite::Connection;

use super::{store, ChatScope};
use crate::error::{AppError, AppResult};
use crate::extractors::MemberSession;
use crate::members;

/// A member who passed every chat precondition for one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMember {
    pub email: String,
    pub name: String,
}

/// Run the chat preconditions after the session check (done by the
/// [`MemberSession`] extractor): maintenance, ban, then exact tier match.
/// The first failure wins.
pub fn authorize(
    conn: &Connection,
    scope: ChatScope,
    session: &MemberSession,
) -> AppResult<ChatMember> {
    if !store::chat_enabled(conn, scope)? {
        return Err(AppError::Maintenance);
    }

    if store::is_banned(conn, &session.email)? {
        return Err(AppError::Forbidden("You are banned from chat".to_string()));
    }

    let member = members::find_active_member(conn, &session.email)?
        .filter(|m| m.tier() == scope.required_tier())
        .ok_or_else(|| AppError::Forbidden("Access denied".to_string()))?;

    Ok(ChatMember {
        email: member.email,
        name: member.name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::ChatSettings;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(include_str!("../../migrations/001_initial.sql"))
            .unwrap();
        conn.execute_batch(include_str!("../../migrations/002_chat.sql"))
            .unwrap();
        members::record_payment(&conn, "neo@zion.io", "Neo", "Sudo Access", "kofi", 29).unwrap();
        members::record_payment(&conn, "trin@zion.io", "Trinity", "Both", "kofi", 29).unwrap();
        conn
    }

    fn session(email: &str) -> MemberSession {
        MemberSession {
            email: email.to_string(),
            issued_at_ms: 0,
        }
    }

    #[test]
    fn matching_tier_passes() {
        let conn = conn();
        let member = authorize(&conn, ChatScope::Sudo, &session("neo@zion.io")).unwrap();
        assert_eq!(member.name, "Neo");
    }

    #[test]
    fn tier_must_match_exactly() {
        let conn = conn();
        let err = authorize(&conn, ChatScope::Root, &session("neo@zion.io")).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        // "Both" unlocks content but not the tier-specific chat rooms.
        let err = authorize(&conn, ChatScope::Sudo, &session("trin@zion.io")).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn unknown_and_inactive_members_are_forbidden() {
        let conn = conn();
        let err = authorize(&conn, ChatScope::Sudo, &session("ghost@zion.io")).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        members::deactivate(&conn, "neo@zion.io").unwrap();
        let err = authorize(&conn, ChatScope::Sudo, &session("neo@zion.io")).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn maintenance_is_checked_before_ban_and_tier() {
        let conn = conn();
        store::ban(&conn, "ghost@zion.io", "admin@morpheus", None).unwrap();
        store::save_settings(
            &conn,
            ChatSettings {
                sudo_chat_enabled: false,
                root_chat_enabled: true,
            },
        )
        .unwrap();

        let err = authorize(&conn, ChatScope::Sudo, &session("ghost@zion.io")).unwrap_err();
        assert!(matches!(err, AppError::Maintenance));
    }

    #[test]
    fn ban_is_checked_before_tier() {
        let conn = conn();
        store::ban(&conn, "neo@zion.io", "admin@morpheus", Some("spam")).unwrap();
        let err = authorize(&conn, ChatScope::Sudo, &session("neo@zion.io")).unwrap_err();
        match err {
            AppError::Forbidden(msg) => assert!(msg.contains("banned")),
            other => panic!("expected ban, got {other:?}"),
        }
    }
}
