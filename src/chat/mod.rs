//! Tiered member chat: scopes, the validation chain, the relational store and
//! the per-connection stream bridge.

pub mod bridge;
pub mod gate;
pub mod store;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::access::Tier;
use crate::cache::FanoutCache;
use crate::db::models::ChatMessage;

/// A chat partition. Each scope has its own tables and cache key and they are
/// never merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatScope {
    Sudo,
    Root,
}

pub(crate) struct ScopeTables {
    pub messages: &'static str,
    pub reactions: &'static str,
    pub polls: &'static str,
    pub votes: &'static str,
}

impl ChatScope {
    pub const ALL: [ChatScope; 2] = [ChatScope::Sudo, ChatScope::Root];

    pub fn parse(value: &str) -> Option<ChatScope> {
        match value {
            "sudo" => Some(ChatScope::Sudo),
            "root" => Some(ChatScope::Root),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChatScope::Sudo => "sudo",
            ChatScope::Root => "root",
        }
    }

    /// The only tier admitted to this scope. "Both" does not qualify.
    pub fn required_tier(&self) -> Tier {
        match self {
            ChatScope::Sudo => Tier::Sudo,
            ChatScope::Root => Tier::Root,
        }
    }

    pub fn cache_key(&self) -> &'static str {
        match self {
            ChatScope::Sudo => "chat:sudo:messages",
            ChatScope::Root => "chat:root:messages",
        }
    }

    pub(crate) fn tables(&self) -> ScopeTables {
        match self {
            ChatScope::Sudo => ScopeTables {
                messages: "sudo_chat_messages",
                reactions: "sudo_chat_reactions",
                polls: "sudo_chat_polls",
                votes: "sudo_chat_poll_votes",
            },
            ChatScope::Root => ScopeTables {
                messages: "root_chat_messages",
                reactions: "root_chat_reactions",
                polls: "root_chat_polls",
                votes: "root_chat_poll_votes",
            },
        }
    }

    /// Column of `chat_settings` holding this scope's enabled flag.
    pub(crate) fn settings_column(&self) -> &'static str {
        match self {
            ChatScope::Sudo => "sudo_chat_enabled",
            ChatScope::Root => "root_chat_enabled",
        }
    }
}

impl fmt::Display for ChatScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat message as carried through the fan-out cache: the stored row plus
/// the wall-clock millis at which it was published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEnvelope {
    #[serde(flatten)]
    pub message: ChatMessage,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl ChatEnvelope {
    pub fn new(message: ChatMessage, timestamp_ms: i64) -> Self {
        Self {
            message,
            timestamp: Some(timestamp_ms),
        }
    }

    /// Publication time in millis, falling back to the row's `created_at`.
    pub fn logical_time(&self) -> Option<i64> {
        self.timestamp
            .or_else(|| parse_store_time(&self.message.created_at))
    }
}

/// Push a freshly stored message onto the scope's fan-out key, keeping the
/// `keep` newest entries. Failures are logged and swallowed: the store already
/// holds the message and clients re-read it on reconnect.
pub async fn publish(cache: &FanoutCache, scope: ChatScope, message: &ChatMessage, keep: usize) {
    let envelope = ChatEnvelope::new(message.clone(), chrono::Utc::now().timestamp_millis());
    let payload = match serde_json::to_string(&envelope) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(scope = %scope, "Failed to encode chat envelope: {}", e);
            return;
        }
    };

    if let Err(e) = cache.push_bounded(scope.cache_key(), &payload, keep).await {
        tracing::warn!(scope = %scope, message_id = message.id, error = %e, "Chat message not fanned out");
    }
}

/// Parse a store timestamp (`YYYY-MM-DD HH:MM:SS[.fff]`, UTC) into millis.
pub fn parse_store_time(value: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(created_at: &str) -> ChatMessage {
        ChatMessage {
            id: 1,
            user_name: "Neo".into(),
            user_email: "neo@zion.io".into(),
            message: "hello".into(),
            created_at: created_at.into(),
            is_deleted: false,
            deleted_by: None,
            is_pinned: false,
            reactions: vec![],
        }
    }

    #[test]
    fn scopes_are_disjoint() {
        let sudo = ChatScope::Sudo.tables();
        let root = ChatScope::Root.tables();
        assert_ne!(sudo.messages, root.messages);
        assert_ne!(ChatScope::Sudo.cache_key(), ChatScope::Root.cache_key());
        assert_eq!(ChatScope::Sudo.required_tier(), Tier::Sudo);
        assert_eq!(ChatScope::Root.required_tier(), Tier::Root);
    }

    #[test]
    fn parse_accepts_only_known_scopes() {
        assert_eq!(ChatScope::parse("sudo"), Some(ChatScope::Sudo));
        assert_eq!(ChatScope::parse("root"), Some(ChatScope::Root));
        assert_eq!(ChatScope::parse("admin"), None);
        assert_eq!(ChatScope::parse("Sudo"), None);
    }

    #[test]
    fn envelope_is_flat_json() {
        let envelope = ChatEnvelope::new(message("2026-01-01 00:00:00.000"), 42);
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["message"], "hello");
        assert_eq!(json["timestamp"], 42);

        let back: ChatEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn logical_time_falls_back_to_created_at() {
        let envelope = ChatEnvelope {
            message: message("2026-01-01 00:00:01.500"),
            timestamp: None,
        };
        let expected = parse_store_time("2026-01-01 00:00:00").unwrap() + 1500;
        assert_eq!(envelope.logical_time(), Some(expected));
    }

    #[tokio::test]
    async fn publish_pushes_envelope_to_scope_key() {
        let cache = FanoutCache::in_memory();
        for id in 0..5 {
            let mut msg = message("2026-01-01 00:00:00.000");
            msg.id = id;
            publish(&cache, ChatScope::Root, &msg, 3).await;
        }

        let raw = cache.range("chat:root:messages", 0, -1).await.unwrap();
        assert_eq!(raw.len(), 3);
        let newest: ChatEnvelope = serde_json::from_str(&raw[0]).unwrap();
        assert_eq!(newest.message.id, 4);
        assert!(newest.timestamp.is_some());
        assert!(cache.range("chat:sudo:messages", 0, -1).await.unwrap().is_empty());
    }

    #[test]
    fn parse_store_time_handles_both_precisions() {
        assert!(parse_store_time("2026-03-04 05:06:07").is_some());
        assert!(parse_store_time("2026-03-04 05:06:07.123").is_some());
        assert!(parse_store_time("yesterday").is_none());
    }
}
