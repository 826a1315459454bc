use serde::{Deserialize, Serialize};

use crate::access::Tier;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub email: String,
    pub name: String,
    pub tier_name: Option<String>,
    pub status: String,
    pub source: Option<String>,
    pub subscribed_at: Option<String>,
    pub expiry_date: Option<String>,
    pub created_at: String,
}

impl Member {
    pub fn tier(&self) -> Tier {
        self.tier_name.as_deref().map(Tier::parse).unwrap_or(Tier::None)
    }

    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub user_name: String,
    pub user_email: String,
    pub message: String,
    pub created_at: String,
    pub is_deleted: bool,
    pub deleted_by: Option<String>,
    pub is_pinned: bool,
    #[serde(default)]
    pub reactions: Vec<ReactionGroup>,
}

/// Reactions on one message collapsed by emoji.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: i64,
    pub users: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub id: i64,
    pub user_name: String,
    pub user_email: String,
    pub question: String,
    pub options: Vec<String>,
    pub created_at: String,
    pub votes: Vec<PollVote>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollVote {
    pub option_index: i64,
    pub user_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatBan {
    pub user_email: String,
    pub banned_by: String,
    pub reason: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    pub sudo_chat_enabled: bool,
    pub root_chat_enabled: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            sudo_chat_enabled: true,
            root_chat_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportTicket {
    pub id: i64,
    pub user_name: String,
    pub user_email: String,
    pub subject: String,
    pub issue: String,
    pub status: String,
    pub admin_unread: i64,
    pub user_unread: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketMessage {
    pub id: i64,
    pub ticket_id: i64,
    pub sender_email: String,
    pub sender_name: String,
    pub message: String,
    pub attachment_url: Option<String>,
    pub attachment_name: Option<String>,
    pub created_at: String,
}
