//! Chat advisor messages and the local turn representation.
//!
//! `ChatMessage` is the server record. `ChatTurn` is what a conversation view
//! holds: either a confirmed server record, a locally synthesized optimistic
//! echo, or a local failure notice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix of locally generated optimistic turn ids.
pub const OPTIMISTIC_ID_PREFIX: &str = "opt-";
/// Prefix of locally generated failure notice ids.
pub const FAILURE_ID_PREFIX: &str = "err-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatHistory {
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSendRequest {
    pub content: String,
}

/// Lifecycle of a turn in the local conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// Local echo of an outbound message, not yet confirmed.
    Optimistic,
    /// Server-confirmed record.
    Reconciled,
    /// Locally synthesized notice for a send that failed.
    FailedLocal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    pub state: TurnState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ChatTurn {
    /// Local echo of a user message.
    pub fn optimistic(content: impl Into<String>) -> Self {
        Self {
            id: format!("{}{}", OPTIMISTIC_ID_PREFIX, Uuid::new_v4()),
            role: ChatRole::User,
            content: content.into(),
            state: TurnState::Optimistic,
            created_at: None,
        }
    }

    /// Bot-side notice appended when a send fails.
    pub fn failure_notice(content: impl Into<String>) -> Self {
        Self {
            id: format!("{}{}", FAILURE_ID_PREFIX, Uuid::new_v4()),
            role: ChatRole::Bot,
            content: content.into(),
            state: TurnState::FailedLocal,
            created_at: None,
        }
    }

    pub fn is_optimistic(&self) -> bool {
        self.state == TurnState::Optimistic
    }
}

impl From<ChatMessage> for ChatTurn {
    fn from(msg: ChatMessage) -> Self {
        Self {
            id: msg.id.to_string(),
            role: msg.role,
            content: msg.content,
            state: TurnState::Reconciled,
            created_at: Some(msg.created_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_wire_names() {
        assert_eq!(serde_json::to_string(&ChatRole::Bot).unwrap(), r#""bot""#);
        let role: ChatRole = serde_json::from_str(r#""user""#).unwrap();
        assert_eq!(role, ChatRole::User);
    }

    #[test]
    fn test_local_ids_are_prefixed_and_unique() {
        let a = ChatTurn::optimistic("hi");
        let b = ChatTurn::optimistic("hi");
        assert!(a.id.starts_with(OPTIMISTIC_ID_PREFIX));
        assert_ne!(a.id, b.id);
        assert!(a.is_optimistic());

        let notice = ChatTurn::failure_notice("oops");
        assert!(notice.id.starts_with(FAILURE_ID_PREFIX));
        assert_eq!(notice.role, ChatRole::Bot);
        assert_eq!(notice.state, TurnState::FailedLocal);
    }

    #[test]
    fn test_server_message_becomes_reconciled_turn() {
        let msg = ChatMessage {
            id: Uuid::new_v4(),
            role: ChatRole::Bot,
            content: "You spent 4,200 this month.".to_string(),
            created_at: Utc::now(),
        };
        let turn = ChatTurn::from(msg.clone());
        assert_eq!(turn.id, msg.id.to_string());
        assert_eq!(turn.state, TurnState::Reconciled);
        assert_eq!(turn.created_at, Some(msg.created_at));
    }
}
