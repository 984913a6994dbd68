//! Domain model structs persisted in the store.
//!
//! Every struct derives `Serialize` and `Deserialize` and exposes the table
//! primary key as a public `id` field, which is the only identifier the rest
//! of the system ever sees.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use parley_shared::{ConversationId, GroupId, NotificationKind, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered user. Created on first successful external authentication,
/// never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Stable identifier assigned by the auth provider.
    pub id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A two-party conversation. The id is the canonical pair key, so exactly
/// one conversation can exist per unordered pair of users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    /// The two participants, lexicographically sorted.
    pub participants: [UserId; 2],
    /// Timestamp of the most recent message, absent while empty.
    pub last_timestamp: Option<DateTime<Utc>>,
}

impl Conversation {
    /// Build the conversation record for a pair of users.
    pub fn between(a: &UserId, b: &UserId) -> Self {
        let id = ConversationId::for_pair(a, b);
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            id,
            participants: [low.clone(), high.clone()],
            last_timestamp: None,
        }
    }

    /// Whether `user` is one of the two participants.
    pub fn has_participant(&self, user: &UserId) -> bool {
        self.participants.iter().any(|p| p == user)
    }

    /// The participant that is not `user`, if `user` is a participant.
    pub fn other_participant(&self, user: &UserId) -> Option<&UserId> {
        match &self.participants {
            [a, b] if a == user => Some(b),
            [a, b] if b == user => Some(a),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub contents: String,
    /// Assigned by the server at insert time; client clocks are ignored.
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// One ledger entry of per-user unread/aggregate state.
///
/// At most one record exists per `(user_id, kind, topic_id)`; the store's
/// unique index enforces it. `other_id` and `message_count` are only
/// populated for [`NotificationKind::NewMessages`] entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: NotificationKind,
    /// Conversation id or group id, depending on `kind`.
    pub topic_id: String,
    pub since: DateTime<Utc>,
    pub other_id: Option<UserId>,
    pub message_count: Option<i64>,
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A named group of users. Names are globally unique.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    /// Member user ids, unordered.
    pub members: Vec<UserId>,
}
