use serde::{Deserialize, Serialize};
use uuid::Uuid;

// User identity = the stable identifier assigned by the external auth
// provider. Treated as an opaque string everywhere.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Canonical identifier of a two-party conversation.
///
/// The identifier is a pure function of the unordered participant pair:
/// the lexicographically smaller user id, a comma, the larger one. Both
/// participants derive the same key independently, which is what lets the
/// client address a conversation it has never been told about.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Derive the canonical key for a pair of users. Order-independent.
    pub fn for_pair(a: &UserId, b: &UserId) -> Self {
        if a.0 <= b.0 {
            Self(format!("{},{}", a.0, b.0))
        } else {
            Self(format!("{},{}", b.0, a.0))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct GroupId(pub Uuid);

impl GroupId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Discriminator for notification ledger entries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Unread messages accumulated in a conversation. Carries a counter.
    NewMessages,
    /// A group the user belongs to changed. Presence of the record is the
    /// whole signal, no counter.
    GroupChanged,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewMessages => "new_messages",
            Self::GroupChanged => "group_changed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "new_messages" => Some(Self::NewMessages),
            "group_changed" => Some(Self::GroupChanged),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_key_is_order_independent() {
        let bob = UserId::from("bob");
        let charlie = UserId::from("charlie");

        let a = ConversationId::for_pair(&bob, &charlie);
        let b = ConversationId::for_pair(&charlie, &bob);

        assert_eq!(a, b);
        assert_eq!(a.as_str(), "bob,charlie");
    }

    #[test]
    fn conversation_key_with_self() {
        let bob = UserId::from("bob");
        let key = ConversationId::for_pair(&bob, &bob);
        assert_eq!(key.as_str(), "bob,bob");
    }

    #[test]
    fn notification_kind_string_round_trip() {
        for kind in [NotificationKind::NewMessages, NotificationKind::GroupChanged] {
            assert_eq!(NotificationKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(NotificationKind::from_str("bogus"), None);
    }

    #[test]
    fn notification_kind_serializes_snake_case() {
        let json = serde_json::to_string(&NotificationKind::NewMessages).unwrap();
        assert_eq!(json, "\"new_messages\"");
    }
}
