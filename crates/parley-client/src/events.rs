//! Events emitted by the poller towards the UI layer.

use chrono::{DateTime, Utc};
use serde::Serialize;

use parley_shared::api::MessageDto;

/// What the poller noticed during a batch. Delivered over an mpsc channel;
/// the receiving side (a UI, a bot, a test) decides what to do with it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum PollerEvent {
    /// The locally open conversation grew; `messages` holds exactly the
    /// newly merged tail, in order.
    NewMessages {
        peer: String,
        conversation_id: String,
        messages: Vec<MessageDto>,
    },

    /// A conversation that is not open locally has unread messages; only
    /// the badge count was fetched.
    UnreadCount {
        peer: String,
        conversation_id: String,
        count: i64,
    },

    /// A group the user belongs to changed.
    GroupChanged {
        group_id: String,
        since: DateTime<Utc>,
    },
}
