//! The notification ledger service.
//!
//! Lets every client discover which of its conversations and groups changed
//! since it last looked, with nothing but timestamp-ordered polling on the
//! other end. All writes go through the store's atomic upserts; everything
//! here that runs as a side effect of another operation is best-effort and
//! never fails its caller.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use parley_shared::{NotificationKind, UserId};
use parley_store::{Conversation, Database, Group, Message, Notification};

use crate::error::ApiError;

/// Service facade over the notification collection.
#[derive(Clone)]
pub struct NotificationLedger {
    db: Arc<Mutex<Database>>,
}

impl NotificationLedger {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// Record a freshly stored message for every participant of its
    /// conversation, the sender included; the sender's entry is cleared the
    /// next time they read the conversation. Runs after the message insert
    /// has durably succeeded; failures are logged and swallowed so the
    /// append itself never degrades.
    pub async fn record_new_message(&self, conversation: &Conversation, message: &Message) {
        let db = self.db.lock().await;

        for participant in &conversation.participants {
            let other = conversation
                .other_participant(participant)
                .unwrap_or(&message.sender_id);

            if let Err(e) = db.upsert_message_notification(
                participant,
                conversation.id.as_str(),
                message.timestamp,
                other,
            ) {
                warn!(
                    user = %participant,
                    conversation = %conversation.id,
                    error = %e,
                    "failed to record message notification"
                );
            }
        }
    }

    /// Record a group change for every member except the acting user.
    /// Overwrite-only; best-effort like the message path.
    pub async fn record_group_changed(
        &self,
        group: &Group,
        actor: &UserId,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) {
        let db = self.db.lock().await;

        for member in group.members.iter().filter(|m| *m != actor) {
            if let Err(e) =
                db.upsert_group_notification(member, &group.id.to_string(), timestamp)
            {
                warn!(
                    user = %member,
                    group = %group.id,
                    error = %e,
                    "failed to record group notification"
                );
            }
        }
    }

    /// Drop one ledger entry after the user has read the resource it points
    /// at. Best-effort: if the delete fails the entry lingers and is
    /// retried by whichever read comes next.
    pub async fn clear_after_read(&self, user_id: &UserId, kind: NotificationKind, topic: &str) {
        let db = self.db.lock().await;
        if let Err(e) = db.clear_notification(user_id, kind, topic) {
            warn!(user = %user_id, %kind, topic, error = %e, "failed to clear notification");
        }
    }

    /// Drop the entries for a whole set of topics at once (after a listing
    /// read). Best-effort.
    pub async fn clear_many_after_read(
        &self,
        user_id: &UserId,
        kind: NotificationKind,
        topics: &[String],
    ) {
        let db = self.db.lock().await;
        if let Err(e) = db.clear_notifications(user_id, kind, topics) {
            warn!(user = %user_id, %kind, error = %e, "failed to clear notifications");
        }
    }

    /// Every current entry for a user. This is a primary read, not a side
    /// effect, so failures propagate.
    pub async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Notification>, ApiError> {
        let db = self.db.lock().await;
        Ok(db.list_notifications(user_id)?)
    }
}
