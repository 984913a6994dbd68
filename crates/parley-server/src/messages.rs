//! The message ledger service.
//!
//! Appends are the one write with side effects: a successful insert bumps
//! the conversation's last-activity timestamp and fans out notifications.
//! Both side effects are best-effort; an already-written message is never
//! rolled back because bookkeeping failed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use parley_shared::{ConversationId, UserId};
use parley_store::{Database, Message};

use crate::conversations::ConversationDirectory;
use crate::error::ApiError;
use crate::notifications::NotificationLedger;

#[derive(Clone)]
pub struct MessageLedger {
    db: Arc<Mutex<Database>>,
    conversations: ConversationDirectory,
    notifications: NotificationLedger,
    max_message_length: usize,
}

impl MessageLedger {
    pub fn new(
        db: Arc<Mutex<Database>>,
        conversations: ConversationDirectory,
        notifications: NotificationLedger,
        max_message_length: usize,
    ) -> Self {
        Self {
            db,
            conversations,
            notifications,
            max_message_length,
        }
    }

    /// Append a message to a conversation.
    ///
    /// Empty contents are a deliberate no-op: clients may probe a
    /// conversation into existence without creating noise, and the call
    /// still succeeds (`Ok(None)`). The timestamp is assigned here, at
    /// insert time; client clocks are never trusted.
    pub async fn append(
        &self,
        sender: &UserId,
        conversation_id: &ConversationId,
        contents: &str,
    ) -> Result<Option<Message>, ApiError> {
        if contents.is_empty() {
            return Ok(None);
        }
        if contents.len() > self.max_message_length {
            return Err(ApiError::BadRequest(format!(
                "message too long (max {} bytes)",
                self.max_message_length
            )));
        }

        let conversation = self
            .conversations
            .require_membership(conversation_id, sender)
            .await?;

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.clone(),
            sender_id: sender.clone(),
            contents: contents.to_string(),
            timestamp: Utc::now(),
        };

        {
            let db = self.db.lock().await;
            db.insert_message(&message)?;

            // Best-effort from here on: the message is durable, bookkeeping
            // failures must not undo that.
            if let Err(e) = db.touch_conversation(conversation_id, message.timestamp) {
                warn!(conversation = %conversation_id, error = %e, "failed to bump last_timestamp");
            }
        }

        self.notifications
            .record_new_message(&conversation, &message)
            .await;

        info!(
            id = %message.id,
            conversation = %conversation_id,
            sender = %sender,
            "message appended"
        );
        Ok(Some(message))
    }

    /// List a conversation's messages, optionally only those strictly newer
    /// than `since`. Membership is the endpoint layer's concern and must be
    /// validated before this call.
    pub async fn list(
        &self,
        conversation_id: &ConversationId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, ApiError> {
        let db = self.db.lock().await;
        Ok(db.list_messages(conversation_id, since)?)
    }

    /// Count instead of fetch, same filter as [`MessageLedger::list`].
    pub async fn count(
        &self,
        conversation_id: &ConversationId,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64, ApiError> {
        let db = self.db.lock().await;
        Ok(db.count_messages(conversation_id, since)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parley_shared::NotificationKind;
    use parley_store::User;

    struct Fixture {
        _dir: tempfile::TempDir,
        db: Arc<Mutex<Database>>,
        ledger: MessageLedger,
        notifications: NotificationLedger,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        for id in ["bob", "charlie", "mallory"] {
            db.upsert_user(&User {
                id: UserId::from(id),
                display_name: id.to_string(),
                avatar_url: None,
                created_at: Utc::now(),
            })
            .unwrap();
        }
        let db = Arc::new(Mutex::new(db));
        let conversations = ConversationDirectory::new(db.clone());
        let notifications = NotificationLedger::new(db.clone());
        let ledger = MessageLedger::new(db.clone(), conversations, notifications.clone(), 2000);
        Fixture {
            _dir: dir,
            db,
            ledger,
            notifications,
        }
    }

    async fn conversation(f: &Fixture) -> ConversationId {
        let conversations = ConversationDirectory::new(f.db.clone());
        conversations
            .get_or_create(&UserId::from("bob"), &UserId::from("charlie"))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn append_stores_and_bumps_and_notifies() {
        let f = fixture().await;
        let conv = conversation(&f).await;

        let first = f
            .ledger
            .append(&UserId::from("bob"), &conv, "hi")
            .await
            .unwrap()
            .expect("message stored");
        let second = f
            .ledger
            .append(&UserId::from("charlie"), &conv, "hey")
            .await
            .unwrap()
            .expect("message stored");

        let listed = f.ledger.list(&conv, None).await.unwrap();
        assert_eq!(
            listed.iter().map(|m| m.contents.as_str()).collect::<Vec<_>>(),
            vec!["hi", "hey"]
        );

        // last_timestamp follows the newest message.
        let stored = f
            .db
            .lock()
            .await
            .find_conversation(&conv)
            .unwrap()
            .unwrap();
        assert_eq!(
            stored.last_timestamp.unwrap().to_rfc3339(),
            second.timestamp.to_rfc3339()
        );
        assert!(first.timestamp <= second.timestamp);

        // Unread count accumulated for both participants.
        let entries = f
            .notifications
            .list_for_user(&UserId::from("bob"))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, NotificationKind::NewMessages);
        assert_eq!(entries[0].message_count, Some(2));
    }

    #[tokio::test]
    async fn empty_contents_is_a_successful_noop() {
        let f = fixture().await;
        let conv = conversation(&f).await;

        let stored = f
            .ledger
            .append(&UserId::from("bob"), &conv, "")
            .await
            .unwrap();
        assert!(stored.is_none());

        assert!(f.ledger.list(&conv, None).await.unwrap().is_empty());
        assert!(f
            .notifications
            .list_for_user(&UserId::from("charlie"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn oversized_contents_are_rejected() {
        let f = fixture().await;
        let conv = conversation(&f).await;

        let err = f
            .ledger
            .append(&UserId::from("bob"), &conv, &"x".repeat(2001))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn non_participant_cannot_append() {
        let f = fixture().await;
        let conv = conversation(&f).await;

        let err = f
            .ledger
            .append(&UserId::from("mallory"), &conv, "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[tokio::test]
    async fn count_honours_since_filter() {
        let f = fixture().await;
        let conv = conversation(&f).await;

        let first = f
            .ledger
            .append(&UserId::from("bob"), &conv, "one")
            .await
            .unwrap()
            .unwrap();
        f.ledger
            .append(&UserId::from("bob"), &conv, "two")
            .await
            .unwrap();

        assert_eq!(f.ledger.count(&conv, None).await.unwrap(), 2);
        let newer = f.ledger.count(&conv, Some(first.timestamp)).await.unwrap();
        assert_eq!(newer, 1);
    }
}
