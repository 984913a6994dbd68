//! The conversation resolver service.
//!
//! Conversations are addressed by the canonical pair key, so "create" is
//! always find-or-create and two participants racing to create the same
//! conversation converge on a single record.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use parley_shared::{ConversationId, UserId};
use parley_store::{Conversation, Database, StoreError};

use crate::error::ApiError;

#[derive(Clone)]
pub struct ConversationDirectory {
    db: Arc<Mutex<Database>>,
}

impl ConversationDirectory {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// Find the conversation between two users, creating it if absent.
    ///
    /// Both users must exist. A duplicate-key failure from the insert means
    /// the other participant created the record concurrently; that is a
    /// benign outcome resolved by re-fetching, not an error.
    pub async fn get_or_create(
        &self,
        sender: &UserId,
        recipient: &UserId,
    ) -> Result<Conversation, ApiError> {
        let db = self.db.lock().await;

        for user in [sender, recipient] {
            if db.find_user(user)?.is_none() {
                return Err(ApiError::NotFound(format!("no such user: {user}")));
            }
        }

        let id = ConversationId::for_pair(sender, recipient);
        if let Some(existing) = db.find_conversation(&id)? {
            return Ok(existing);
        }

        let conversation = Conversation::between(sender, recipient);
        match db.create_conversation(&conversation) {
            Ok(()) => Ok(conversation),
            Err(StoreError::Duplicate) => {
                debug!(id = %id, "lost conversation-create race, re-fetching");
                db.find_conversation(&id)?
                    .ok_or_else(|| ApiError::NotFound(format!("no such conversation: {id}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch the conversation between the requesting user and a peer.
    pub async fn with_peer(
        &self,
        me: &UserId,
        peer: &UserId,
    ) -> Result<Conversation, ApiError> {
        let db = self.db.lock().await;

        if db.find_user(peer)?.is_none() {
            return Err(ApiError::NotFound(format!("no such user: {peer}")));
        }

        let id = ConversationId::for_pair(me, peer);
        db.find_conversation(&id)?
            .ok_or_else(|| ApiError::NotFound(format!("no such conversation: {id}")))
    }

    /// Fetch a conversation by id, requiring the user to be a participant.
    pub async fn require_membership(
        &self,
        id: &ConversationId,
        user: &UserId,
    ) -> Result<Conversation, ApiError> {
        let db = self.db.lock().await;

        let conversation = db
            .find_conversation(id)?
            .ok_or_else(|| ApiError::NotFound(format!("no such conversation: {id}")))?;

        if !conversation.has_participant(user) {
            return Err(ApiError::Forbidden(format!(
                "{user} is not a participant of {id}"
            )));
        }
        Ok(conversation)
    }
}
