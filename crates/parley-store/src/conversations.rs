//! CRUD operations for [`Conversation`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;

use parley_shared::{ConversationId, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::Conversation;

impl Database {
    /// Insert a new conversation.
    ///
    /// Returns [`StoreError::Duplicate`] when a record with the same
    /// canonical id already exists -- the caller treats that as "already
    /// created by the other participant" and re-fetches.
    ///
    /// [`StoreError::Duplicate`]: crate::StoreError::Duplicate
    pub fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.conn().execute(
            "INSERT INTO conversations (id, participant_low, participant_high, last_timestamp)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                conversation.id.as_str(),
                conversation.participants[0].as_str(),
                conversation.participants[1].as_str(),
                conversation.last_timestamp.map(|ts| ts.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Fetch a conversation by canonical id, `None` if absent.
    pub fn find_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, participant_low, participant_high, last_timestamp
             FROM conversations
             WHERE id = ?1",
        )?;

        let mut rows = stmt.query_map(params![id.as_str()], row_to_conversation)?;
        rows.next().transpose().map_err(Into::into)
    }

    /// Bump a conversation's last-activity timestamp.
    pub fn touch_conversation(
        &self,
        id: &ConversationId,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE conversations SET last_timestamp = ?2 WHERE id = ?1",
            params![id.as_str(), timestamp.to_rfc3339()],
        )?;
        Ok(())
    }
}

/// Map a `rusqlite::Row` to a [`Conversation`].
fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let id: String = row.get(0)?;
    let low: String = row.get(1)?;
    let high: String = row.get(2)?;
    let last_str: Option<String> = row.get(3)?;

    let last_timestamp = last_str
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        3,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })
        })
        .transpose()?;

    Ok(Conversation {
        id: ConversationId(id),
        participants: [UserId(low), UserId(high)],
        last_timestamp,
    })
}
