//! CRUD operations for [`Message`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use parley_shared::{ConversationId, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::Message;

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, conversation_id, sender_id, contents, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id.to_string(),
                message.conversation_id.as_str(),
                message.sender_id.as_str(),
                message.contents,
                message.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// List a conversation's messages in insertion order, optionally only
    /// those strictly newer than `since`.
    pub fn list_messages(
        &self,
        conversation_id: &ConversationId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        // rowid breaks ties between equal timestamps in insertion order.
        let mut stmt = self.conn().prepare(
            "SELECT id, conversation_id, sender_id, contents, timestamp
             FROM messages
             WHERE conversation_id = ?1
               AND (?2 IS NULL OR timestamp > ?2)
             ORDER BY timestamp ASC, rowid ASC",
        )?;

        let rows = stmt.query_map(
            params![conversation_id.as_str(), since.map(|ts| ts.to_rfc3339())],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Count a conversation's messages, with the same `since` filter as
    /// [`Database::list_messages`].
    pub fn count_messages(
        &self,
        conversation_id: &ConversationId,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*)
             FROM messages
             WHERE conversation_id = ?1
               AND (?2 IS NULL OR timestamp > ?2)",
            params![conversation_id.as_str(), since.map(|ts| ts.to_rfc3339())],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

/// Map a `rusqlite::Row` to a [`Message`].
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let conversation_id: String = row.get(1)?;
    let sender_id: String = row.get(2)?;
    let contents: String = row.get(3)?;
    let ts_str: String = row.get(4)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        id,
        conversation_id: ConversationId(conversation_id),
        sender_id: UserId(sender_id),
        contents,
        timestamp,
    })
}
