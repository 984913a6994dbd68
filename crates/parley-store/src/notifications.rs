//! CRUD operations for [`Notification`] records.
//!
//! The write path here is the only place in the system with real write
//! contention (many senders notifying the same recipient), so every
//! mutation is a single SQL statement against the
//! `(user_id, kind, topic_id)` unique index. There is no read-modify-write
//! anywhere in this module.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use parley_shared::{NotificationKind, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::Notification;

impl Database {
    /// Upsert the unread-messages entry for one recipient.
    ///
    /// First write creates the record with `message_count = 1`; every
    /// subsequent write for the same key increments the counter by exactly
    /// one and overwrites `since` / `other_id` with the latest message's
    /// timestamp and counterpart.
    pub fn upsert_message_notification(
        &self,
        user_id: &UserId,
        conversation_id: &str,
        since: DateTime<Utc>,
        other_id: &UserId,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO notifications
                 (id, user_id, kind, topic_id, since, other_id, message_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)
             ON CONFLICT(user_id, kind, topic_id) DO UPDATE SET
                 message_count = message_count + 1,
                 since         = excluded.since,
                 other_id      = excluded.other_id",
            params![
                Uuid::new_v4().to_string(),
                user_id.as_str(),
                NotificationKind::NewMessages.as_str(),
                conversation_id,
                since.to_rfc3339(),
                other_id.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Upsert the group-changed entry for one member. Overwrite-only: the
    /// record's presence is the signal, there is no counter.
    pub fn upsert_group_notification(
        &self,
        user_id: &UserId,
        group_id: &str,
        since: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO notifications
                 (id, user_id, kind, topic_id, since, other_id, message_count)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL)
             ON CONFLICT(user_id, kind, topic_id) DO UPDATE SET
                 since = excluded.since",
            params![
                Uuid::new_v4().to_string(),
                user_id.as_str(),
                NotificationKind::GroupChanged.as_str(),
                group_id,
                since.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// List every current notification for a user.
    pub fn list_notifications(&self, user_id: &UserId) -> Result<Vec<Notification>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, user_id, kind, topic_id, since, other_id, message_count
             FROM notifications
             WHERE user_id = ?1
             ORDER BY since DESC",
        )?;

        let rows = stmt.query_map(params![user_id.as_str()], row_to_notification)?;

        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row?);
        }
        Ok(notifications)
    }

    /// Fetch a single ledger entry by its logical key, `None` if absent.
    pub fn find_notification(
        &self,
        user_id: &UserId,
        kind: NotificationKind,
        topic_id: &str,
    ) -> Result<Option<Notification>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, user_id, kind, topic_id, since, other_id, message_count
             FROM notifications
             WHERE user_id = ?1 AND kind = ?2 AND topic_id = ?3",
        )?;

        let mut rows = stmt.query_map(
            params![user_id.as_str(), kind.as_str(), topic_id],
            row_to_notification,
        )?;
        rows.next().transpose().map_err(Into::into)
    }

    /// Delete the ledger entry for one topic. Returns the number of rows
    /// removed (0 or 1).
    pub fn clear_notification(
        &self,
        user_id: &UserId,
        kind: NotificationKind,
        topic_id: &str,
    ) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM notifications
             WHERE user_id = ?1 AND kind = ?2 AND topic_id = ?3",
            params![user_id.as_str(), kind.as_str(), topic_id],
        )?;
        Ok(affected)
    }

    /// Delete the ledger entries for a set of topics at once (e.g. every
    /// group the user just listed). Returns the number of rows removed.
    pub fn clear_notifications(
        &self,
        user_id: &UserId,
        kind: NotificationKind,
        topic_ids: &[String],
    ) -> Result<usize> {
        if topic_ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; topic_ids.len()].join(", ");
        let sql = format!(
            "DELETE FROM notifications
             WHERE user_id = ? AND kind = ? AND topic_id IN ({placeholders})"
        );

        let mut args: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(topic_ids.len() + 2);
        let user = user_id.as_str();
        let kind = kind.as_str();
        args.push(&user);
        args.push(&kind);
        for topic in topic_ids {
            args.push(topic);
        }

        let affected = self.conn().execute(&sql, args.as_slice())?;
        Ok(affected)
    }
}

/// Map a `rusqlite::Row` to a [`Notification`].
fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let id_str: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let kind_str: String = row.get(2)?;
    let topic_id: String = row.get(3)?;
    let since_str: String = row.get(4)?;
    let other_id: Option<String> = row.get(5)?;
    let message_count: Option<i64> = row.get(6)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let kind = NotificationKind::from_str(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown notification kind: {kind_str}").into(),
        )
    })?;

    let since: DateTime<Utc> = DateTime::parse_from_rfc3339(&since_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Notification {
        id,
        user_id: UserId(user_id),
        kind,
        topic_id,
        since,
        other_id: other_id.map(UserId),
        message_count,
    })
}
