//! CRUD operations for [`User`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;

use parley_shared::UserId;

use crate::database::Database;
use crate::error::Result;
use crate::models::User;

impl Database {
    /// Insert a user, or refresh the profile fields if the id already
    /// exists. External authentication is the only writer here, so a repeat
    /// login simply updates the display name and avatar.
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, display_name, avatar_url, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 avatar_url   = excluded.avatar_url",
            params![
                user.id.as_str(),
                user.display_name,
                user.avatar_url,
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a single user, `None` if unknown.
    pub fn find_user(&self, id: &UserId) -> Result<Option<User>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, display_name, avatar_url, created_at
             FROM users
             WHERE id = ?1",
        )?;

        let mut rows = stmt.query_map(params![id.as_str()], row_to_user)?;
        rows.next().transpose().map_err(Into::into)
    }

    /// List every registered user, ordered by display name.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, display_name, avatar_url, created_at
             FROM users
             ORDER BY display_name ASC",
        )?;

        let rows = stmt.query_map([], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }
}

/// Map a `rusqlite::Row` to a [`User`].
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let display_name: String = row.get(1)?;
    let avatar_url: Option<String> = row.get(2)?;
    let created_str: String = row.get(3)?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(User {
        id: UserId(id),
        display_name,
        avatar_url,
        created_at,
    })
}
