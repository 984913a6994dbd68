//! CRUD operations for [`Group`] records and their membership rows.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use parley_shared::{GroupId, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::Group;

impl Database {
    /// Insert a new group along with its initial members (normally just the
    /// creator). A name collision surfaces as [`StoreError::Duplicate`].
    ///
    /// [`StoreError::Duplicate`]: crate::StoreError::Duplicate
    pub fn create_group(&self, group: &Group) -> Result<()> {
        self.conn().execute(
            "INSERT INTO groups (id, name, description, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                group.id.to_string(),
                group.name,
                group.description,
                group.created_at.to_rfc3339(),
            ],
        )?;

        for member in &group.members {
            self.add_group_member(group.id, member)?;
        }
        Ok(())
    }

    /// Fetch a group with its members, `None` if absent.
    pub fn find_group(&self, id: GroupId) -> Result<Option<Group>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, name, description, created_at
             FROM groups
             WHERE id = ?1",
        )?;

        let mut rows = stmt.query_map(params![id.to_string()], row_to_group)?;
        let Some(group) = rows.next().transpose()? else {
            return Ok(None);
        };

        let mut group = group;
        group.members = self.group_member_ids(id)?;
        Ok(Some(group))
    }

    /// List the groups a user belongs to, with members, newest first.
    pub fn list_groups_for_user(&self, user_id: &UserId) -> Result<Vec<Group>> {
        let mut stmt = self.conn().prepare(
            "SELECT g.id, g.name, g.description, g.created_at
             FROM groups g
             JOIN group_members m ON m.group_id = g.id
             WHERE m.user_id = ?1
             ORDER BY g.created_at DESC",
        )?;

        let rows = stmt.query_map(params![user_id.as_str()], row_to_group)?;

        let mut groups = Vec::new();
        for row in rows {
            let mut group = row?;
            group.members = self.group_member_ids(group.id)?;
            groups.push(group);
        }
        Ok(groups)
    }

    /// List every group, with members, ordered by name.
    pub fn list_groups(&self) -> Result<Vec<Group>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, name, description, created_at
             FROM groups
             ORDER BY name ASC",
        )?;

        let rows = stmt.query_map([], row_to_group)?;

        let mut groups = Vec::new();
        for row in rows {
            let mut group = row?;
            group.members = self.group_member_ids(group.id)?;
            groups.push(group);
        }
        Ok(groups)
    }

    /// Update a group's name and/or description. `None` leaves the field
    /// untouched. Renaming onto another group's name surfaces as
    /// [`StoreError::Duplicate`]; renaming to the group's own current name
    /// is a no-op and succeeds.
    ///
    /// [`StoreError::Duplicate`]: crate::StoreError::Duplicate
    pub fn update_group(
        &self,
        id: GroupId,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE groups
             SET name        = COALESCE(?2, name),
                 description = COALESCE(?3, description)
             WHERE id = ?1",
            params![id.to_string(), name, description],
        )?;
        Ok(())
    }

    /// Add a member. Returns `true` if the row was inserted, `false` if the
    /// user was already a member.
    pub fn add_group_member(&self, id: GroupId, user_id: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT INTO group_members (group_id, user_id)
             VALUES (?1, ?2)
             ON CONFLICT(group_id, user_id) DO NOTHING",
            params![id.to_string(), user_id.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Remove a member. Returns `true` if a row was deleted.
    pub fn remove_group_member(&self, id: GroupId, user_id: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            params![id.to_string(), user_id.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Member ids of a group, unordered.
    pub fn group_member_ids(&self, id: GroupId) -> Result<Vec<UserId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT user_id FROM group_members WHERE group_id = ?1")?;

        let rows = stmt.query_map(params![id.to_string()], |row| {
            row.get::<_, String>(0).map(UserId)
        })?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }
}

/// Map a `rusqlite::Row` to a [`Group`] with an empty member list.
fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    let id_str: String = row.get(0)?;
    let name: String = row.get(1)?;
    let description: String = row.get(2)?;
    let created_str: String = row.get(3)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Group {
        id: GroupId(id),
        name,
        description,
        created_at,
        members: Vec::new(),
    })
}
