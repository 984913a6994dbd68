//! The group registry service.
//!
//! Groups carry the second notification kind: any membership or metadata
//! change fans out a `group_changed` marker to every member except the one
//! who made the change.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::info;

use parley_shared::api::UpdateGroupRequest;
use parley_shared::{GroupId, UserId};
use parley_store::{Database, Group};

use crate::error::ApiError;
use crate::notifications::NotificationLedger;

#[derive(Clone)]
pub struct GroupRegistry {
    db: Arc<Mutex<Database>>,
    notifications: NotificationLedger,
}

impl GroupRegistry {
    pub fn new(db: Arc<Mutex<Database>>, notifications: NotificationLedger) -> Self {
        Self { db, notifications }
    }

    /// Create a group with the creator as its sole member. A taken name is
    /// a conflict.
    pub async fn create(
        &self,
        creator: &UserId,
        name: &str,
        description: &str,
    ) -> Result<Group, ApiError> {
        if name.is_empty() {
            return Err(ApiError::BadRequest("group name must not be empty".into()));
        }

        let group = Group {
            id: GroupId::new(),
            name: name.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
            members: vec![creator.clone()],
        };

        let db = self.db.lock().await;
        db.create_group(&group)?;

        info!(id = %group.id, name = %group.name, creator = %creator, "group created");
        Ok(group)
    }

    /// Fetch a group, requiring the user to be a member.
    pub async fn fetch_for_member(
        &self,
        id: GroupId,
        user: &UserId,
    ) -> Result<Group, ApiError> {
        let db = self.db.lock().await;
        let group = db
            .find_group(id)?
            .ok_or_else(|| ApiError::NotFound(format!("no such group: {id}")))?;

        if !group.members.contains(user) {
            return Err(ApiError::Forbidden(format!(
                "{user} is not a member of {id}"
            )));
        }
        Ok(group)
    }

    /// Groups the user belongs to.
    pub async fn list_for_user(&self, user: &UserId) -> Result<Vec<Group>, ApiError> {
        let db = self.db.lock().await;
        Ok(db.list_groups_for_user(user)?)
    }

    /// The full directory, for users looking for a group to join.
    pub async fn list_all(&self) -> Result<Vec<Group>, ApiError> {
        let db = self.db.lock().await;
        Ok(db.list_groups()?)
    }

    /// Apply a combined update: rename, re-describe, invite members, or
    /// remove the requesting user themselves.
    ///
    /// Removal is strictly self-service: a removal list naming anyone but
    /// the actor, or more than one user, is a conflict. Renaming onto
    /// another group's name is a conflict; renaming to the current name is
    /// fine. On success every remaining member except the actor gets a
    /// `group_changed` notification.
    pub async fn update(
        &self,
        id: GroupId,
        actor: &UserId,
        request: &UpdateGroupRequest,
    ) -> Result<Group, ApiError> {
        let updated = {
            let db = self.db.lock().await;
            let group = db
                .find_group(id)?
                .ok_or_else(|| ApiError::NotFound(format!("no such group: {id}")))?;

            if !group.members.contains(actor) {
                return Err(ApiError::Forbidden(format!(
                    "{actor} is not a member of {id}"
                )));
            }

            if let Some(remove) = &request.remove {
                let is_self_removal =
                    matches!(remove.as_slice(), [only] if only == actor.as_str());
                if !is_self_removal {
                    return Err(ApiError::Conflict(
                        "members may only remove themselves".into(),
                    ));
                }
            }

            if let Some(invite) = &request.invite {
                for invitee in invite {
                    let invitee = UserId::new(invitee.clone());
                    if db.find_user(&invitee)?.is_none() {
                        return Err(ApiError::NotFound(format!("no such user: {invitee}")));
                    }
                }
            }

            if request.name.is_some() || request.description.is_some() {
                db.update_group(id, request.name.as_deref(), request.description.as_deref())?;
            }

            if let Some(invite) = &request.invite {
                for invitee in invite {
                    db.add_group_member(id, &UserId::new(invitee.clone()))?;
                }
            }

            if request.remove.is_some() {
                db.remove_group_member(id, actor)?;
            }

            db.find_group(id)?
                .ok_or_else(|| ApiError::NotFound(format!("no such group: {id}")))?
        };

        self.notifications
            .record_group_changed(&updated, actor, Utc::now())
            .await;

        info!(id = %id, actor = %actor, "group updated");
        Ok(updated)
    }

    /// Add the requesting user to a group. Already being a member is a
    /// quiet success and notifies nobody.
    pub async fn join(&self, id: GroupId, user: &UserId) -> Result<Group, ApiError> {
        let (group, newly_joined) = {
            let db = self.db.lock().await;
            if db.find_group(id)?.is_none() {
                return Err(ApiError::NotFound(format!("no such group: {id}")));
            }

            let newly_joined = db.add_group_member(id, user)?;
            let group = db
                .find_group(id)?
                .ok_or_else(|| ApiError::NotFound(format!("no such group: {id}")))?;
            (group, newly_joined)
        };

        if newly_joined {
            self.notifications
                .record_group_changed(&group, user, Utc::now())
                .await;
            info!(id = %id, user = %user, "user joined group");
        }
        Ok(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::NotificationKind;
    use parley_store::User;

    struct Fixture {
        _dir: tempfile::TempDir,
        registry: GroupRegistry,
        notifications: NotificationLedger,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        for id in ["bob", "charlie", "dora"] {
            db.upsert_user(&User {
                id: UserId::from(id),
                display_name: id.to_string(),
                avatar_url: None,
                created_at: Utc::now(),
            })
            .unwrap();
        }
        let db = Arc::new(Mutex::new(db));
        let notifications = NotificationLedger::new(db.clone());
        let registry = GroupRegistry::new(db, notifications.clone());
        Fixture {
            _dir: dir,
            registry,
            notifications,
        }
    }

    fn invite(users: &[&str]) -> UpdateGroupRequest {
        UpdateGroupRequest {
            invite: Some(users.iter().map(|u| u.to_string()).collect()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_makes_creator_sole_member() {
        let f = fixture().await;
        let group = f
            .registry
            .create(&UserId::from("bob"), "rustaceans", "talk")
            .await
            .unwrap();
        assert_eq!(group.members, vec![UserId::from("bob")]);
    }

    #[tokio::test]
    async fn duplicate_name_conflicts() {
        let f = fixture().await;
        f.registry
            .create(&UserId::from("bob"), "rustaceans", "")
            .await
            .unwrap();

        let err = f
            .registry
            .create(&UserId::from("charlie"), "rustaceans", "")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn invite_notifies_everyone_but_actor() {
        let f = fixture().await;
        let bob = UserId::from("bob");
        let group = f.registry.create(&bob, "rustaceans", "").await.unwrap();

        let updated = f
            .registry
            .update(group.id, &bob, &invite(&["charlie", "dora"]))
            .await
            .unwrap();
        assert_eq!(updated.members.len(), 3);

        assert!(f.notifications.list_for_user(&bob).await.unwrap().is_empty());
        for member in ["charlie", "dora"] {
            let entries = f
                .notifications
                .list_for_user(&UserId::from(member))
                .await
                .unwrap();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].kind, NotificationKind::GroupChanged);
            assert_eq!(entries[0].topic_id, group.id.to_string());
        }
    }

    #[tokio::test]
    async fn inviting_unknown_user_is_not_found() {
        let f = fixture().await;
        let bob = UserId::from("bob");
        let group = f.registry.create(&bob, "rustaceans", "").await.unwrap();

        let err = f
            .registry
            .update(group.id, &bob, &invite(&["ghost"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn removal_is_self_service_only() {
        let f = fixture().await;
        let bob = UserId::from("bob");
        let group = f.registry.create(&bob, "rustaceans", "").await.unwrap();
        f.registry
            .update(group.id, &bob, &invite(&["charlie"]))
            .await
            .unwrap();

        // Removing someone else is a conflict.
        let remove_other = UpdateGroupRequest {
            remove: Some(vec!["charlie".into()]),
            ..Default::default()
        };
        let err = f
            .registry
            .update(group.id, &bob, &remove_other)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        // So is removing more than one user, even when self is included.
        let remove_many = UpdateGroupRequest {
            remove: Some(vec!["bob".into(), "charlie".into()]),
            ..Default::default()
        };
        let err = f
            .registry
            .update(group.id, &bob, &remove_many)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        // Removing exactly yourself succeeds.
        let remove_self = UpdateGroupRequest {
            remove: Some(vec!["bob".into()]),
            ..Default::default()
        };
        let updated = f.registry.update(group.id, &bob, &remove_self).await.unwrap();
        assert_eq!(updated.members, vec![UserId::from("charlie")]);
    }

    #[tokio::test]
    async fn rename_rules() {
        let f = fixture().await;
        let bob = UserId::from("bob");
        let first = f.registry.create(&bob, "first", "").await.unwrap();
        let second = f.registry.create(&bob, "second", "").await.unwrap();

        let rename = |name: &str| UpdateGroupRequest {
            name: Some(name.to_string()),
            ..Default::default()
        };

        let err = f
            .registry
            .update(second.id, &bob, &rename("first"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        // Renaming to its own name succeeds.
        let same = f
            .registry
            .update(second.id, &bob, &rename("second"))
            .await
            .unwrap();
        assert_eq!(same.name, "second");
        let _ = first;
    }

    #[tokio::test]
    async fn join_and_rejoin() {
        let f = fixture().await;
        let bob = UserId::from("bob");
        let charlie = UserId::from("charlie");
        let group = f.registry.create(&bob, "rustaceans", "").await.unwrap();

        let joined = f.registry.join(group.id, &charlie).await.unwrap();
        assert_eq!(joined.members.len(), 2);
        // The existing member is told, the joiner is not.
        assert_eq!(f.notifications.list_for_user(&bob).await.unwrap().len(), 1);
        assert!(f
            .notifications
            .list_for_user(&charlie)
            .await
            .unwrap()
            .is_empty());

        // Re-joining is a quiet no-op: membership and ledger are unchanged.
        let again = f.registry.join(group.id, &charlie).await.unwrap();
        assert_eq!(again.members.len(), 2);
        let entries = f.notifications.list_for_user(&bob).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn non_member_cannot_update() {
        let f = fixture().await;
        let group = f
            .registry
            .create(&UserId::from("bob"), "rustaceans", "")
            .await
            .unwrap();

        let err = f
            .registry
            .update(group.id, &UserId::from("dora"), &invite(&["charlie"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }
}
