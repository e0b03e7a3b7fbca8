//! Ownership checks for queue-delivered work.
//!
//! Webhook handling resolves users from the platform-signed envelope, but a
//! queued job carries identifiers chosen when it was enqueued (or forged, if
//! the queue endpoint is ever reachable with a leaked token). Every worker
//! invocation therefore re-proves that the claimed channel identity and the
//! claimed internal id name the same live user before touching their rows.

use async_trait::async_trait;
use uuid::Uuid;

use crate::db::Store;
use crate::error::{AuthError, Error, Result, StoreError};
use crate::model::{User, UserStatus};

/// The lookups ownership verification needs. [`Store`] implements this
/// against Postgres; tests substitute an in-memory map.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn user_by_channel_id(
        &self,
        channel_user_id: &str,
    ) -> std::result::Result<Option<User>, StoreError>;
    async fn task_owner(&self, task_id: Uuid) -> std::result::Result<Option<Uuid>, StoreError>;
    async fn profile_owner(
        &self,
        profile_id: Uuid,
    ) -> std::result::Result<Option<Uuid>, StoreError>;
}

#[async_trait]
impl IdentityStore for Store {
    async fn user_by_channel_id(
        &self,
        channel_user_id: &str,
    ) -> std::result::Result<Option<User>, StoreError> {
        Store::user_by_channel_id(self, channel_user_id).await
    }

    async fn task_owner(&self, task_id: Uuid) -> std::result::Result<Option<Uuid>, StoreError> {
        Store::task_owner(self, task_id).await
    }

    async fn profile_owner(
        &self,
        profile_id: Uuid,
    ) -> std::result::Result<Option<Uuid>, StoreError> {
        Store::profile_owner(self, profile_id).await
    }
}

/// Resources whose rows carry an owning user id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnedResource {
    Task(Uuid),
    Profile(Uuid),
}

impl OwnedResource {
    fn entity(&self) -> &'static str {
        match self {
            OwnedResource::Task(_) => "task",
            OwnedResource::Profile(_) => "profile",
        }
    }

    fn id(&self) -> Uuid {
        match self {
            OwnedResource::Task(id) | OwnedResource::Profile(id) => *id,
        }
    }
}

pub struct OwnershipGuard<S> {
    store: S,
}

impl<S: IdentityStore> OwnershipGuard<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Resolve the channel identity and require that it maps to the claimed
    /// internal id. Returns the verified user so callers never re-fetch by
    /// the unverified id.
    pub async fn verify_identity(
        &self,
        claimed_channel_id: &str,
        claimed_user_id: Uuid,
    ) -> Result<User> {
        let user = self
            .store
            .user_by_channel_id(claimed_channel_id)
            .await?
            .ok_or_else(|| AuthError::UnknownUser {
                user_id: claimed_channel_id.to_string(),
            })?;
        if user.id != claimed_user_id {
            tracing::warn!(
                claimed = %claimed_user_id,
                resolved = %user.id,
                "identity mismatch on queued job"
            );
            return Err(Error::Auth(AuthError::IdentityMismatch {
                user_id: claimed_user_id.to_string(),
            }));
        }
        if user.status != UserStatus::Active {
            return Err(Error::Auth(AuthError::Suspended {
                user_id: user.id.to_string(),
            }));
        }
        Ok(user)
    }

    /// Require that the resource row exists, is live, and belongs to the
    /// already-verified user.
    pub async fn verify_resource_ownership(
        &self,
        user_id: Uuid,
        resource: OwnedResource,
    ) -> Result<()> {
        let owner = match resource {
            OwnedResource::Task(id) => self.store.task_owner(id).await?,
            OwnedResource::Profile(id) => self.store.profile_owner(id).await?,
        };
        match owner {
            Some(owner_id) if owner_id == user_id => Ok(()),
            Some(_) => {
                tracing::warn!(user = %user_id, ?resource, "resource owned by another user");
                Err(Error::Auth(AuthError::NotOwner {
                    entity: resource.entity(),
                    id: resource.id().to_string(),
                }))
            }
            None => Err(Error::Auth(AuthError::NotOwner {
                entity: resource.entity(),
                id: resource.id().to_string(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use super::*;

    struct FakeIdentities {
        users: HashMap<String, User>,
        task_owners: HashMap<Uuid, Uuid>,
    }

    fn user(channel_id: &str, status: UserStatus) -> User {
        User {
            id: Uuid::new_v4(),
            channel_user_id: channel_id.to_string(),
            status,
            is_deleted: false,
            created_at: Utc::now(),
            last_contact_at: Some(Utc::now()),
        }
    }

    #[async_trait]
    impl IdentityStore for FakeIdentities {
        async fn user_by_channel_id(
            &self,
            channel_user_id: &str,
        ) -> std::result::Result<Option<User>, StoreError> {
            Ok(self.users.get(channel_user_id).cloned())
        }

        async fn task_owner(
            &self,
            task_id: Uuid,
        ) -> std::result::Result<Option<Uuid>, StoreError> {
            Ok(self.task_owners.get(&task_id).copied())
        }

        async fn profile_owner(
            &self,
            _profile_id: Uuid,
        ) -> std::result::Result<Option<Uuid>, StoreError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn matching_identity_passes() {
        let alice = user("U-alice", UserStatus::Active);
        let guard = OwnershipGuard::new(FakeIdentities {
            users: HashMap::from([("U-alice".to_string(), alice.clone())]),
            task_owners: HashMap::new(),
        });

        let verified = guard.verify_identity("U-alice", alice.id).await.unwrap();
        assert_eq!(verified.id, alice.id);
    }

    #[tokio::test]
    async fn mismatched_internal_id_is_rejected() {
        let alice = user("U-alice", UserStatus::Active);
        let guard = OwnershipGuard::new(FakeIdentities {
            users: HashMap::from([("U-alice".to_string(), alice)]),
            task_owners: HashMap::new(),
        });

        let err = guard
            .verify_identity("U-alice", Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Auth(AuthError::IdentityMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_channel_identity_is_rejected() {
        let guard = OwnershipGuard::new(FakeIdentities {
            users: HashMap::new(),
            task_owners: HashMap::new(),
        });

        let err = guard
            .verify_identity("U-ghost", Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::UnknownUser { .. })));
    }

    #[tokio::test]
    async fn suspended_user_is_rejected() {
        let bob = user("U-bob", UserStatus::Suspended);
        let guard = OwnershipGuard::new(FakeIdentities {
            users: HashMap::from([("U-bob".to_string(), bob.clone())]),
            task_owners: HashMap::new(),
        });

        let err = guard.verify_identity("U-bob", bob.id).await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::Suspended { .. })));
    }

    #[tokio::test]
    async fn foreign_task_is_not_owned() {
        let alice = user("U-alice", UserStatus::Active);
        let task_id = Uuid::new_v4();
        let guard = OwnershipGuard::new(FakeIdentities {
            users: HashMap::from([("U-alice".to_string(), alice.clone())]),
            task_owners: HashMap::from([(task_id, Uuid::new_v4())]),
        });

        let err = guard
            .verify_resource_ownership(alice.id, OwnedResource::Task(task_id))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::NotOwner { .. })));
    }

    #[tokio::test]
    async fn own_task_passes() {
        let alice = user("U-alice", UserStatus::Active);
        let task_id = Uuid::new_v4();
        let guard = OwnershipGuard::new(FakeIdentities {
            users: HashMap::from([("U-alice".to_string(), alice.clone())]),
            task_owners: HashMap::from([(task_id, alice.id)]),
        });

        guard
            .verify_resource_ownership(alice.id, OwnedResource::Task(task_id))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_task_is_not_owned() {
        let alice = user("U-alice", UserStatus::Active);
        let guard = OwnershipGuard::new(FakeIdentities {
            users: HashMap::from([("U-alice".to_string(), alice.clone())]),
            task_owners: HashMap::new(),
        });

        let err = guard
            .verify_resource_ownership(alice.id, OwnedResource::Task(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::NotOwner { .. })));
    }
}
