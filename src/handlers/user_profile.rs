//! Per-user profile cache handler.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::application::repos::{RepoError, UsersRepo};
use crate::cache::CacheHandler;
use crate::domain::access::PrincipalContext;
use crate::domain::entities::UserProfileRecord;
use crate::domain::types::{ChangeKind, Collection, EntityId};

const HANDLED: &[Collection] = &[
    Collection::User,
    Collection::UserGroup,
    Collection::UserMembership,
];

/// Snapshot of one user account, keyed by user id.
///
/// A change to the user row expires only the matching profile; group and
/// membership changes expire every profile, since memberships feed the
/// principal's group list. Profiles also carry a time-to-live so that a
/// missed invalidation cannot pin a stale profile forever.
pub struct UserProfileCache {
    repo: Arc<dyn UsersRepo>,
    ttl: Duration,
    built_at: Instant,
    profile: UserProfileRecord,
}

impl UserProfileCache {
    pub fn new(repo: Arc<dyn UsersRepo>, ttl: Duration) -> Self {
        Self {
            repo,
            ttl,
            built_at: Instant::now(),
            profile: UserProfileRecord::removed(0),
        }
    }

    pub fn profile(&self) -> &UserProfileRecord {
        &self.profile
    }

    /// Project the profile into the context the access resolver consumes.
    ///
    /// A removed profile projects as anonymous-shaped (no user id, no
    /// groups), so a vanished account loses its personal and group grants
    /// without special-casing at call sites.
    pub fn principal(&self) -> PrincipalContext {
        if self.profile.is_removed {
            return PrincipalContext {
                user_id: None,
                groups: Vec::new(),
                is_administrator: false,
                is_approved: false,
                is_email_confirmed: false,
            };
        }
        PrincipalContext {
            user_id: Some(self.profile.user_id),
            groups: self.profile.groups.clone(),
            is_administrator: self.profile.is_administrator,
            is_approved: self.profile.is_approved,
            is_email_confirmed: self.profile.email_confirmed,
        }
    }
}

#[async_trait]
impl CacheHandler for UserProfileCache {
    async fn initialize(&mut self, object_id: Option<EntityId>) -> Result<(), RepoError> {
        let user_id = object_id
            .ok_or_else(|| RepoError::invalid_input("user profile cache requires a user id"))?;
        self.profile = match self.repo.load_profile(user_id).await? {
            Some(profile) => profile,
            None => UserProfileRecord::removed(user_id),
        };
        self.built_at = Instant::now();
        Ok(())
    }

    fn handled_collections(&self) -> &[Collection] {
        HANDLED
    }

    fn expires(&self, collection: Collection, entity_id: EntityId, _kind: ChangeKind) -> bool {
        match collection {
            Collection::User => entity_id == self.profile.user_id,
            Collection::UserGroup | Collection::UserMembership => true,
            _ => false,
        }
    }

    fn expired(&self) -> bool {
        self.built_at.elapsed() >= self.ttl
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::memory::MemoryUsers;

    fn sample_profile(user_id: i64) -> UserProfileRecord {
        UserProfileRecord {
            user_id,
            name: "Ada".to_string(),
            email: "ada@example.org".to_string(),
            is_administrator: false,
            is_approved: true,
            email_confirmed: true,
            is_blocked: false,
            unblock_time: None,
            is_removed: false,
            groups: vec![7, 9],
        }
    }

    #[tokio::test]
    async fn initialize_requires_a_user_id() {
        let repo = Arc::new(MemoryUsers::new());
        let mut cache = UserProfileCache::new(repo, Duration::from_secs(900));
        assert!(cache.initialize(None).await.is_err());
    }

    #[tokio::test]
    async fn loads_profile_and_projects_principal() {
        let repo = Arc::new(MemoryUsers::new());
        repo.insert_profile(sample_profile(42));

        let mut cache = UserProfileCache::new(repo, Duration::from_secs(900));
        cache.initialize(Some(42)).await.expect("initializes");

        let principal = cache.principal();
        assert_eq!(principal.user_id, Some(42));
        assert_eq!(principal.groups, vec![7, 9]);
        assert!(principal.is_approved);
    }

    #[tokio::test]
    async fn unknown_user_becomes_removed_profile() {
        let repo = Arc::new(MemoryUsers::new());
        let mut cache = UserProfileCache::new(repo, Duration::from_secs(900));
        cache.initialize(Some(77)).await.expect("initializes");

        assert!(cache.profile().is_removed);
        assert_eq!(cache.principal().user_id, None);
    }

    #[tokio::test]
    async fn expires_only_for_matching_user_row() {
        let repo = Arc::new(MemoryUsers::new());
        repo.insert_profile(sample_profile(42));

        let mut cache = UserProfileCache::new(repo, Duration::from_secs(900));
        cache.initialize(Some(42)).await.expect("initializes");

        assert!(cache.expires(Collection::User, 42, ChangeKind::Updated));
        assert!(!cache.expires(Collection::User, 43, ChangeKind::Updated));
        assert!(cache.expires(Collection::UserGroup, 1, ChangeKind::Added));
        assert!(cache.expires(Collection::UserMembership, 42, ChangeKind::Removed));
        assert!(!cache.expires(Collection::Node, 42, ChangeKind::Updated));
    }

    #[tokio::test]
    async fn zero_ttl_reports_expired() {
        let repo = Arc::new(MemoryUsers::new());
        repo.insert_profile(sample_profile(42));

        let mut cache = UserProfileCache::new(repo, Duration::ZERO);
        cache.initialize(Some(42)).await.expect("initializes");
        assert!(cache.expired());
    }
}
