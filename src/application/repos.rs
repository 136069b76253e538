//! Repository traits describing persistence adapters.
//!
//! The cache core never talks to storage directly; everything it reads or
//! appends goes through these traits. `infra::db` implements them over
//! Postgres and `infra::memory` implements them in process.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::changes::{ChangeRecord, NewChange};
use crate::domain::entities::{SiteConfigRecord, UserProfileRecord};
use crate::domain::nodes::{AccessRuleRecord, NodeRecord};
use crate::domain::types::{RecordId, UserId};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
    #[error("change notifications unavailable: {message}")]
    NotificationsUnavailable { message: String },
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }
}

/// Durable, strictly-increasing-id append log of change records.
#[async_trait]
pub trait ChangeLogRepo: Send + Sync {
    /// Append a change and return the allocated record id.
    async fn append(&self, change: NewChange) -> Result<RecordId, RepoError>;

    /// Records with id strictly greater than `after`, ascending by id.
    async fn query_after(&self, after: RecordId) -> Result<Vec<ChangeRecord>, RepoError>;

    /// Highest allocated record id, `None` while the log is empty.
    async fn max_id(&self) -> Result<Option<RecordId>, RepoError>;
}

/// Push-style change notification channel.
///
/// A wake-up on the receiver means "something was appended, poll the log";
/// the channel intentionally carries no payload, deduplication and ordering
/// happen against the log itself. Backends that cannot push return
/// [`RepoError::NotificationsUnavailable`] and the tracker falls back to
/// polling.
#[async_trait]
pub trait ChangeSignal: Send + Sync {
    async fn listen(&self) -> Result<mpsc::UnboundedReceiver<()>, RepoError>;
}

/// Source of truth for the site structure.
#[async_trait]
pub trait NodesRepo: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>, RepoError>;

    async fn list_access_rules(&self) -> Result<Vec<AccessRuleRecord>, RepoError>;
}

/// Source of truth for user accounts and their group memberships.
#[async_trait]
pub trait UsersRepo: Send + Sync {
    /// `None` when the user id does not resolve (deleted or never existed).
    async fn load_profile(&self, user_id: UserId) -> Result<Option<UserProfileRecord>, RepoError>;
}

/// Source of truth for site-wide configuration.
#[async_trait]
pub trait SettingsRepo: Send + Sync {
    async fn load_site_config(&self) -> Result<SiteConfigRecord, RepoError>;
}
