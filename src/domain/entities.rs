//! Domain entities mirrored from persistent storage.

use time::OffsetDateTime;

use crate::domain::types::{AccessLevel, GroupId, UserId};

/// Snapshot of one user account as the cache sees it.
///
/// A profile is always resolvable: looking up an unknown or deleted user
/// yields a record with `is_removed = true` rather than an error, matching
/// how the rest of the engine treats vanished accounts.
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfileRecord {
    pub user_id: UserId,
    pub name: String,
    pub email: String,
    pub is_administrator: bool,
    pub is_approved: bool,
    pub email_confirmed: bool,
    pub is_blocked: bool,
    pub unblock_time: Option<OffsetDateTime>,
    pub is_removed: bool,
    pub groups: Vec<GroupId>,
}

impl UserProfileRecord {
    /// Placeholder profile for a user id that no longer resolves.
    pub fn removed(user_id: UserId) -> Self {
        Self {
            user_id,
            name: String::new(),
            email: String::new(),
            is_administrator: false,
            is_approved: false,
            email_confirmed: false,
            is_blocked: false,
            unblock_time: None,
            is_removed: true,
            groups: Vec::new(),
        }
    }
}

/// Site-wide configuration snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteConfigRecord {
    pub site_name: String,
    pub users_can_register: bool,
    pub maintenance: bool,
    /// Access granted when no rule matches anywhere on a node's ancestor
    /// chain.
    pub default_access: AccessLevel,
    pub updated_at: OffsetDateTime,
}
