//! Shared domain enumerations and identifier aliases aligned with persisted
//! database types.

use serde::{Deserialize, Serialize};

/// Monotonic identifier of a persisted change-log record.
pub type RecordId = i64;

/// Identifier of a persisted entity (node, user, group, ...).
pub type EntityId = i64;

/// Identifier of a node in the site structure.
pub type NodeId = i64;

/// Identifier of a registered user.
pub type UserId = i64;

/// Identifier of a user group.
pub type GroupId = i64;

/// Identifier of a site in multi-site deployments.
pub type SiteId = i64;

/// Effective permission tier, declared from most to least privileged.
///
/// The derived ordering carries meaning: smaller is more privileged, so the
/// strongest rule across an ancestor chain is the *minimum* of the
/// applicable levels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "access_level", rename_all = "snake_case")]
pub enum AccessLevel {
    Manage,
    ReadWrite,
    Read,
    NoAccess,
}

/// What happened to a persisted entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "change_kind", rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Updated,
    Removed,
}

/// Stable identifier for an entity kind.
///
/// Collections are both the unit of change notification in the change log
/// and the key cache handlers subscribe under for invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "collection", rename_all = "snake_case")]
pub enum Collection {
    Node,
    NodeAccess,
    User,
    UserGroup,
    UserMembership,
    SiteSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_level_orders_by_privilege() {
        assert!(AccessLevel::Manage < AccessLevel::ReadWrite);
        assert!(AccessLevel::ReadWrite < AccessLevel::Read);
        assert!(AccessLevel::Read < AccessLevel::NoAccess);
    }

    #[test]
    fn most_privileged_is_minimum() {
        let levels = [AccessLevel::Read, AccessLevel::Manage, AccessLevel::NoAccess];
        assert_eq!(levels.iter().min(), Some(&AccessLevel::Manage));
    }
}
