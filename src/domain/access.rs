//! Hierarchical access resolution over a node-tree snapshot.
//!
//! Pure functions only: the caller supplies the snapshot and the principal,
//! and concurrent resolution against the same published tree needs no
//! locking.

use super::nodes::{NodeInfo, NodeTree, RulePrincipal};
use super::types::{AccessLevel, GroupId, UserId};

/// The identity evaluated against node access rules, supplied by the host
/// per request.
#[derive(Debug, Clone, Default)]
pub struct PrincipalContext {
    pub user_id: Option<UserId>,
    pub groups: Vec<GroupId>,
    pub is_administrator: bool,
    pub is_approved: bool,
    pub is_email_confirmed: bool,
}

impl PrincipalContext {
    /// Anonymous visitor. The approval flags are set so that rules alone
    /// decide the outcome; hosts that gate anonymous access differently
    /// build the context themselves.
    pub fn anonymous() -> Self {
        Self {
            user_id: None,
            groups: Vec::new(),
            is_administrator: false,
            is_approved: true,
            is_email_confirmed: true,
        }
    }

    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            groups: Vec::new(),
            is_administrator: false,
            is_approved: true,
            is_email_confirmed: true,
        }
    }

    pub fn in_groups(mut self, groups: Vec<GroupId>) -> Self {
        self.groups = groups;
        self
    }
}

/// Resolve the effective access level for `node` and `principal`.
///
/// Administrators always resolve to [`AccessLevel::Manage`]. Otherwise the
/// whole ancestor chain is walked and the result is the most privileged
/// (numerically minimum) level among every applicable rule on every visited
/// node; `default_access` applies only when no rule matched anywhere.
///
/// The global minimum means a permissive rule on a distant ancestor grants
/// access that a stricter rule on a closer node does not revoke. That is
/// inherited behavior, kept as-is; most hierarchical ACL systems resolve
/// nearest-ancestor-wins instead, so treat any change here as a breaking
/// semantic change and update the tests that pin it.
///
/// A rule-derived level other than [`AccessLevel::NoAccess`] is downgraded
/// to [`AccessLevel::Read`] when the principal is unapproved or has an
/// unconfirmed email address. The downgrade never applies to the
/// `default_access` fall-through.
pub fn resolve_access(
    tree: &NodeTree,
    node: &NodeInfo,
    principal: &PrincipalContext,
    default_access: AccessLevel,
) -> AccessLevel {
    if principal.is_administrator {
        return AccessLevel::Manage;
    }

    let mut found: Option<AccessLevel> = None;
    let mut current = Some(node);
    while let Some(visited) = current {
        if let Some(best) = best_applicable(visited, principal) {
            found = Some(match found {
                Some(level) => level.min(best),
                None => best,
            });
        }
        current = tree.parent_of(visited);
    }

    match found {
        Some(level)
            if level != AccessLevel::NoAccess
                && (!principal.is_approved || !principal.is_email_confirmed) =>
        {
            AccessLevel::Read
        }
        Some(level) => level,
        None => default_access,
    }
}

/// The most privileged rule on `node` that applies to `principal`, if any.
fn best_applicable(node: &NodeInfo, principal: &PrincipalContext) -> Option<AccessLevel> {
    node.access_rules
        .iter()
        .filter(|rule| applies_to(rule.principal, principal))
        .map(|rule| rule.level)
        .min()
}

/// Everyone rules match anonymous requests only; user and group rules never
/// match an anonymous principal.
fn applies_to(rule: RulePrincipal, principal: &PrincipalContext) -> bool {
    let Some(user_id) = principal.user_id else {
        return rule == RulePrincipal::Everyone;
    };
    match rule {
        RulePrincipal::User(rule_user) => rule_user == user_id,
        RulePrincipal::Group(rule_group) => principal.groups.contains(&rule_group),
        RulePrincipal::Everyone => false,
    }
}
