//! Immutable node-tree snapshots.
//!
//! Flat node and access-rule rows come from the nodes repository;
//! [`NodeTree::build`] assembles them into an arena addressed by index, with
//! parents and children stored as indices and full paths precomputed. A
//! snapshot is never mutated after publication. Rebuilding means building a
//! new tree and replacing the cache entry that owns it, so concurrent
//! readers always see a complete tree.

use std::collections::{HashMap, HashSet, VecDeque};

use super::error::DomainError;
use super::types::{AccessLevel, GroupId, NodeId, UserId};

/// Flat node row as stored.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub node_id: NodeId,
    pub parent_id: Option<NodeId>,
    pub order: i32,
    pub title: String,
    /// Path segment relative to the parent node.
    pub path: String,
    pub handler_id: String,
    pub enabled: bool,
    pub visible: bool,
    pub add_to_menu: bool,
}

/// Access rule row attached to a node.
#[derive(Debug, Clone)]
pub struct AccessRuleRecord {
    pub node_id: NodeId,
    pub user_id: Option<UserId>,
    pub group_id: Option<GroupId>,
    pub level: AccessLevel,
}

/// Who an access rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RulePrincipal {
    User(UserId),
    Group(GroupId),
    /// Matches anonymous requests only; a signed-in user never matches an
    /// everyone rule.
    Everyone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRule {
    pub principal: RulePrincipal,
    pub level: AccessLevel,
}

impl AccessRule {
    /// A row naming both a user and a group is a user rule; the user column
    /// wins.
    fn from_record(record: &AccessRuleRecord) -> Self {
        let principal = match (record.user_id, record.group_id) {
            (Some(user_id), _) => RulePrincipal::User(user_id),
            (None, Some(group_id)) => RulePrincipal::Group(group_id),
            (None, None) => RulePrincipal::Everyone,
        };
        Self {
            principal,
            level: record.level,
        }
    }
}

/// A node in a published snapshot. `parent` and `children` are arena
/// indices into the owning [`NodeTree`].
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub node_id: NodeId,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub order: i32,
    pub title: String,
    pub path: String,
    /// Slash-joined path from the root; empty for the root itself.
    pub full_path: String,
    pub handler_id: String,
    pub visible: bool,
    pub add_to_menu: bool,
    pub level: usize,
    pub access_rules: Vec<AccessRule>,
}

#[derive(Debug, Clone)]
enum Placement {
    InProgress,
    Dropped,
    Kept,
}

/// An immutable arena of [`NodeInfo`] nodes.
#[derive(Debug, Clone, Default)]
pub struct NodeTree {
    nodes: Vec<NodeInfo>,
    by_id: HashMap<NodeId, usize>,
    root: Option<usize>,
}

impl NodeTree {
    /// Assemble a snapshot from flat rows.
    ///
    /// Disabled nodes and their entire subtrees are dropped. A node whose
    /// parent id resolves to nothing at all is kept as an unreachable
    /// orphan: it can still be looked up by id, and an ancestor walk
    /// starting there simply terminates at the node.
    pub fn build(
        records: Vec<NodeRecord>,
        rules: Vec<AccessRuleRecord>,
    ) -> Result<Self, DomainError> {
        let mut all_ids = HashSet::new();
        for record in &records {
            if !all_ids.insert(record.node_id) {
                return Err(DomainError::invariant(format!(
                    "duplicate node id {}",
                    record.node_id
                )));
            }
        }

        let mut rules_by_node: HashMap<NodeId, Vec<AccessRule>> = HashMap::new();
        for rule in &rules {
            rules_by_node
                .entry(rule.node_id)
                .or_default()
                .push(AccessRule::from_record(rule));
        }

        let enabled: HashMap<NodeId, NodeRecord> = records
            .into_iter()
            .filter(|record| record.enabled)
            .map(|record| (record.node_id, record))
            .collect();

        let mut placements: HashMap<NodeId, Placement> = HashMap::new();
        for &node_id in enabled.keys() {
            resolve_placement(node_id, &enabled, &all_ids, &mut placements)?;
        }

        let mut kept: Vec<&NodeRecord> = enabled
            .values()
            .filter(|record| matches!(placements.get(&record.node_id), Some(Placement::Kept)))
            .collect();
        kept.sort_by(|a, b| {
            a.order
                .cmp(&b.order)
                .then_with(|| a.title.cmp(&b.title))
                .then_with(|| a.node_id.cmp(&b.node_id))
        });

        let mut nodes = Vec::with_capacity(kept.len());
        let mut by_id = HashMap::with_capacity(kept.len());
        for record in &kept {
            by_id.insert(record.node_id, nodes.len());
            nodes.push(NodeInfo {
                node_id: record.node_id,
                parent: None,
                children: Vec::new(),
                order: record.order,
                title: record.title.clone(),
                path: record.path.clone(),
                full_path: String::new(),
                handler_id: record.handler_id.clone(),
                visible: record.visible,
                add_to_menu: record.add_to_menu,
                level: 0,
                access_rules: rules_by_node.remove(&record.node_id).unwrap_or_default(),
            });
        }

        // Kept records are globally sorted by (order, title), so pushing
        // children in iteration order leaves every child list sorted too.
        for record in &kept {
            if let Some(parent_id) = record.parent_id
                && let Some(&parent_index) = by_id.get(&parent_id)
            {
                let child_index = by_id[&record.node_id];
                nodes[child_index].parent = Some(parent_index);
                nodes[parent_index].children.push(child_index);
            }
        }

        let root = kept
            .iter()
            .find(|record| record.parent_id.is_none())
            .map(|record| by_id[&record.node_id]);

        let top_level: Vec<usize> = nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.parent.is_none())
            .map(|(index, _)| index)
            .collect();
        let mut queue: VecDeque<usize> = top_level.into();
        while let Some(index) = queue.pop_front() {
            let (full_path, level) = match nodes[index].parent {
                None if root == Some(index) => (String::new(), 0),
                None => (nodes[index].path.clone(), 0),
                Some(parent_index) => {
                    let parent = &nodes[parent_index];
                    let full_path = if parent.full_path.is_empty() {
                        nodes[index].path.clone()
                    } else {
                        format!("{}/{}", parent.full_path, nodes[index].path)
                    };
                    (full_path, parent.level + 1)
                }
            };
            nodes[index].full_path = full_path;
            nodes[index].level = level;
            queue.extend(nodes[index].children.iter().copied());
        }

        Ok(Self { nodes, by_id, root })
    }

    pub fn root(&self) -> Option<&NodeInfo> {
        self.root.map(|index| &self.nodes[index])
    }

    pub fn get(&self, node_id: NodeId) -> Option<&NodeInfo> {
        self.by_id.get(&node_id).map(|&index| &self.nodes[index])
    }

    pub fn parent_of(&self, node: &NodeInfo) -> Option<&NodeInfo> {
        node.parent.map(|index| &self.nodes[index])
    }

    pub fn children_of<'a>(&'a self, node: &'a NodeInfo) -> impl Iterator<Item = &'a NodeInfo> {
        node.children.iter().map(|&index| &self.nodes[index])
    }

    /// Resolve a slash-separated path to the deepest matching node.
    ///
    /// Returns the node together with the unconsumed remainder of the path;
    /// the remainder is empty on an exact match. `None` only when the tree
    /// has no root.
    pub fn by_path(&self, path: &str) -> Option<(&NodeInfo, String)> {
        let mut current = self.root?;
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut consumed = 0;
        for segment in &segments {
            let next = self.nodes[current]
                .children
                .iter()
                .copied()
                .find(|&child| self.nodes[child].path == *segment);
            match next {
                Some(child) => {
                    current = child;
                    consumed += 1;
                }
                None => break,
            }
        }
        Some((&self.nodes[current], segments[consumed..].join("/")))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn resolve_placement(
    node_id: NodeId,
    enabled: &HashMap<NodeId, NodeRecord>,
    all_ids: &HashSet<NodeId>,
    placements: &mut HashMap<NodeId, Placement>,
) -> Result<Placement, DomainError> {
    match placements.get(&node_id) {
        Some(Placement::InProgress) => {
            return Err(DomainError::invariant(format!(
                "node parent cycle through id {node_id}"
            )));
        }
        Some(done) => return Ok(done.clone()),
        None => {}
    }
    placements.insert(node_id, Placement::InProgress);

    let placement = match enabled[&node_id].parent_id {
        None => Placement::Kept,
        Some(parent_id) if enabled.contains_key(&parent_id) => {
            resolve_placement(parent_id, enabled, all_ids, placements)?
        }
        // Parent exists but is disabled: the whole subtree is unreachable.
        Some(parent_id) if all_ids.contains(&parent_id) => Placement::Dropped,
        // Dangling parent reference: keep the node as an orphan.
        Some(_) => Placement::Kept,
    };
    placements.insert(node_id, placement.clone());
    Ok(placement)
}
