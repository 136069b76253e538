//! Singleton node-tree cache handler.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::application::repos::{NodesRepo, RepoError};
use crate::cache::CacheHandler;
use crate::domain::access::{PrincipalContext, resolve_access};
use crate::domain::nodes::{NodeInfo, NodeTree};
use crate::domain::types::{AccessLevel, ChangeKind, Collection, EntityId, NodeId};

const HANDLED: &[Collection] = &[Collection::Node, Collection::NodeAccess];

/// The whole site structure as one immutable snapshot.
///
/// Any change to a node or an access rule expires the snapshot; the next
/// read rebuilds the complete tree. Readers holding an `Arc` to an evicted
/// instance keep a consistent (if stale) tree until they drop it.
pub struct NodeTreeCache {
    repo: Arc<dyn NodesRepo>,
    tree: NodeTree,
}

impl NodeTreeCache {
    pub fn new(repo: Arc<dyn NodesRepo>) -> Self {
        Self {
            repo,
            tree: NodeTree::default(),
        }
    }

    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    pub fn root(&self) -> Option<&NodeInfo> {
        self.tree.root()
    }

    pub fn node(&self, node_id: NodeId) -> Option<&NodeInfo> {
        self.tree.get(node_id)
    }

    /// Deepest node matching `path` plus the unconsumed remainder.
    pub fn node_by_path(&self, path: &str) -> Option<(&NodeInfo, String)> {
        self.tree.by_path(path)
    }

    /// Effective access for `principal` on `node_id`.
    ///
    /// An unknown node id resolves to `default_access`: there is nothing to
    /// walk, so the caller's default stands.
    pub fn access_level(
        &self,
        node_id: NodeId,
        principal: &PrincipalContext,
        default_access: AccessLevel,
    ) -> AccessLevel {
        match self.tree.get(node_id) {
            Some(node) => resolve_access(&self.tree, node, principal, default_access),
            None => default_access,
        }
    }
}

#[async_trait]
impl CacheHandler for NodeTreeCache {
    async fn initialize(&mut self, _object_id: Option<EntityId>) -> Result<(), RepoError> {
        let nodes = self.repo.list_nodes().await?;
        let rules = self.repo.list_access_rules().await?;
        let node_count = nodes.len();
        self.tree =
            NodeTree::build(nodes, rules).map_err(|error| RepoError::integrity(error.to_string()))?;
        debug!(
            loaded = node_count,
            kept = self.tree.len(),
            "node tree snapshot built"
        );
        Ok(())
    }

    fn handled_collections(&self) -> &[Collection] {
        HANDLED
    }

    fn expires(&self, _collection: Collection, _entity_id: EntityId, _kind: ChangeKind) -> bool {
        true
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
