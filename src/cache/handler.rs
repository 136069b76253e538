//! Cache handler contract.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::application::repos::RepoError;
use crate::domain::types::{ChangeKind, Collection, EntityId};

/// A lazily constructed, cache-resident view over persisted data.
///
/// The store drives the lifecycle: [`initialize`](Self::initialize) runs
/// exactly once after construction (while the store lock is held),
/// [`handled_collections`](Self::handled_collections) is read once
/// immediately after a successful initialize, and
/// [`expires`](Self::expires) is consulted for each change record routed to
/// one of those collections. Once stored, a handler is immutable: a
/// rebuild replaces the entry, it never mutates the handler in place.
#[async_trait]
pub trait CacheHandler: Send + Sync + 'static {
    /// Load the handler's state from the source of truth.
    ///
    /// `object_id` is the per-entity id the handler was requested under, or
    /// `None` for singletons. Errors propagate to the `get` caller and
    /// leave no entry behind.
    async fn initialize(&mut self, object_id: Option<EntityId>) -> Result<(), RepoError>;

    /// Collections whose changes this handler wants to observe.
    fn handled_collections(&self) -> &[Collection];

    /// Whether a specific change invalidates this handler.
    fn expires(&self, collection: Collection, entity_id: EntityId, kind: ChangeKind) -> bool;

    /// Handler-specific staleness, e.g. a time-to-live. An expired handler
    /// is treated as absent and rebuilt on the next read.
    fn expired(&self) -> bool {
        false
    }

    /// Arc downcast support for typed retrieval from the store; implement
    /// as `self`.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}
