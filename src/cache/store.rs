//! Process-wide cache of lazily built handlers.
//!
//! One coarse lock serializes the cache table and the collection
//! subscription index, and handler construction (including repository I/O)
//! runs while that lock is held. Misses for unrelated keys therefore do not
//! build in parallel. That is the intended trade-off: it buys at-most-one
//! live handler per key across the whole store without per-key bookkeeping.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use metrics::{counter, gauge};
use rand::Rng;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::application::repos::RepoError;
use crate::domain::changes::ChangeRecord;
use crate::domain::types::{ChangeKind, Collection, EntityId, UserId};

use super::handler::CacheHandler;
use super::keys::{HandlerKey, short_type_name};
use super::registry::HandlerRegistry;
use super::tracker::{ChangeTracker, SubscriberId};

const METRIC_CACHE_HIT_TOTAL: &str = "telaio_cache_hit_total";
const METRIC_CACHE_MISS_TOTAL: &str = "telaio_cache_miss_total";
const METRIC_CACHE_EVICT_TOTAL: &str = "telaio_cache_evict_total";
const METRIC_CACHE_ENTRIES: &str = "telaio_cache_entries";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no cache handler registered for `{type_name}`")]
    NotRegistered { type_name: &'static str },
    #[error("failed to build cache handler `{type_name}`")]
    Build {
        type_name: &'static str,
        #[source]
        source: RepoError,
    },
    #[error("cache entry `{type_name}` holds a different concrete type")]
    TypeMismatch { type_name: &'static str },
}

struct CacheEntry {
    handler: Arc<dyn CacheHandler>,
    /// Collections the handler declared at construction; used to unhook the
    /// entry from every index bucket it appears in on removal.
    collections: Vec<Collection>,
}

#[derive(Default)]
struct StoreInner {
    items: HashMap<HandlerKey, CacheEntry>,
    by_collection: HashMap<Collection, Vec<HandlerKey>>,
}

/// The process-wide handler cache.
///
/// Owned by the composition root and shared as `Arc<CacheStore>`; there is
/// no ambient global instance.
pub struct CacheStore {
    registry: HandlerRegistry,
    inner: Mutex<StoreInner>,
}

impl CacheStore {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry,
            inner: Mutex::new(StoreInner::default()),
        }
    }

    /// Return the live handler for `(H, object_id)`, building it on a miss.
    ///
    /// An entry whose handler reports itself expired counts as a miss and
    /// is rebuilt. Construction failures propagate and leave no entry
    /// behind.
    pub async fn get<H: CacheHandler>(
        &self,
        object_id: Option<EntityId>,
    ) -> Result<Arc<H>, CacheError> {
        let mut inner = self.inner.lock().await;
        self.get_locked::<H>(&mut inner, object_id).await
    }

    /// Return the live handler for `(H, object_id)` without building one.
    pub async fn peek<H: CacheHandler>(&self, object_id: Option<EntityId>) -> Option<Arc<H>> {
        let key = HandlerKey::new::<H>(object_id);
        let mut inner = self.inner.lock().await;
        let entry = inner.items.get(&key)?;
        if entry.handler.expired() {
            debug!(key = %key, "cache: dropping expired entry");
            Self::remove_entry(&mut inner, &key);
            return None;
        }
        counter!(METRIC_CACHE_HIT_TOTAL).increment(1);
        Self::downcast::<H>(entry.handler.clone()).ok()
    }

    /// Unconditionally evict the entry for `(H, object_id)`, if present.
    pub async fn expire<H: CacheHandler>(&self, object_id: Option<EntityId>) {
        let key = HandlerKey::new::<H>(object_id);
        let mut inner = self.inner.lock().await;
        if Self::remove_entry(&mut inner, &key) {
            debug!(key = %key, "cache: removing entry on demand");
            counter!(METRIC_CACHE_EVICT_TOTAL).increment(1);
        }
        gauge!(METRIC_CACHE_ENTRIES).set(inner.items.len() as f64);
    }

    /// Build a handler under a random, previously unused object id.
    ///
    /// For handlers that are cache-resident but not tied to a persisted id;
    /// id generation retries until it finds a free slot.
    pub async fn create_with_unique_id<H: CacheHandler>(&self) -> Result<Arc<H>, CacheError> {
        let mut inner = self.inner.lock().await;
        let object_id = loop {
            let candidate = i64::from(rand::rng().random::<u32>());
            if !inner
                .items
                .contains_key(&HandlerKey::new::<H>(Some(candidate)))
            {
                break candidate;
            }
        };
        self.get_locked::<H>(&mut inner, Some(object_id)).await
    }

    /// Invalidation entry point, driven by the change tracker.
    ///
    /// Every handler registered under `collection` is asked whether the
    /// change is relevant to it; those that say yes are evicted and will be
    /// rebuilt on the next read.
    pub async fn notify_change(
        &self,
        entity_id: EntityId,
        user_id: Option<UserId>,
        collection: Collection,
        kind: ChangeKind,
    ) {
        let mut inner = self.inner.lock().await;
        let Some(keys) = inner.by_collection.get(&collection) else {
            return;
        };
        let expiring: Vec<HandlerKey> = keys
            .iter()
            .filter(|key| {
                inner
                    .items
                    .get(key)
                    .is_some_and(|entry| entry.handler.expires(collection, entity_id, kind))
            })
            .copied()
            .collect();

        for key in expiring {
            debug!(
                key = %key,
                ?collection,
                entity_id,
                changed_by = ?user_id,
                "cache: removing entry after change"
            );
            Self::remove_entry(&mut inner, &key);
            counter!(METRIC_CACHE_EVICT_TOTAL).increment(1);
        }
        gauge!(METRIC_CACHE_ENTRIES).set(inner.items.len() as f64);
    }

    /// Route tracker deliveries into cache invalidation.
    pub async fn subscribe_to(self: Arc<Self>, tracker: &ChangeTracker) -> SubscriberId {
        tracker
            .subscribe(move |record: ChangeRecord| {
                let store = Arc::clone(&self);
                async move {
                    store
                        .notify_change(
                            record.entity_id,
                            record.user_id,
                            record.collection,
                            record.kind,
                        )
                        .await;
                    Ok(())
                }
                .boxed()
            })
            .await
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    async fn get_locked<H: CacheHandler>(
        &self,
        inner: &mut StoreInner,
        object_id: Option<EntityId>,
    ) -> Result<Arc<H>, CacheError> {
        let key = HandlerKey::new::<H>(object_id);

        if let Some(entry) = inner.items.get(&key) {
            if entry.handler.expired() {
                debug!(key = %key, "cache: dropping expired entry");
                Self::remove_entry(inner, &key);
            } else {
                counter!(METRIC_CACHE_HIT_TOTAL).increment(1);
                return Self::downcast::<H>(entry.handler.clone());
            }
        }
        counter!(METRIC_CACHE_MISS_TOTAL).increment(1);

        let Some((type_name, mut handler)) = self.registry.construct(TypeId::of::<H>()) else {
            return Err(CacheError::NotRegistered {
                type_name: short_type_name::<H>(),
            });
        };

        debug!(key = %key, "cache: building entry");
        handler
            .initialize(object_id)
            .await
            .map_err(|source| CacheError::Build { type_name, source })?;

        let handler: Arc<dyn CacheHandler> = Arc::from(handler);
        let collections = handler.handled_collections().to_vec();
        for collection in &collections {
            inner.by_collection.entry(*collection).or_default().push(key);
        }
        inner.items.insert(
            key,
            CacheEntry {
                handler: Arc::clone(&handler),
                collections,
            },
        );
        gauge!(METRIC_CACHE_ENTRIES).set(inner.items.len() as f64);

        Self::downcast::<H>(handler)
    }

    /// Remove an entry and unhook it from every index bucket it appears in.
    fn remove_entry(inner: &mut StoreInner, key: &HandlerKey) -> bool {
        let Some(entry) = inner.items.remove(key) else {
            return false;
        };
        for collection in &entry.collections {
            if let Some(keys) = inner.by_collection.get_mut(collection) {
                keys.retain(|registered| registered != key);
                if keys.is_empty() {
                    inner.by_collection.remove(collection);
                }
            }
        }
        true
    }

    fn downcast<H: CacheHandler>(handler: Arc<dyn CacheHandler>) -> Result<Arc<H>, CacheError> {
        handler
            .into_any()
            .downcast::<H>()
            .map_err(|_| CacheError::TypeMismatch {
                type_name: short_type_name::<H>(),
            })
    }
}
