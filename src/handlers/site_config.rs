//! Site configuration cache handler.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::application::repos::{RepoError, SettingsRepo};
use crate::cache::CacheHandler;
use crate::domain::entities::SiteConfigRecord;
use crate::domain::types::{AccessLevel, ChangeKind, Collection, EntityId};

const HANDLED: &[Collection] = &[Collection::SiteSettings];

/// Singleton snapshot of the site-wide configuration.
pub struct SiteConfigCache {
    repo: Arc<dyn SettingsRepo>,
    config: SiteConfigRecord,
}

impl SiteConfigCache {
    pub fn new(repo: Arc<dyn SettingsRepo>) -> Self {
        Self {
            repo,
            config: SiteConfigRecord {
                site_name: String::new(),
                users_can_register: false,
                maintenance: false,
                default_access: AccessLevel::Read,
                updated_at: OffsetDateTime::UNIX_EPOCH,
            },
        }
    }

    pub fn config(&self) -> &SiteConfigRecord {
        &self.config
    }

    /// Access granted when no rule matches on a node's ancestor chain.
    pub fn default_access(&self) -> AccessLevel {
        self.config.default_access
    }
}

#[async_trait]
impl CacheHandler for SiteConfigCache {
    async fn initialize(&mut self, _object_id: Option<EntityId>) -> Result<(), RepoError> {
        self.config = self.repo.load_site_config().await?;
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
