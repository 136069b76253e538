//! In-memory repository implementations.
//!
//! Back the integration tests and hosts that embed the core without a
//! database. The change log keeps full fidelity with the durable contract:
//! strictly increasing ids, ascending `query_after`, and a working push
//! signal fed from `append`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{broadcast, mpsc};

use crate::application::repos::{
    ChangeLogRepo, ChangeSignal, NodesRepo, RepoError, SettingsRepo, UsersRepo,
};
use crate::cache::lock::mutex_lock;
use crate::domain::changes::{ChangeRecord, NewChange};
use crate::domain::entities::{SiteConfigRecord, UserProfileRecord};
use crate::domain::nodes::{AccessRuleRecord, NodeRecord};
use crate::domain::types::{AccessLevel, RecordId, UserId};

const SOURCE: &str = "infra::memory";

/// In-memory append log of change records.
pub struct MemoryChangeLog {
    records: Mutex<Vec<ChangeRecord>>,
    next_id: AtomicI64,
    notify: broadcast::Sender<()>,
}

impl MemoryChangeLog {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(64);
        Self {
            records: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
            notify,
        }
    }

    /// A push channel fed by this log's appends.
    pub fn signal(&self) -> MemoryChangeSignal {
        MemoryChangeSignal {
            notify: Some(self.notify.clone()),
        }
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.records, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryChangeLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeLogRepo for MemoryChangeLog {
    async fn append(&self, change: NewChange) -> Result<RecordId, RepoError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = ChangeRecord {
            id,
            entity_id: change.entity_id,
            collection: change.collection,
            kind: change.kind,
            user_id: change.user_id,
            site_id: change.site_id,
            created_at: OffsetDateTime::now_utc(),
        };
        mutex_lock(&self.records, SOURCE, "append").push(record);
        let _ = self.notify.send(());
        Ok(id)
    }

    async fn query_after(&self, after: RecordId) -> Result<Vec<ChangeRecord>, RepoError> {
        let records = mutex_lock(&self.records, SOURCE, "query_after");
        Ok(records
            .iter()
            .filter(|record| record.id > after)
            .cloned()
            .collect())
    }

    async fn max_id(&self) -> Result<Option<RecordId>, RepoError> {
        let records = mutex_lock(&self.records, SOURCE, "max_id");
        Ok(records.last().map(|record| record.id))
    }
}

/// Push channel over the in-memory log.
///
/// Built via [`MemoryChangeLog::signal`]; the
/// [`unavailable`](Self::unavailable) variant refuses to listen, which
/// exercises the tracker's polling fallback.
pub struct MemoryChangeSignal {
    notify: Option<broadcast::Sender<()>>,
}

impl MemoryChangeSignal {
    pub fn unavailable() -> Self {
        Self { notify: None }
    }
}

#[async_trait]
impl ChangeSignal for MemoryChangeSignal {
    async fn listen(&self) -> Result<mpsc::UnboundedReceiver<()>, RepoError> {
        let Some(notify) = &self.notify else {
            return Err(RepoError::NotificationsUnavailable {
                message: "in-memory signal configured as unavailable".to_string(),
            });
        };
        let mut source = notify.subscribe();
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    // A lagged receiver still learned that something
                    // changed; one wake-up is enough.
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        if sender.send(()).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(receiver)
    }
}

/// In-memory site structure.
pub struct MemoryNodes {
    nodes: Mutex<Vec<NodeRecord>>,
    access_rules: Mutex<Vec<AccessRuleRecord>>,
    fail: AtomicBool,
}

impl MemoryNodes {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(Vec::new()),
            access_rules: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_nodes(&self, nodes: Vec<NodeRecord>) {
        *mutex_lock(&self.nodes, SOURCE, "set_nodes") = nodes;
    }

    pub fn set_access_rules(&self, rules: Vec<AccessRuleRecord>) {
        *mutex_lock(&self.access_rules, SOURCE, "set_access_rules") = rules;
    }

    /// Make subsequent reads fail, to exercise construction-failure paths.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), RepoError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RepoError::from_persistence("nodes repository offline"));
        }
        Ok(())
    }
}

impl Default for MemoryNodes {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodesRepo for MemoryNodes {
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>, RepoError> {
        self.check_available()?;
        Ok(mutex_lock(&self.nodes, SOURCE, "list_nodes").clone())
    }

    async fn list_access_rules(&self) -> Result<Vec<AccessRuleRecord>, RepoError> {
        self.check_available()?;
        Ok(mutex_lock(&self.access_rules, SOURCE, "list_access_rules").clone())
    }
}

/// In-memory user accounts.
pub struct MemoryUsers {
    profiles: Mutex<HashMap<UserId, UserProfileRecord>>,
}

impl MemoryUsers {
    pub fn new() -> Self {
        Self {
            profiles: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert_profile(&self, profile: UserProfileRecord) {
        mutex_lock(&self.profiles, SOURCE, "insert_profile").insert(profile.user_id, profile);
    }

    pub fn remove_profile(&self, user_id: UserId) {
        mutex_lock(&self.profiles, SOURCE, "remove_profile").remove(&user_id);
    }
}

impl Default for MemoryUsers {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsersRepo for MemoryUsers {
    async fn load_profile(&self, user_id: UserId) -> Result<Option<UserProfileRecord>, RepoError> {
        Ok(mutex_lock(&self.profiles, SOURCE, "load_profile")
            .get(&user_id)
            .cloned())
    }
}

/// In-memory site configuration.
pub struct MemorySettings {
    config: Mutex<SiteConfigRecord>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self {
            config: Mutex::new(SiteConfigRecord {
                site_name: "telaio".to_string(),
                users_can_register: false,
                maintenance: false,
                default_access: AccessLevel::Read,
                updated_at: OffsetDateTime::UNIX_EPOCH,
            }),
        }
    }

    pub fn set_site_config(&self, config: SiteConfigRecord) {
        *mutex_lock(&self.config, SOURCE, "set_site_config") = config;
    }
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SettingsRepo for MemorySettings {
    async fn load_site_config(&self) -> Result<SiteConfigRecord, RepoError> {
        Ok(mutex_lock(&self.config, SOURCE, "load_site_config").clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{ChangeKind, Collection};

    #[tokio::test]
    async fn change_log_allocates_increasing_ids() {
        let log = MemoryChangeLog::new();

        let first = log
            .append(NewChange::new(1, Collection::Node, ChangeKind::Added))
            .await
            .expect("appends");
        let second = log
            .append(NewChange::new(2, Collection::User, ChangeKind::Updated))
            .await
            .expect("appends");

        assert!(second > first);
        assert_eq!(log.max_id().await.expect("max id"), Some(second));
    }

    #[tokio::test]
    async fn query_after_is_exclusive_and_ascending() {
        let log = MemoryChangeLog::new();
        for entity_id in 1..=3 {
            log.append(NewChange::new(entity_id, Collection::Node, ChangeKind::Added))
                .await
                .expect("appends");
        }

        let tail = log.query_after(1).await.expect("queries");
        assert_eq!(tail.len(), 2);
        assert!(tail.windows(2).all(|pair| pair[0].id < pair[1].id));
        assert!(tail.iter().all(|record| record.id > 1));
    }

    #[tokio::test]
    async fn signal_wakes_on_append() {
        let log = MemoryChangeLog::new();
        let mut receiver = log.signal().listen().await.expect("listens");

        log.append(NewChange::new(1, Collection::Node, ChangeKind::Added))
            .await
            .expect("appends");

        receiver.recv().await.expect("wakes");
    }

    #[tokio::test]
    async fn unavailable_signal_refuses_to_listen() {
        let signal = MemoryChangeSignal::unavailable();
        assert!(signal.listen().await.is_err());
    }
}
