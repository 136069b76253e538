//! Cache store behavior over the in-memory backends: identity stability,
//! relevance-filtered invalidation, and construction-failure semantics.

use std::sync::Arc;
use std::time::Duration;

use telaio::application::repos::{NodesRepo, SettingsRepo, UsersRepo};
use telaio::cache::{CacheError, CacheStore, HandlerRegistry};
use telaio::domain::entities::UserProfileRecord;
use telaio::domain::nodes::NodeRecord;
use telaio::domain::types::{ChangeKind, Collection};
use telaio::handlers::{NodeTreeCache, SiteConfigCache, UserProfileCache};
use telaio::infra::memory::{MemoryNodes, MemorySettings, MemoryUsers};

struct Backends {
    nodes: Arc<MemoryNodes>,
    users: Arc<MemoryUsers>,
    settings: Arc<MemorySettings>,
}

fn backends() -> Backends {
    Backends {
        nodes: Arc::new(MemoryNodes::new()),
        users: Arc::new(MemoryUsers::new()),
        settings: Arc::new(MemorySettings::new()),
    }
}

fn build_store(backends: &Backends) -> Arc<CacheStore> {
    let mut registry = HandlerRegistry::new();

    let nodes = Arc::clone(&backends.nodes) as Arc<dyn NodesRepo>;
    registry.register::<NodeTreeCache, _>(move || NodeTreeCache::new(Arc::clone(&nodes)));

    let users = Arc::clone(&backends.users) as Arc<dyn UsersRepo>;
    registry.register::<UserProfileCache, _>(move || {
        UserProfileCache::new(Arc::clone(&users), Duration::from_secs(900))
    });

    let settings = Arc::clone(&backends.settings) as Arc<dyn SettingsRepo>;
    registry.register::<SiteConfigCache, _>(move || SiteConfigCache::new(Arc::clone(&settings)));

    Arc::new(CacheStore::new(registry))
}

fn root_node() -> NodeRecord {
    NodeRecord {
        node_id: 1,
        parent_id: None,
        order: 0,
        title: "Home".to_string(),
        path: String::new(),
        handler_id: "home".to_string(),
        enabled: true,
        visible: true,
        add_to_menu: true,
    }
}

fn profile(user_id: i64) -> UserProfileRecord {
    UserProfileRecord {
        user_id,
        name: format!("User {user_id}"),
        email: format!("user{user_id}@example.org"),
        is_administrator: false,
        is_approved: true,
        email_confirmed: true,
        is_blocked: false,
        unblock_time: None,
        is_removed: false,
        groups: Vec::new(),
    }
}

#[tokio::test]
async fn repeated_gets_return_the_same_instance() {
    let backends = backends();
    backends.nodes.set_nodes(vec![root_node()]);
    backends.users.insert_profile(profile(42));
    let store = build_store(&backends);

    let tree_first = store.get::<NodeTreeCache>(None).await.expect("builds");
    let tree_second = store.get::<NodeTreeCache>(None).await.expect("cached");
    assert!(Arc::ptr_eq(&tree_first, &tree_second));

    let profile_first = store.get::<UserProfileCache>(Some(42)).await.expect("builds");
    let profile_second = store
        .get::<UserProfileCache>(Some(42))
        .await
        .expect("cached");
    assert!(Arc::ptr_eq(&profile_first, &profile_second));

    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn relevant_change_evicts_and_next_get_rebuilds() {
    let backends = backends();
    backends.nodes.set_nodes(vec![root_node()]);
    let store = build_store(&backends);

    let before = store.get::<NodeTreeCache>(None).await.expect("builds");
    assert_eq!(before.tree().len(), 1);

    let mut child = root_node();
    child.node_id = 2;
    child.parent_id = Some(1);
    child.path = "docs".to_string();
    backends.nodes.set_nodes(vec![root_node(), child]);

    store
        .notify_change(2, None, Collection::Node, ChangeKind::Added)
        .await;

    let after = store.get::<NodeTreeCache>(None).await.expect("rebuilds");
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(after.tree().len(), 2);
}

#[tokio::test]
async fn irrelevant_changes_leave_entries_untouched() {
    let backends = backends();
    backends.nodes.set_nodes(vec![root_node()]);
    backends.users.insert_profile(profile(42));
    backends.users.insert_profile(profile(43));
    let store = build_store(&backends);

    let tree = store.get::<NodeTreeCache>(None).await.expect("builds");
    let first = store.get::<UserProfileCache>(Some(42)).await.expect("builds");
    let second = store.get::<UserProfileCache>(Some(43)).await.expect("builds");

    // A user-row change touches only the matching profile.
    store
        .notify_change(42, None, Collection::User, ChangeKind::Updated)
        .await;

    assert!(store.peek::<UserProfileCache>(Some(42)).await.is_none());
    let second_again = store
        .peek::<UserProfileCache>(Some(43))
        .await
        .expect("still cached");
    assert!(Arc::ptr_eq(&second, &second_again));

    let tree_again = store.peek::<NodeTreeCache>(None).await.expect("still cached");
    assert!(Arc::ptr_eq(&tree, &tree_again));
}

#[tokio::test]
async fn group_changes_evict_every_profile() {
    let backends = backends();
    backends.users.insert_profile(profile(42));
    backends.users.insert_profile(profile(43));
    let store = build_store(&backends);

    store.get::<UserProfileCache>(Some(42)).await.expect("builds");
    store.get::<UserProfileCache>(Some(43)).await.expect("builds");

    store
        .notify_change(7, None, Collection::UserGroup, ChangeKind::Removed)
        .await;

    assert!(store.peek::<UserProfileCache>(Some(42)).await.is_none());
    assert!(store.peek::<UserProfileCache>(Some(43)).await.is_none());
}

#[tokio::test]
async fn expire_removes_only_the_named_entry() {
    let backends = backends();
    backends.nodes.set_nodes(vec![root_node()]);
    let store = build_store(&backends);

    store.get::<NodeTreeCache>(None).await.expect("builds");
    store.get::<SiteConfigCache>(None).await.expect("builds");

    store.expire::<NodeTreeCache>(None).await;

    assert!(store.peek::<NodeTreeCache>(None).await.is_none());
    assert!(store.peek::<SiteConfigCache>(None).await.is_some());
}

#[tokio::test]
async fn construction_failure_propagates_and_caches_nothing() {
    let backends = backends();
    backends.nodes.set_nodes(vec![root_node()]);
    backends.nodes.set_fail(true);
    let store = build_store(&backends);

    let result = store.get::<NodeTreeCache>(None).await;
    assert!(matches!(result, Err(CacheError::Build { .. })));
    assert!(store.is_empty().await);

    // Once the source recovers, the same key builds cleanly.
    backends.nodes.set_fail(false);
    let rebuilt = store.get::<NodeTreeCache>(None).await.expect("builds");
    assert_eq!(rebuilt.tree().len(), 1);
}

#[tokio::test]
async fn unique_id_handlers_occupy_distinct_keys() {
    let backends = backends();
    let store = build_store(&backends);

    let first = store
        .create_with_unique_id::<UserProfileCache>()
        .await
        .expect("builds");
    let second = store
        .create_with_unique_id::<UserProfileCache>()
        .await
        .expect("builds");

    assert!(!Arc::ptr_eq(&first, &second));
    assert_ne!(first.profile().user_id, second.profile().user_id);
    assert_eq!(store.len().await, 2);
}
