use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use ward_core::{is_double_negated, validate_node, DisplayFormat, PrincipalId};
use ward_host::{MainThread, SessionHost};
use ward_store::{FormatUpdate, PrincipalStore, StoreResult};
use ward_tags::{TagContribution, TagEngine};

use crate::cache::{CacheEntry, PermissionCache};
use crate::locks::PrincipalLocks;
use crate::overlay::{plan_overlay, OverlayManager};

pub const PERM_FORMAT_CONTRIBUTION: &str = "perm_format";
pub const DEFAULT_FORMAT_PRIORITY: i32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mutation {
    Add,
    Remove,
}

impl Mutation {
    fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
        }
    }
}

/// Write-through permission cache bound to the host's session overlays.
///
/// Store failures never propagate: they are logged, reported as `false`
/// and leave the cache untouched.
///
/// A principal counts as live while it is connected and has not been
/// released since its last [`PermissionManager::load_principal`]. Only live
/// principals are cached, get an overlay or publish a display format.
pub struct PermissionManager {
    store: Arc<dyn PrincipalStore>,
    host: Arc<dyn SessionHost>,
    main: MainThread,
    tags: TagEngine,
    cache: PermissionCache,
    overlays: Arc<OverlayManager>,
    locks: PrincipalLocks,
    released: Mutex<HashSet<PrincipalId>>,
    format_priority: i32,
}

impl PermissionManager {
    pub fn new(
        store: Arc<dyn PrincipalStore>,
        host: Arc<dyn SessionHost>,
        main: MainThread,
        tags: TagEngine,
    ) -> Self {
        Self {
            overlays: Arc::new(OverlayManager::new(host.clone())),
            store,
            host,
            main,
            tags,
            cache: PermissionCache::new(),
            locks: PrincipalLocks::new(),
            released: Mutex::new(HashSet::new()),
            format_priority: DEFAULT_FORMAT_PRIORITY,
        }
    }

    pub fn with_format_priority(mut self, priority: i32) -> Self {
        self.format_priority = priority;
        self
    }

    pub fn format_priority(&self) -> i32 {
        self.format_priority
    }

    /// Reads the stored permissions and format of `id` into the cache,
    /// replacing any prior entry. Also revokes an earlier release of `id`.
    pub async fn load_principal(&self, id: PrincipalId) -> bool {
        let loaded = {
            let _guard = self.locks.lock(id).await;
            self.released_set().remove(&id);
            self.load_into_cache(id).await
        };
        self.forget_idle_lock(id);
        loaded
    }

    /// Rebuilds the session overlay of `id` from its cache entry. An uncached
    /// principal gets the overlay of an empty set.
    pub async fn apply_overlay(&self, id: PrincipalId) -> bool {
        let applied = {
            let _guard = self.locks.lock(id).await;
            self.apply_overlay_locked(id).await
        };
        self.forget_idle_lock(id);
        applied
    }

    pub async fn add_permission(&self, id: PrincipalId, node: &str) -> bool {
        self.mutate(id, node, Mutation::Add).await
    }

    pub async fn remove_permission(&self, id: PrincipalId, node: &str) -> bool {
        self.mutate(id, node, Mutation::Remove).await
    }

    /// Cached permission strings of `id`, or a one-shot store read that is
    /// not cached.
    pub async fn get_permissions(&self, id: PrincipalId) -> BTreeSet<String> {
        if let Some(permissions) = self.cache.permissions(id) {
            return permissions;
        }
        match self.store.load_permissions(id).await {
            Ok(permissions) => permissions,
            Err(error) => {
                tracing::warn!(principal = %id, %error, "failed to load permissions");
                BTreeSet::new()
            }
        }
    }

    /// Cached format of `id`, or a one-shot store read that is not cached.
    pub async fn get_format(&self, id: PrincipalId) -> DisplayFormat {
        if let Some(format) = self.cache.format(id) {
            return format;
        }
        match self.store.load_format(id).await {
            Ok(format) => format,
            Err(error) => {
                tracing::warn!(principal = %id, %error, "failed to load display format");
                DisplayFormat::default()
            }
        }
    }

    pub fn cached_format(&self, id: PrincipalId) -> Option<DisplayFormat> {
        self.cache.format(id)
    }

    pub fn cached_permissions(&self, id: PrincipalId) -> Option<BTreeSet<String>> {
        self.cache.permissions(id)
    }

    pub async fn set_prefix(&self, id: PrincipalId, value: &str) -> bool {
        self.update_format(id, FormatUpdate::prefix(value)).await
    }

    pub async fn set_suffix(&self, id: PrincipalId, value: &str) -> bool {
        self.update_format(id, FormatUpdate::suffix(value)).await
    }

    /// Republishes the `perm_format` contribution of a connected principal.
    pub async fn publish_format(&self, id: PrincipalId) -> bool {
        let format = self.get_format(id).await;
        self.publish_format_value(id, &format).await
    }

    /// Clears the cache, then reloads and re-enacts every connected
    /// principal. Returns how many were reloaded without a store failure.
    pub async fn reload(&self) -> usize {
        self.cache.clear();
        let principals = self.host.connected_principals();
        let total = principals.len();
        let mut reloaded = 0;
        for id in principals {
            let _guard = self.locks.lock(id).await;
            if !self.is_live(id) {
                continue;
            }
            if self.load_into_cache(id).await {
                reloaded += 1;
            }
            self.apply_overlay_locked(id).await;
            let format = self.cache.format(id).unwrap_or_default();
            self.publish_format_value(id, &format).await;
        }
        tracing::info!(reloaded, total, "permission cache reloaded");
        reloaded
    }

    /// Detaches the overlay of `id` and evicts its cache entry. Until the
    /// next [`PermissionManager::load_principal`], later mutations of `id`
    /// only reach the store.
    pub async fn release_principal(&self, id: PrincipalId) {
        {
            let _guard = self.locks.lock(id).await;
            {
                let mut released = self.released_set();
                released.retain(|other| self.host.is_connected(*other));
                released.insert(id);
            }
            let overlays = self.overlays.clone();
            if let Err(error) = self.main.call(move || overlays.release(id)).await {
                tracing::warn!(principal = %id, %error, "failed to release permission overlay");
            }
            self.cache.remove(id);
        }
        self.locks.forget(id);
        tracing::debug!(principal = %id, "released principal");
    }

    /// Detaches every overlay and clears the cache.
    pub async fn shutdown(&self) {
        let overlays = self.overlays.clone();
        match self.main.call(move || overlays.release_all()).await {
            Ok(released) => tracing::debug!(released, "released all permission overlays"),
            Err(error) => tracing::warn!(%error, "failed to release permission overlays"),
        }
        self.cache.clear();
    }

    pub fn is_cached(&self, id: PrincipalId) -> bool {
        self.cache.contains(id)
    }

    pub fn cached_principals(&self) -> Vec<PrincipalId> {
        self.cache.ids()
    }

    pub fn has_overlay(&self, id: PrincipalId) -> bool {
        self.overlays.has_overlay(id)
    }

    /// Connected and not released.
    pub fn is_live(&self, id: PrincipalId) -> bool {
        self.host.is_connected(id) && !self.released_set().contains(&id)
    }

    fn forget_idle_lock(&self, id: PrincipalId) {
        if !self.is_live(id) {
            self.locks.forget(id);
        }
    }

    fn released_set(&self) -> MutexGuard<'_, HashSet<PrincipalId>> {
        match self.released.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn load_into_cache(&self, id: PrincipalId) -> bool {
        match self.store.load_record(id).await {
            Ok(record) => {
                tracing::debug!(
                    principal = %id,
                    permissions = record.permissions.len(),
                    "loaded principal into cache"
                );
                self.cache.insert(id, CacheEntry::from(record));
                true
            }
            Err(error) => {
                tracing::warn!(principal = %id, %error, "failed to load principal");
                false
            }
        }
    }

    async fn apply_overlay_locked(&self, id: PrincipalId) -> bool {
        if !self.is_live(id) {
            return false;
        }
        let entry = self.cache.get(id).unwrap_or_default();
        let plan = plan_overlay(&entry.permissions);
        let overlays = self.overlays.clone();
        match self.main.call(move || overlays.install(id, &plan)).await {
            Ok(installed) => installed,
            Err(error) => {
                tracing::warn!(principal = %id, %error, "failed to install permission overlay");
                false
            }
        }
    }

    async fn mutate(&self, id: PrincipalId, node: &str, mutation: Mutation) -> bool {
        if let Err(error) = validate_node(node) {
            tracing::warn!(principal = %id, node, %error, "rejected permission node");
            return false;
        }
        if is_double_negated(node) {
            tracing::debug!(principal = %id, node, "storing double-negated permission");
        }

        let applied = {
            let _guard = self.locks.lock(id).await;
            self.mutate_locked(id, node, mutation).await
        };
        self.forget_idle_lock(id);
        applied
    }

    async fn mutate_locked(&self, id: PrincipalId, node: &str, mutation: Mutation) -> bool {
        let changed = match self.persist_mutation(id, node, mutation).await {
            Ok(changed) => changed,
            Err(error) => {
                tracing::warn!(
                    principal = %id,
                    node,
                    operation = mutation.as_str(),
                    %error,
                    "failed to persist permission change"
                );
                return false;
            }
        };

        let updated = self.cache.update(id, |entry| match mutation {
            Mutation::Add => {
                entry.permissions.insert(node.to_string());
            }
            Mutation::Remove => {
                entry.permissions.remove(node);
            }
        });
        let live = self.is_live(id);
        if !updated && live {
            self.load_into_cache(id).await;
        }
        if live {
            self.apply_overlay_locked(id).await;
        }
        tracing::debug!(
            principal = %id,
            node,
            operation = mutation.as_str(),
            changed,
            "permission change applied"
        );
        true
    }

    async fn update_format(&self, id: PrincipalId, update: FormatUpdate) -> bool {
        let applied = {
            let _guard = self.locks.lock(id).await;
            self.update_format_locked(id, update).await
        };
        self.forget_idle_lock(id);
        applied
    }

    async fn update_format_locked(&self, id: PrincipalId, update: FormatUpdate) -> bool {
        let format = match self.persist_format(id, update).await {
            Ok(format) => format,
            Err(error) => {
                tracing::warn!(principal = %id, %error, "failed to persist display format");
                return false;
            }
        };
        self.cache.update(id, |entry| entry.format = format.clone());
        self.publish_format_value(id, &format).await;
        true
    }

    async fn persist_mutation(
        &self,
        id: PrincipalId,
        node: &str,
        mutation: Mutation,
    ) -> StoreResult<bool> {
        let display_name = self.host.bare_name(id);
        self.store
            .ensure_principal(id, display_name.as_deref())
            .await?;
        match mutation {
            Mutation::Add => self.store.insert_permission(id, node).await,
            Mutation::Remove => self.store.delete_permission(id, node).await,
        }
    }

    async fn persist_format(
        &self,
        id: PrincipalId,
        update: FormatUpdate,
    ) -> StoreResult<DisplayFormat> {
        let display_name = self.host.bare_name(id);
        self.store
            .ensure_principal(id, display_name.as_deref())
            .await?;
        self.store.update_format(id, update).await
    }

    async fn publish_format_value(&self, id: PrincipalId, format: &DisplayFormat) -> bool {
        if !self.is_live(id) {
            return false;
        }
        let published = if format.is_empty() {
            self.tags
                .remove_contribution(id, PERM_FORMAT_CONTRIBUTION)
                .await
                .map(|_| ())
        } else {
            self.tags
                .set_contribution(
                    id,
                    TagContribution::new(
                        PERM_FORMAT_CONTRIBUTION,
                        format.prefix.clone(),
                        format.suffix.clone(),
                        self.format_priority,
                    ),
                )
                .await
                .map(|_| ())
        };
        match published {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(principal = %id, %error, "failed to publish display format");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ward_host::MemoryHost;
    use ward_store::InMemoryPrincipalStore;

    struct Fixture {
        store: Arc<InMemoryPrincipalStore>,
        host: Arc<MemoryHost>,
        main: MainThread,
        tags: TagEngine,
        manager: Arc<PermissionManager>,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(InMemoryPrincipalStore::new());
            let host = Arc::new(MemoryHost::new());
            let main = MainThread::spawn().expect("spawn main thread");
            let tags = TagEngine::new(host.clone(), main.clone());
            let manager = Arc::new(PermissionManager::new(
                store.clone(),
                host.clone(),
                main.clone(),
                tags.clone(),
            ));
            Self {
                store,
                host,
                main,
                tags,
                manager,
            }
        }

        async fn join(&self, id: PrincipalId, name: &str) {
            self.host.connect(id, name);
            assert!(self.manager.load_principal(id).await);
            assert!(self.manager.apply_overlay(id).await);
            self.tags
                .initialize_principal(id)
                .await
                .expect("initialize tags");
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.main.shutdown();
        }
    }

    #[tokio::test]
    async fn functional_add_then_remove_round_trips_through_cache_and_overlay() {
        let fixture = Fixture::new();
        let id = PrincipalId::from_u128(1);
        fixture.join(id, "alice").await;

        assert!(fixture.manager.add_permission(id, "fly.use").await);
        assert!(fixture.manager.get_permissions(id).await.contains("fly.use"));
        assert_eq!(fixture.host.overlay_value(id, "fly.use"), Some(true));

        assert!(fixture.manager.remove_permission(id, "fly.use").await);
        assert!(!fixture.manager.get_permissions(id).await.contains("fly.use"));
        assert_eq!(fixture.host.overlay_value(id, "fly.use"), None);
        assert!(!fixture
            .store
            .load_permissions(id)
            .await
            .expect("store")
            .contains("fly.use"));
    }

    #[tokio::test]
    async fn unit_load_principal_is_idempotent() {
        let fixture = Fixture::new();
        let id = PrincipalId::from_u128(2);
        fixture
            .store
            .insert_permission(id, "home.set")
            .await
            .expect("seed");

        assert!(fixture.manager.load_principal(id).await);
        let once = fixture.manager.cached_permissions(id);
        assert!(fixture.manager.load_principal(id).await);
        assert_eq!(fixture.manager.cached_permissions(id), once);
        assert_eq!(
            once,
            Some(BTreeSet::from(["home.set".to_string()]))
        );
    }

    #[tokio::test]
    async fn functional_sensitive_nodes_denied_until_explicitly_granted() {
        let fixture = Fixture::new();
        let id = PrincipalId::from_u128(3);
        fixture.join(id, "bob").await;

        for node in ward_core::SENSITIVE_NODES {
            assert_eq!(fixture.host.overlay_value(id, node), Some(false), "{node}");
        }
        assert!(fixture.manager.add_permission(id, "ward.perm.user.view").await);
        assert_eq!(
            fixture.host.overlay_value(id, "ward.perm.user.view"),
            Some(true)
        );
        for node in ward_core::SENSITIVE_NODES
            .into_iter()
            .filter(|node| *node != "ward.perm.user.view")
        {
            assert_eq!(fixture.host.overlay_value(id, node), Some(false), "{node}");
        }
    }

    #[tokio::test]
    async fn regression_store_failure_leaves_cache_untouched() {
        let fixture = Fixture::new();
        let id = PrincipalId::from_u128(4);
        fixture.join(id, "carol").await;
        assert!(fixture.manager.add_permission(id, "fly.use").await);

        fixture.store.set_unavailable(true);
        assert!(!fixture.manager.add_permission(id, "home.set").await);
        assert!(!fixture.manager.remove_permission(id, "fly.use").await);
        assert!(!fixture.manager.set_prefix(id, "[X] ").await);
        assert_eq!(
            fixture.manager.cached_permissions(id),
            Some(BTreeSet::from(["fly.use".to_string()]))
        );
        assert_eq!(fixture.manager.cached_format(id), Some(DisplayFormat::default()));
        assert_eq!(fixture.host.overlay_value(id, "fly.use"), Some(true));
    }

    #[tokio::test]
    async fn regression_failed_load_is_not_cached_and_still_denies_sensitive_nodes() {
        let fixture = Fixture::new();
        let id = PrincipalId::from_u128(5);
        fixture.host.connect(id, "dave");
        fixture.store.set_unavailable(true);

        assert!(!fixture.manager.load_principal(id).await);
        assert!(!fixture.manager.is_cached(id));
        assert!(fixture.manager.apply_overlay(id).await);
        assert_eq!(fixture.host.overlay_value(id, "ward.perm.reload"), Some(false));
        assert!(fixture.manager.get_permissions(id).await.is_empty());
    }

    #[tokio::test]
    async fn functional_offline_mutation_persists_without_caching() {
        let fixture = Fixture::new();
        let id = PrincipalId::from_u128(6);

        assert!(fixture.manager.add_permission(id, "fly.use").await);
        assert!(!fixture.manager.is_cached(id));
        assert!(!fixture.manager.has_overlay(id));
        assert!(fixture.manager.get_permissions(id).await.contains("fly.use"));
        assert!(!fixture.manager.is_cached(id));
        assert!(!fixture.manager.apply_overlay(id).await);
    }

    #[tokio::test]
    async fn unit_invalid_nodes_are_rejected_before_the_store() {
        let fixture = Fixture::new();
        let id = PrincipalId::from_u128(7);
        assert!(!fixture.manager.add_permission(id, "").await);
        assert!(!fixture.manager.add_permission(id, "fly use").await);
        assert!(!fixture.manager.remove_permission(id, "-").await);
        assert!(fixture.store.list_principals().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn functional_format_changes_publish_and_retract_perm_format() {
        let fixture = Fixture::new();
        let id = PrincipalId::from_u128(8);
        fixture.join(id, "erin").await;

        assert!(fixture.manager.set_prefix(id, "[VIP] ").await);
        assert!(fixture.tags.has_contribution(id, PERM_FORMAT_CONTRIBUTION));
        assert_eq!(fixture.tags.merged(id).prefix, "[VIP] ");
        assert_eq!(
            fixture.host.snapshot(id).expect("snapshot").chat_name,
            "[VIP] erin"
        );
        assert_eq!(
            fixture.manager.get_format(id).await,
            DisplayFormat::new("[VIP] ", "")
        );

        assert!(fixture.manager.set_prefix(id, "").await);
        assert!(!fixture.tags.has_contribution(id, PERM_FORMAT_CONTRIBUTION));
        assert_eq!(fixture.host.snapshot(id).expect("snapshot").chat_name, "erin");
    }

    #[tokio::test]
    async fn functional_release_principal_evicts_and_falls_back_to_store() {
        let fixture = Fixture::new();
        let id = PrincipalId::from_u128(9);
        fixture.join(id, "frank").await;
        assert!(fixture.manager.add_permission(id, "fly.use").await);

        fixture.manager.release_principal(id).await;
        assert!(!fixture.manager.is_cached(id));
        assert!(!fixture.manager.has_overlay(id));
        assert_eq!(fixture.host.snapshot(id).expect("snapshot").overlay, None);

        fixture
            .store
            .insert_permission(id, "home.set")
            .await
            .expect("out-of-band write");
        let fresh = fixture.manager.get_permissions(id).await;
        assert_eq!(
            fresh,
            BTreeSet::from(["fly.use".to_string(), "home.set".to_string()])
        );
    }

    #[tokio::test]
    async fn functional_reload_picks_up_out_of_band_changes() {
        let fixture = Fixture::new();
        let id = PrincipalId::from_u128(10);
        let offline = PrincipalId::from_u128(11);
        fixture.join(id, "grace").await;
        assert!(fixture.manager.load_principal(offline).await);

        fixture
            .store
            .insert_permission(id, "ward.perm.reload")
            .await
            .expect("seed");
        fixture
            .store
            .update_format(id, FormatUpdate::suffix(" *"))
            .await
            .expect("seed format");

        assert_eq!(fixture.manager.reload().await, 1);
        assert_eq!(fixture.manager.cached_principals(), vec![id]);
        assert_eq!(fixture.host.overlay_value(id, "ward.perm.reload"), Some(true));
        assert_eq!(
            fixture.host.snapshot(id).expect("snapshot").roster_name,
            "grace *"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn integration_concurrent_add_and_remove_end_in_a_linear_ordering() {
        let fixture = Fixture::new();
        let id = PrincipalId::from_u128(12);
        fixture.join(id, "heidi").await;

        for _ in 0..16 {
            let adder = {
                let manager = fixture.manager.clone();
                tokio::spawn(async move { manager.add_permission(id, "fly.use").await })
            };
            let remover = {
                let manager = fixture.manager.clone();
                tokio::spawn(async move { manager.remove_permission(id, "fly.use").await })
            };
            assert!(adder.await.expect("adder"));
            assert!(remover.await.expect("remover"));

            let cached = fixture.manager.cached_permissions(id).expect("cached");
            let stored = fixture.store.load_permissions(id).await.expect("stored");
            assert_eq!(cached, stored);
            assert_eq!(
                fixture.host.overlay_value(id, "fly.use"),
                cached.contains("fly.use").then_some(true)
            );
        }
    }

    #[tokio::test]
    async fn functional_shutdown_detaches_every_overlay() {
        let fixture = Fixture::new();
        let first = PrincipalId::from_u128(13);
        let second = PrincipalId::from_u128(14);
        fixture.join(first, "ivan").await;
        fixture.join(second, "judy").await;

        fixture.manager.shutdown().await;
        assert!(fixture.manager.cached_principals().is_empty());
        assert!(!fixture.manager.has_overlay(first));
        assert_eq!(fixture.host.snapshot(second).expect("snapshot").overlay, None);
    }

    #[tokio::test]
    async fn regression_released_principal_only_reaches_the_store() {
        let fixture = Fixture::new();
        let id = PrincipalId::from_u128(15);
        fixture.join(id, "kim").await;

        fixture.manager.release_principal(id).await;
        assert!(fixture.host.is_connected(id));
        assert!(!fixture.manager.is_live(id));

        assert!(fixture.manager.add_permission(id, "fly.use").await);
        assert!(fixture.manager.set_prefix(id, "[VIP] ").await);
        assert!(!fixture.manager.apply_overlay(id).await);
        assert!(!fixture.manager.is_cached(id));
        assert!(!fixture.manager.has_overlay(id));
        assert!(!fixture.tags.has_contribution(id, PERM_FORMAT_CONTRIBUTION));
        assert_eq!(fixture.manager.reload().await, 0);
        assert!(fixture.manager.cached_principals().is_empty());
        assert!(fixture
            .store
            .load_permissions(id)
            .await
            .expect("store")
            .contains("fly.use"));

        assert!(fixture.manager.load_principal(id).await);
        assert!(fixture.manager.is_live(id));
        assert!(fixture.manager.apply_overlay(id).await);
        assert_eq!(fixture.host.overlay_value(id, "fly.use"), Some(true));
    }

    #[tokio::test]
    async fn regression_offline_mutations_do_not_grow_the_lock_table() {
        let fixture = Fixture::new();
        for raw in 100..164u128 {
            let id = PrincipalId::from_u128(raw);
            assert!(fixture.manager.add_permission(id, "fly.use").await);
            assert!(fixture.manager.remove_permission(id, "fly.use").await);
            assert!(fixture.manager.set_prefix(id, "[X] ").await);
            assert!(!fixture.manager.apply_overlay(id).await);
            fixture.manager.load_principal(id).await;
        }
        assert!(fixture.manager.locks.is_empty());
        assert_eq!(fixture.manager.cached_principals().len(), 64);

        let online = PrincipalId::from_u128(200);
        fixture.join(online, "lee").await;
        assert!(fixture.manager.add_permission(online, "fly.use").await);
        assert_eq!(fixture.manager.locks.len(), 1);
        fixture.manager.release_principal(online).await;
        assert!(fixture.manager.locks.is_empty());
    }
}
