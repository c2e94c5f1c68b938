use std::collections::BTreeSet;
use std::sync::Arc;

use tempfile::TempDir;
use ward_core::{PrincipalId, SENSITIVE_NODES};
use ward_host::{MemoryHost, MAIN_THREAD_NAME};
use ward_runtime::{WardConfig, WardContext, AFK_CONTRIBUTION};
use ward_store::{PrincipalStore, SqlitePrincipalStore};
use ward_tags::{visual_group_name, TagContribution};

struct Harness {
    _workspace: TempDir,
    store: Arc<SqlitePrincipalStore>,
    host: Arc<MemoryHost>,
    context: Arc<WardContext>,
}

impl Harness {
    async fn start() -> Self {
        let workspace = tempfile::tempdir().expect("tempdir");
        let mut config = WardConfig::default();
        config.database_path = workspace.path().join("ward.sqlite");
        config.hooks.placeholders.enabled = false;

        let store = Arc::new(SqlitePrincipalStore::new(&config.database_path).expect("store"));
        let host = Arc::new(MemoryHost::new());
        let context = WardContext::builder(config, store.clone(), host.clone())
            .init()
            .await
            .expect("init context");
        Self {
            _workspace: workspace,
            store,
            host,
            context,
        }
    }

    async fn join(&self, id: PrincipalId, name: &str) {
        self.host.connect(id, name);
        assert!(self.context.on_session_start(id).await);
    }

    async fn leave(&self, id: PrincipalId) {
        self.context.on_session_end(id).await;
        self.host.disconnect(id);
    }

    /// Asserts chat, roster and visual group all carry the same decoration.
    fn assert_surfaces_agree(&self, id: PrincipalId, expected: &str) {
        let snapshot = self.host.snapshot(id).expect("connected");
        assert_eq!(snapshot.chat_name, expected);
        assert_eq!(snapshot.roster_name, expected);
        let (group, prefix, suffix) = self.host.visual_group_of(id).expect("visual group");
        assert_eq!(group, visual_group_name(id));
        assert_eq!(format!("{prefix}{}{suffix}", snapshot.name), expected);
    }

    async fn stop(self) {
        self.context.teardown().await.expect("teardown");
    }
}

#[tokio::test]
async fn integration_add_remove_round_trip_reaches_store_cache_and_overlay() {
    let harness = Harness::start().await;
    let alice = PrincipalId::from_u128(0xa1);
    let bob = PrincipalId::from_u128(0xb0);
    harness.join(alice, "alice").await;
    harness.join(bob, "bob").await;
    let permissions = harness.context.permissions();

    let (added_alice, added_bob) = tokio::join!(
        permissions.add_permission(alice, "home.set"),
        permissions.add_permission(bob, "-home.set"),
    );
    assert!(added_alice && added_bob);
    assert!(permissions.get_permissions(alice).await.contains("home.set"));
    assert_eq!(harness.host.overlay_value(alice, "home.set"), Some(true));
    assert_eq!(harness.host.overlay_value(bob, "home.set"), Some(false));
    assert!(harness
        .store
        .load_permissions(alice)
        .await
        .expect("load")
        .contains("home.set"));

    assert!(permissions.remove_permission(alice, "home.set").await);
    assert!(!permissions.get_permissions(alice).await.contains("home.set"));
    assert_eq!(harness.host.overlay_value(alice, "home.set"), None);
    assert!(harness
        .store
        .load_permissions(alice)
        .await
        .expect("load")
        .is_empty());
    harness.stop().await;
}

#[tokio::test]
async fn integration_load_principal_is_idempotent() {
    let harness = Harness::start().await;
    let id = PrincipalId::from_u128(0x1d);
    harness
        .store
        .insert_permission(id, "fly.use")
        .await
        .expect("seed");
    harness.join(id, "carol").await;
    let permissions = harness.context.permissions();

    let first = permissions.cached_permissions(id).expect("cached");
    assert!(permissions.load_principal(id).await);
    assert_eq!(permissions.cached_permissions(id).expect("cached"), first);
    assert_eq!(first, BTreeSet::from(["fly.use".to_string()]));
    harness.stop().await;
}

#[tokio::test]
async fn integration_sensitive_nodes_default_deny_until_granted() {
    let harness = Harness::start().await;
    let id = PrincipalId::from_u128(0x5e);
    harness.join(id, "dave").await;
    for node in SENSITIVE_NODES {
        assert_eq!(harness.host.overlay_value(id, node), Some(false), "{node}");
    }

    assert!(
        harness
            .context
            .permissions()
            .add_permission(id, "ward.perm.reload")
            .await
    );
    for node in SENSITIVE_NODES {
        let expected = node == "ward.perm.reload";
        assert_eq!(harness.host.overlay_value(id, node), Some(expected), "{node}");
    }
    harness.stop().await;
}

#[tokio::test]
async fn integration_afk_and_vip_tags_merge_consistently_on_every_surface() {
    let harness = Harness::start().await;
    let id = PrincipalId::from_u128(0x77);
    harness.join(id, "erin").await;
    let tags = harness.context.tags();

    tags.set_contribution(id, TagContribution::new("perm_format", "[VIP] ", "", 50))
        .await
        .expect("vip");
    tags.set_contribution(id, TagContribution::new(AFK_CONTRIBUTION, "[AFK] ", "", 100))
        .await
        .expect("afk");
    assert_eq!(tags.merged(id).prefix, "[AFK] [VIP] ");
    harness.assert_surfaces_agree(id, "[AFK] [VIP] erin");

    assert!(tags
        .remove_contribution(id, AFK_CONTRIBUTION)
        .await
        .expect("remove afk"));
    harness.assert_surfaces_agree(id, "[VIP] erin");

    assert!(tags
        .remove_contribution(id, "perm_format")
        .await
        .expect("remove vip"));
    harness.assert_surfaces_agree(id, "erin");
    assert_eq!(
        harness.host.writer_threads(),
        BTreeSet::from([MAIN_THREAD_NAME.to_string()])
    );
    harness.stop().await;
}

#[tokio::test]
async fn integration_persisted_prefix_and_afk_toggle_compose_on_join() {
    let harness = Harness::start().await;
    let id = PrincipalId::from_u128(0x88);
    assert!(harness.context.permissions().set_prefix(id, "&6[Gold] ").await);
    harness.join(id, "frank").await;
    harness.assert_surfaces_agree(id, "\u{a7}6[Gold] frank");

    assert!(harness
        .context
        .afk()
        .toggle_afk(id)
        .await
        .expect("toggle"));
    harness.assert_surfaces_agree(id, "\u{a7}7[AFK] \u{a7}r\u{a7}6[Gold] frank");
    harness
        .context
        .afk()
        .record_activity(id)
        .await
        .expect("activity");
    harness.assert_surfaces_agree(id, "\u{a7}6[Gold] frank");
    harness.stop().await;
}

#[tokio::test]
async fn integration_session_end_leaves_no_trace_and_falls_back_to_store() {
    let harness = Harness::start().await;
    let id = PrincipalId::from_u128(0xee);
    harness.join(id, "grace").await;
    let permissions = harness.context.permissions();
    assert!(permissions.add_permission(id, "warp.use").await);
    assert!(harness.context.afk().set_afk(id, true).await.expect("afk"));

    harness.leave(id).await;
    assert!(!permissions.is_cached(id));
    assert!(!permissions.has_overlay(id));
    assert!(harness.context.tags().contributions(id).is_empty());
    assert_eq!(harness.host.visual_group_count(), 0);

    assert!(permissions.get_permissions(id).await.contains("warp.use"));
    assert!(!permissions.is_cached(id));
    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn integration_concurrent_add_remove_is_linearizable() {
    let harness = Harness::start().await;
    let id = PrincipalId::from_u128(0xcc);
    harness.join(id, "heidi").await;
    let permissions = harness.context.permissions().clone();

    for round in 0..16 {
        let adder = {
            let permissions = permissions.clone();
            tokio::spawn(async move { permissions.add_permission(id, "kit.daily").await })
        };
        let remover = {
            let permissions = permissions.clone();
            tokio::spawn(async move { permissions.remove_permission(id, "kit.daily").await })
        };
        assert!(adder.await.expect("adder"));
        assert!(remover.await.expect("remover"));

        let cached = permissions.cached_permissions(id).expect("cached");
        let stored = harness.store.load_permissions(id).await.expect("stored");
        assert_eq!(cached, stored, "round {round}");
        assert!(cached.is_empty() || cached == BTreeSet::from(["kit.daily".to_string()]));
        assert_eq!(
            harness.host.overlay_value(id, "kit.daily"),
            cached.contains("kit.daily").then_some(true),
            "round {round}"
        );
        assert!(permissions.remove_permission(id, "kit.daily").await);
    }
    harness.stop().await;
}

#[tokio::test]
async fn regression_double_negated_entry_denies_literal_negated_node() {
    let harness = Harness::start().await;
    let id = PrincipalId::from_u128(0xdd);
    harness.join(id, "ivan").await;
    assert!(harness.context.permissions().add_permission(id, "--fly").await);
    assert_eq!(harness.host.overlay_value(id, "-fly"), Some(false));
    assert_eq!(harness.host.overlay_value(id, "fly"), None);
    harness.stop().await;
}
