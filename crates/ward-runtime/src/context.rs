use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use ward_core::PrincipalId;
use ward_host::{MainThread, SessionHost};
use ward_perms::PermissionManager;
use ward_store::PrincipalStore;
use ward_tags::TagEngine;

use crate::afk::AfkTags;
use crate::config::WardConfig;
use crate::error::RuntimeError;
use crate::integration::{Integration, IntegrationState};
use crate::placeholders::{
    PlaceholderExpansion, PlaceholderRegistry, PlaceholderResolver, PLACEHOLDER_IDENTIFIER,
};

type PlaceholderProbe = Box<dyn Fn() -> Option<Arc<dyn PlaceholderRegistry>> + Send + Sync>;

/// Collects the collaborators of a [`WardContext`].
pub struct WardContextBuilder {
    config: WardConfig,
    store: Arc<dyn PrincipalStore>,
    host: Arc<dyn SessionHost>,
    placeholder_probe: Option<PlaceholderProbe>,
}

impl WardContextBuilder {
    /// Looks up the placeholder provider. Without a probe the integration
    /// stays unavailable.
    pub fn placeholder_probe<P>(mut self, probe: P) -> Self
    where
        P: Fn() -> Option<Arc<dyn PlaceholderRegistry>> + Send + Sync + 'static,
    {
        self.placeholder_probe = Some(Box::new(probe));
        self
    }

    /// Spawns the main thread, wires every component and probes optional
    /// integrations. Must run inside a tokio runtime.
    pub async fn init(self) -> Result<Arc<WardContext>, RuntimeError> {
        let Self {
            config,
            store,
            host,
            placeholder_probe,
        } = self;

        let main = MainThread::spawn()?;
        let tags = TagEngine::new(host.clone(), main.clone());
        let permissions = Arc::new(
            PermissionManager::new(store, host.clone(), main.clone(), tags.clone())
                .with_format_priority(config.perm_format_priority),
        );
        let afk = Arc::new(AfkTags::new(tags.clone(), config.afk.clone()));
        let resolver: Arc<dyn PlaceholderExpansion> = Arc::new(PlaceholderResolver::new(
            host.clone(),
            permissions.clone(),
            afk.clone(),
        ));

        let placeholders = Arc::new(Integration::<dyn PlaceholderRegistry>::new(
            "placeholders",
            config.hooks.placeholders.clone(),
            move || placeholder_probe.as_ref().and_then(|probe| probe()),
            move |registry| registry.register(resolver.clone()),
        ));

        let context = Arc::new(WardContext {
            config,
            host,
            main,
            tags,
            permissions,
            afk,
            placeholders,
            retry_task: Mutex::new(None),
        });

        if context.placeholders.trigger("startup") != IntegrationState::Ready {
            let retries = context.placeholders.schedule_retries();
            *context.lock_retry_task() = retries;
        }
        tracing::info!(
            placeholders = context.placeholders.state().as_str(),
            "ward context initialized"
        );
        Ok(context)
    }
}

/// Process-wide owner of every Ward component.
pub struct WardContext {
    config: WardConfig,
    host: Arc<dyn SessionHost>,
    main: MainThread,
    tags: TagEngine,
    permissions: Arc<PermissionManager>,
    afk: Arc<AfkTags>,
    placeholders: Arc<Integration<dyn PlaceholderRegistry>>,
    retry_task: Mutex<Option<JoinHandle<()>>>,
}

impl WardContext {
    pub fn builder(
        config: WardConfig,
        store: Arc<dyn PrincipalStore>,
        host: Arc<dyn SessionHost>,
    ) -> WardContextBuilder {
        WardContextBuilder {
            config,
            store,
            host,
            placeholder_probe: None,
        }
    }

    pub fn config(&self) -> &WardConfig {
        &self.config
    }

    pub fn host(&self) -> &Arc<dyn SessionHost> {
        &self.host
    }

    pub fn main_thread(&self) -> &MainThread {
        &self.main
    }

    pub fn tags(&self) -> &TagEngine {
        &self.tags
    }

    pub fn permissions(&self) -> &Arc<PermissionManager> {
        &self.permissions
    }

    pub fn afk(&self) -> &Arc<AfkTags> {
        &self.afk
    }

    pub fn placeholders(&self) -> &Arc<Integration<dyn PlaceholderRegistry>> {
        &self.placeholders
    }

    /// Loads, enacts and decorates a principal that just connected.
    /// Returns `false` when any step degraded.
    pub async fn on_session_start(&self, id: PrincipalId) -> bool {
        let loaded = self.permissions.load_principal(id).await;
        let enacted = self.permissions.apply_overlay(id).await;
        self.afk.initialize(id);
        let decorated = match self.tags.initialize_principal(id).await {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(principal = %id, %error, "failed to initialize tags");
                false
            }
        };
        let published = self.permissions.publish_format(id).await;
        tracing::debug!(principal = %id, loaded, enacted, "session started");
        loaded && enacted && decorated && published
    }

    /// Drops every trace of a principal whose session ended.
    pub async fn on_session_end(&self, id: PrincipalId) {
        self.permissions.release_principal(id).await;
        self.afk.forget(id);
        if let Err(error) = self.tags.clear_principal(id).await {
            tracing::warn!(principal = %id, %error, "failed to clear tags");
        }
        tracing::debug!(principal = %id, "session ended");
    }

    /// Host announcement that a provider plugin was enabled.
    pub fn on_provider_enabled(&self, provider: &str) -> IntegrationState {
        tracing::debug!(provider, "provider enabled");
        self.placeholders.trigger("provider_enabled")
    }

    /// Host announcement that a provider plugin was disabled.
    pub fn on_provider_disabled(&self, provider: &str) {
        tracing::debug!(provider, "provider disabled");
        self.placeholders.disable();
    }

    /// Shuts components down in reverse construction order and stops the
    /// main thread.
    pub async fn teardown(&self) -> Result<(), RuntimeError> {
        if let Some(task) = self.lock_retry_task().take() {
            task.abort();
        }
        if let Some(registry) = self.placeholders.capability() {
            registry.unregister(PLACEHOLDER_IDENTIFIER);
        }
        self.placeholders.disable();
        self.afk.shutdown();
        self.permissions.shutdown().await;
        self.tags.shutdown().await?;

        let main = self.main.clone();
        tokio::task::spawn_blocking(move || main.shutdown())
            .await
            .map_err(|error| RuntimeError::Join(error.to_string()))?;
        tracing::info!("ward context torn down");
        Ok(())
    }

    fn lock_retry_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.retry_task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
