use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use ward_core::PrincipalId;
use ward_host::{MainThread, MainThreadError, SessionHost, Surface};

use crate::compose::{compose, visual_group_name, MergedTag, RenderedTag, TagContribution};

const PUBLISH_ATTEMPTS: usize = 2;

/// Errors returned by the tag composition engine.
#[derive(Debug, Error)]
pub enum TagError {
    #[error("surface '{surface}' of principal {principal} does not reflect the merged tag")]
    SurfaceMismatch {
        principal: PrincipalId,
        surface: &'static str,
    },
    #[error(transparent)]
    MainThread(#[from] MainThreadError),
}

/// Merges tag contributions per principal and mirrors the result onto every
/// supported presentation surface.
///
/// Contribution bookkeeping is callable from any thread. Publishing always
/// happens on the [`MainThread`] and reads the contribution set at publish
/// time, so the last queued publish for a principal reflects its latest state.
///
/// Contributions are only accepted between [`TagEngine::initialize_principal`]
/// and [`TagEngine::clear_principal`]; anything else is dropped.
#[derive(Clone)]
pub struct TagEngine {
    inner: Arc<TagEngineInner>,
}

struct TagEngineInner {
    host: Arc<dyn SessionHost>,
    main: MainThread,
    state: Mutex<TagState>,
}

#[derive(Default)]
struct TagState {
    sessions: HashSet<PrincipalId>,
    contributions: HashMap<PrincipalId, Vec<TagContribution>>,
}

impl TagEngine {
    pub fn new(host: Arc<dyn SessionHost>, main: MainThread) -> Self {
        Self {
            inner: Arc::new(TagEngineInner {
                host,
                main,
                state: Mutex::new(TagState::default()),
            }),
        }
    }

    /// Inserts or replaces the contribution with the same id, then republishes.
    /// Returns `false` without storing anything when `id` has no active
    /// session.
    ///
    /// A replaced contribution keeps its original insertion position.
    pub async fn set_contribution(
        &self,
        id: PrincipalId,
        contribution: TagContribution,
    ) -> Result<bool, TagError> {
        {
            let mut state = self.inner.lock();
            if !state.sessions.contains(&id) {
                tracing::debug!(
                    principal = %id,
                    contribution = contribution.id.as_str(),
                    "no active session; tag contribution dropped"
                );
                return Ok(false);
            }
            tracing::debug!(
                principal = %id,
                contribution = contribution.id.as_str(),
                priority = contribution.priority,
                "setting tag contribution"
            );
            let entries = state.contributions.entry(id).or_default();
            match entries.iter_mut().find(|entry| entry.id == contribution.id) {
                Some(existing) => *existing = contribution,
                None => entries.push(contribution),
            }
        }
        self.republish(id).await?;
        Ok(true)
    }

    /// Removes a contribution and republishes. Returns whether it existed;
    /// principals without a session are left alone.
    pub async fn remove_contribution(
        &self,
        id: PrincipalId,
        contribution_id: &str,
    ) -> Result<bool, TagError> {
        let removed = {
            let mut state = self.inner.lock();
            if !state.sessions.contains(&id) {
                return Ok(false);
            }
            let contributions = &mut state.contributions;
            let removed = match contributions.get_mut(&id) {
                Some(entries) => {
                    let before = entries.len();
                    entries.retain(|entry| entry.id != contribution_id);
                    entries.len() != before
                }
                None => false,
            };
            if contributions.get(&id).is_some_and(Vec::is_empty) {
                contributions.remove(&id);
            }
            removed
        };
        if removed {
            tracing::debug!(principal = %id, contribution = contribution_id, "removed tag contribution");
        }
        self.republish(id).await?;
        Ok(removed)
    }

    pub fn has_contribution(&self, id: PrincipalId, contribution_id: &str) -> bool {
        self.inner.lock().contributions.get(&id).is_some_and(|entries| {
            entries.iter().any(|entry| entry.id == contribution_id)
        })
    }

    /// Contributions of `id` in insertion order.
    pub fn contributions(&self, id: PrincipalId) -> Vec<TagContribution> {
        self.inner
            .lock()
            .contributions
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn merged(&self, id: PrincipalId) -> MergedTag {
        self.inner.merged(id)
    }

    /// Opens the session of a newly connected principal, creates its visual
    /// group and publishes whatever contributions already exist.
    pub async fn initialize_principal(&self, id: PrincipalId) -> Result<(), TagError> {
        self.inner.lock().sessions.insert(id);
        self.republish(id).await
    }

    pub fn has_session(&self, id: PrincipalId) -> bool {
        self.inner.lock().sessions.contains(&id)
    }

    /// Closes the session of `id`, drops every contribution and releases its
    /// visual group.
    pub async fn clear_principal(&self, id: PrincipalId) -> Result<(), TagError> {
        {
            let mut state = self.inner.lock();
            state.sessions.remove(&id);
            state.contributions.remove(&id);
        }
        let inner = self.inner.clone();
        self.inner.main.call(move || inner.reset(id)).await?;
        tracing::debug!(principal = %id, "cleared tag contributions");
        Ok(())
    }

    /// Resets every connected principal to its bare name and releases all
    /// visual groups.
    pub async fn shutdown(&self) -> Result<(), TagError> {
        let tracked = {
            let mut state = self.inner.lock();
            state.contributions.clear();
            state.sessions.drain().collect::<Vec<_>>()
        };
        let inner = self.inner.clone();
        self.inner
            .main
            .call(move || {
                let mut principals = inner.host.connected_principals();
                principals.extend(tracked);
                principals.sort();
                principals.dedup();
                for id in principals {
                    inner.reset(id);
                }
            })
            .await?;
        Ok(())
    }

    async fn republish(&self, id: PrincipalId) -> Result<(), TagError> {
        let inner = self.inner.clone();
        self.inner.main.call(move || inner.publish(id)).await?
    }
}

impl TagEngineInner {
    fn lock(&self) -> MutexGuard<'_, TagState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn merged(&self, id: PrincipalId) -> MergedTag {
        self.lock()
            .contributions
            .get(&id)
            .map(|entries| compose(entries))
            .unwrap_or_default()
    }

    fn publish(&self, id: PrincipalId) -> Result<(), TagError> {
        let Some(bare_name) = self.host.bare_name(id) else {
            tracing::trace!(principal = %id, "principal offline; tag publish skipped");
            return Ok(());
        };
        let rendered = RenderedTag::render(&self.merged(id), &bare_name);
        let group = visual_group_name(id);

        let mut mismatch = None;
        for attempt in 1..=PUBLISH_ATTEMPTS {
            self.write_surfaces(id, &group, &rendered);
            mismatch = self.first_mismatch(id, &group, &rendered);
            let Some(surface) = mismatch else {
                return Ok(());
            };
            tracing::warn!(
                principal = %id,
                surface = surface.as_str(),
                attempt,
                "presentation surface does not reflect merged tag"
            );
        }
        match mismatch {
            Some(surface) => Err(TagError::SurfaceMismatch {
                principal: id,
                surface: surface.as_str(),
            }),
            None => Ok(()),
        }
    }

    fn write_surfaces(&self, id: PrincipalId, group: &str, rendered: &RenderedTag) {
        let host = &self.host;
        if host.supports(Surface::Chat) {
            host.set_chat_name(id, &rendered.display_name);
        }
        if host.supports(Surface::Roster) {
            host.set_roster_name(id, &rendered.display_name);
        }
        if host.supports(Surface::VisualGroup) {
            host.ensure_visual_group(id, group);
            host.set_visual_group_affixes(group, &rendered.group_prefix, &rendered.group_suffix);
        }
    }

    fn first_mismatch(&self, id: PrincipalId, group: &str, rendered: &RenderedTag) -> Option<Surface> {
        let host = &self.host;
        Surface::ALL.into_iter().find(|surface| {
            if !host.supports(*surface) {
                return false;
            }
            match surface {
                Surface::Chat => host.chat_name(id).as_deref() != Some(rendered.display_name.as_str()),
                Surface::Roster => {
                    host.roster_name(id).as_deref() != Some(rendered.display_name.as_str())
                }
                Surface::VisualGroup => {
                    host.visual_group_affixes(group)
                        != Some((rendered.group_prefix.clone(), rendered.group_suffix.clone()))
                }
            }
        })
    }

    fn reset(&self, id: PrincipalId) {
        let host = &self.host;
        if let Some(bare_name) = host.bare_name(id) {
            if host.supports(Surface::Chat) {
                host.set_chat_name(id, &bare_name);
            }
            if host.supports(Surface::Roster) {
                host.set_roster_name(id, &bare_name);
            }
        }
        if host.supports(Surface::VisualGroup) {
            host.release_visual_group(&visual_group_name(id));
        }
    }
}
