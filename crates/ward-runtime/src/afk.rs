//! Idle-status tag feature.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use ward_core::PrincipalId;
use ward_tags::{TagContribution, TagEngine, TagError};

use crate::config::AfkConfig;

pub const AFK_CONTRIBUTION: &str = "afk";

#[derive(Debug, Default)]
struct AfkState {
    last_activity: HashMap<PrincipalId, Instant>,
    idle: HashSet<PrincipalId>,
}

/// Marks principals as idle by contributing the `afk` tag.
///
/// The inactivity timer that decides when a principal goes idle lives in the
/// host; it reads [`AfkTags::idle_for`] and calls [`AfkTags::set_afk`].
pub struct AfkTags {
    tags: TagEngine,
    config: AfkConfig,
    state: Mutex<AfkState>,
}

impl AfkTags {
    pub fn new(tags: TagEngine, config: AfkConfig) -> Self {
        Self {
            tags,
            config,
            state: Mutex::new(AfkState::default()),
        }
    }

    /// Starts activity tracking for a newly connected principal.
    pub fn initialize(&self, id: PrincipalId) {
        self.lock().last_activity.insert(id, Instant::now());
    }

    pub fn is_afk(&self, id: PrincipalId) -> bool {
        self.lock().idle.contains(&id)
    }

    /// Time since the last recorded activity of `id`.
    pub fn idle_for(&self, id: PrincipalId) -> Option<Duration> {
        self.lock()
            .last_activity
            .get(&id)
            .map(|last| last.elapsed())
    }

    /// Sets the idle flag. Returns whether it changed; untracked principals
    /// never change.
    pub async fn set_afk(&self, id: PrincipalId, afk: bool) -> Result<bool, TagError> {
        let changed = {
            let mut state = self.lock();
            if !state.last_activity.contains_key(&id) {
                tracing::debug!(principal = %id, "idle status ignored for untracked principal");
                return Ok(false);
            }
            if afk {
                state.idle.insert(id)
            } else {
                state.idle.remove(&id)
            }
        };
        if !changed {
            return Ok(false);
        }
        if afk {
            self.tags
                .set_contribution(
                    id,
                    TagContribution::new(
                        AFK_CONTRIBUTION,
                        self.config.prefix.clone(),
                        self.config.suffix.clone(),
                        self.config.priority,
                    ),
                )
                .await?;
        } else {
            self.tags.remove_contribution(id, AFK_CONTRIBUTION).await?;
        }
        tracing::debug!(principal = %id, afk, "idle status changed");
        Ok(true)
    }

    /// Flips the idle flag and returns the resulting value.
    pub async fn toggle_afk(&self, id: PrincipalId) -> Result<bool, TagError> {
        let afk = !self.is_afk(id);
        self.set_afk(id, afk).await?;
        Ok(self.is_afk(id))
    }

    /// Records activity and clears the idle flag if set. Untracked principals
    /// are ignored.
    pub async fn record_activity(&self, id: PrincipalId) -> Result<(), TagError> {
        {
            let mut state = self.lock();
            match state.last_activity.get_mut(&id) {
                Some(last) => *last = Instant::now(),
                None => return Ok(()),
            }
        }
        if self.is_afk(id) {
            self.set_afk(id, false).await?;
        }
        Ok(())
    }

    /// Drops all tracking for `id`. The contribution itself is purged by the
    /// tag engine when the session ends.
    pub fn forget(&self, id: PrincipalId) {
        let mut state = self.lock();
        state.last_activity.remove(&id);
        state.idle.remove(&id);
    }

    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.last_activity.clear();
        state.idle.clear();
    }

    fn lock(&self) -> MutexGuard<'_, AfkState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
