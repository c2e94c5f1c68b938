//! Optional capabilities provided by other host plugins.
//!
//! Each integration is probed at startup, when the host announces that a
//! provider became available, and on a bounded retry schedule. A probe that
//! is already running turns concurrent triggers into no-ops.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::IntegrationConfig;

type ProbeFn<C> = Box<dyn Fn() -> Option<Arc<C>> + Send + Sync>;
type ActivateFn<C> = Box<dyn Fn(&C) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `IntegrationState` values.
pub enum IntegrationState {
    Uninitialized,
    Probing,
    Ready,
    Unavailable,
}

impl IntegrationState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Probing => "probing",
            Self::Ready => "ready",
            Self::Unavailable => "unavailable",
        }
    }
}

enum Slot<C: ?Sized> {
    Uninitialized,
    Probing,
    Ready(Arc<C>),
    Unavailable,
}

impl<C: ?Sized> Slot<C> {
    fn state(&self) -> IntegrationState {
        match self {
            Self::Uninitialized => IntegrationState::Uninitialized,
            Self::Probing => IntegrationState::Probing,
            Self::Ready(_) => IntegrationState::Ready,
            Self::Unavailable => IntegrationState::Unavailable,
        }
    }
}

/// State machine around one optional capability `C`.
pub struct Integration<C: ?Sized + Send + Sync + 'static> {
    name: &'static str,
    config: IntegrationConfig,
    probe: ProbeFn<C>,
    activate: ActivateFn<C>,
    slot: Mutex<Slot<C>>,
}

impl<C: ?Sized + Send + Sync + 'static> Integration<C> {
    /// `probe` looks the capability up; `activate` wires Ward into it and
    /// returns `false` when the capability refused.
    pub fn new<P, A>(name: &'static str, config: IntegrationConfig, probe: P, activate: A) -> Self
    where
        P: Fn() -> Option<Arc<C>> + Send + Sync + 'static,
        A: Fn(&C) -> bool + Send + Sync + 'static,
    {
        Self {
            name,
            config,
            probe: Box::new(probe),
            activate: Box::new(activate),
            slot: Mutex::new(Slot::Uninitialized),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> IntegrationState {
        self.lock().state()
    }

    pub fn capability(&self) -> Option<Arc<C>> {
        match &*self.lock() {
            Slot::Ready(capability) => Some(capability.clone()),
            _ => None,
        }
    }

    /// Probes for the capability unless it is ready, disabled or already
    /// being probed. Returns the state after this trigger.
    pub fn trigger(&self, reason: &str) -> IntegrationState {
        if !self.config.enabled {
            return IntegrationState::Unavailable;
        }
        {
            let mut slot = self.lock();
            match *slot {
                Slot::Ready(_) | Slot::Probing => return slot.state(),
                Slot::Uninitialized | Slot::Unavailable => *slot = Slot::Probing,
            }
        }

        let resolved = (self.probe)().filter(|capability| (self.activate)(capability.as_ref()));
        let mut slot = self.lock();
        *slot = match resolved {
            Some(capability) => {
                tracing::info!(integration = self.name, reason, "integration ready");
                Slot::Ready(capability)
            }
            None => {
                tracing::debug!(integration = self.name, reason, "integration unavailable");
                Slot::Unavailable
            }
        };
        slot.state()
    }

    /// Returns to `Unavailable`, e.g. when the provider was disabled.
    pub fn disable(&self) {
        let mut slot = self.lock();
        if matches!(*slot, Slot::Ready(_)) {
            tracing::info!(integration = self.name, "integration disabled");
        }
        *slot = Slot::Unavailable;
    }

    /// Re-triggers every `retry_interval_ms` until ready or the configured
    /// number of attempts is spent.
    pub fn schedule_retries(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.config.enabled || self.config.retry_attempts == 0 {
            return None;
        }
        let integration = Arc::clone(self);
        let attempts = self.config.retry_attempts;
        let period = Duration::from_millis(self.config.retry_interval_ms.max(1));
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            for attempt in 1..=attempts {
                interval.tick().await;
                if integration.state() == IntegrationState::Ready {
                    return;
                }
                if integration.trigger("retry") == IntegrationState::Ready {
                    return;
                }
                tracing::trace!(integration = integration.name, attempt, "integration retry");
            }
        }))
    }

    fn lock(&self) -> MutexGuard<'_, Slot<C>> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
