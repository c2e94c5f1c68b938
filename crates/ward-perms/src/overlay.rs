//! Overlay planning and enactment.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use ward_core::{grants_cover, is_double_negated, PermissionEntry, PrincipalId, SENSITIVE_NODES};
use ward_host::{PermissionOverlay, SessionHost};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Ordered grant/deny writes for one overlay. Later writes win.
pub struct OverlayPlan {
    entries: Vec<(String, bool)>,
}

impl OverlayPlan {
    pub fn entries(&self) -> &[(String, bool)] {
        &self.entries
    }

    /// Value the host ends up with for `node` once the plan is enacted.
    pub fn effective(&self, node: &str) -> Option<bool> {
        self.entries
            .iter()
            .rev()
            .find(|(planned, _)| planned == node)
            .map(|(_, value)| *value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Computes the overlay for a cached permission set.
///
/// Sensitive nodes are denied first unless a grant covers them, then every
/// stored string is enacted in sorted order.
pub fn plan_overlay(permissions: &BTreeSet<String>) -> OverlayPlan {
    let mut entries = Vec::with_capacity(SENSITIVE_NODES.len() + permissions.len());
    for node in SENSITIVE_NODES {
        if !grants_cover(permissions.iter().map(String::as_str), node) {
            entries.push((node.to_string(), false));
        }
    }
    for raw in permissions {
        if is_double_negated(raw) {
            tracing::debug!(node = raw.as_str(), "double-negated permission enacted as literal deny");
        }
        let entry = PermissionEntry::parse(raw);
        entries.push((entry.node().to_string(), entry.value()));
    }
    OverlayPlan { entries }
}

/// Owns the live overlay of every connected session.
///
/// `install` and `release` touch host objects and must run on the main
/// thread.
pub struct OverlayManager {
    host: Arc<dyn SessionHost>,
    overlays: Mutex<HashMap<PrincipalId, Box<dyn PermissionOverlay>>>,
}

impl OverlayManager {
    pub fn new(host: Arc<dyn SessionHost>) -> Self {
        Self {
            host,
            overlays: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the overlay of `id` with one built from `plan`, then asks the
    /// host to recalculate permissions and refresh command visibility.
    /// Returns `false` when `id` is not connected.
    pub fn install(&self, id: PrincipalId, plan: &OverlayPlan) -> bool {
        let mut overlays = self.lock();
        if let Some(previous) = overlays.remove(&id) {
            previous.detach();
        }
        let Some(mut overlay) = self.host.attach_overlay(id) else {
            tracing::debug!(principal = %id, "principal not connected; overlay not installed");
            return false;
        };
        for (node, value) in plan.entries() {
            if *value {
                overlay.set_grant(node);
            } else {
                overlay.set_deny(node);
            }
        }
        overlays.insert(id, overlay);
        drop(overlays);

        self.host.recalculate_permissions(id);
        self.host.refresh_commands(id);
        tracing::debug!(principal = %id, entries = plan.len(), "installed permission overlay");
        true
    }

    /// Detaches the overlay of `id` and refreshes command visibility.
    /// Returns whether an overlay existed.
    pub fn release(&self, id: PrincipalId) -> bool {
        let previous = self.lock().remove(&id);
        let existed = previous.is_some();
        if let Some(overlay) = previous {
            overlay.detach();
        }
        self.host.refresh_commands(id);
        existed
    }

    pub fn release_all(&self) -> usize {
        let drained = self.lock().drain().collect::<Vec<_>>();
        let count = drained.len();
        for (id, overlay) in drained {
            overlay.detach();
            self.host.refresh_commands(id);
        }
        count
    }

    pub fn has_overlay(&self, id: PrincipalId) -> bool {
        self.lock().contains_key(&id)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PrincipalId, Box<dyn PermissionOverlay>>> {
        match self.overlays.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
