//! In-process host used by the administrative CLI and by tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use ward_core::PrincipalId;

use crate::host_traits::{PermissionOverlay, PresentationSurfaces, SessionHost, Surface};

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `MemoryHostSnapshot` used across Ward components.
pub struct MemoryHostSnapshot {
    pub name: String,
    pub chat_name: String,
    pub roster_name: String,
    pub overlay: Option<BTreeMap<String, bool>>,
    pub recalculations: u64,
    pub command_refreshes: u64,
}

#[derive(Debug)]
struct AttachedOverlay {
    generation: u64,
    entries: BTreeMap<String, bool>,
}

#[derive(Debug)]
struct MemorySession {
    name: String,
    chat_name: String,
    roster_name: String,
    overlay: Option<AttachedOverlay>,
    recalculations: u64,
    command_refreshes: u64,
}

#[derive(Debug, Default)]
struct MemoryGroup {
    members: BTreeSet<PrincipalId>,
    prefix: String,
    suffix: String,
}

#[derive(Debug, Default)]
struct MemoryHostState {
    sessions: HashMap<PrincipalId, MemorySession>,
    groups: BTreeMap<String, MemoryGroup>,
    next_generation: u64,
    writer_threads: BTreeSet<String>,
}

impl MemoryHostState {
    fn record_writer(&mut self) {
        let name = thread::current()
            .name()
            .unwrap_or("<unnamed>")
            .to_string();
        self.writer_threads.insert(name);
    }
}

/// Host without a game behind it: sessions are connected and disconnected
/// explicitly, every write lands in memory.
#[derive(Debug, Clone)]
pub struct MemoryHost {
    state: Arc<Mutex<MemoryHostState>>,
    supported: BTreeSet<Surface>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::with_surfaces(Surface::ALL)
    }

    pub fn with_surfaces(surfaces: impl IntoIterator<Item = Surface>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryHostState::default())),
            supported: surfaces.into_iter().collect(),
        }
    }

    pub fn connect(&self, id: PrincipalId, name: impl Into<String>) {
        let name = name.into();
        let mut state = self.lock();
        state.sessions.insert(
            id,
            MemorySession {
                chat_name: name.clone(),
                roster_name: name.clone(),
                name,
                overlay: None,
                recalculations: 0,
                command_refreshes: 0,
            },
        );
    }

    pub fn disconnect(&self, id: PrincipalId) {
        self.lock().sessions.remove(&id);
    }

    pub fn snapshot(&self, id: PrincipalId) -> Option<MemoryHostSnapshot> {
        let state = self.lock();
        let session = state.sessions.get(&id)?;
        Some(MemoryHostSnapshot {
            name: session.name.clone(),
            chat_name: session.chat_name.clone(),
            roster_name: session.roster_name.clone(),
            overlay: session
                .overlay
                .as_ref()
                .map(|overlay| overlay.entries.clone()),
            recalculations: session.recalculations,
            command_refreshes: session.command_refreshes,
        })
    }

    pub fn overlay_value(&self, id: PrincipalId, node: &str) -> Option<bool> {
        let state = self.lock();
        state
            .sessions
            .get(&id)?
            .overlay
            .as_ref()?
            .entries
            .get(node)
            .copied()
    }

    /// Group name, prefix and suffix of the visual group `id` belongs to.
    pub fn visual_group_of(&self, id: PrincipalId) -> Option<(String, String, String)> {
        let state = self.lock();
        state
            .groups
            .iter()
            .find(|(_, group)| group.members.contains(&id))
            .map(|(name, group)| (name.clone(), group.prefix.clone(), group.suffix.clone()))
    }

    pub fn visual_group_count(&self) -> usize {
        self.lock().groups.len()
    }

    /// Names of every thread that has written host-visible state.
    pub fn writer_threads(&self) -> BTreeSet<String> {
        self.lock().writer_threads.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryHostState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PresentationSurfaces for MemoryHost {
    fn supports(&self, surface: Surface) -> bool {
        self.supported.contains(&surface)
    }

    fn set_chat_name(&self, id: PrincipalId, value: &str) {
        if !self.supports(Surface::Chat) {
            return;
        }
        let mut state = self.lock();
        state.record_writer();
        if let Some(session) = state.sessions.get_mut(&id) {
            session.chat_name = value.to_string();
        }
    }

    fn chat_name(&self, id: PrincipalId) -> Option<String> {
        if !self.supports(Surface::Chat) {
            return None;
        }
        let state = self.lock();
        state.sessions.get(&id).map(|session| session.chat_name.clone())
    }

    fn set_roster_name(&self, id: PrincipalId, value: &str) {
        if !self.supports(Surface::Roster) {
            return;
        }
        let mut state = self.lock();
        state.record_writer();
        if let Some(session) = state.sessions.get_mut(&id) {
            session.roster_name = value.to_string();
        }
    }

    fn roster_name(&self, id: PrincipalId) -> Option<String> {
        if !self.supports(Surface::Roster) {
            return None;
        }
        let state = self.lock();
        state
            .sessions
            .get(&id)
            .map(|session| session.roster_name.clone())
    }

    fn ensure_visual_group(&self, id: PrincipalId, group: &str) {
        if !self.supports(Surface::VisualGroup) {
            return;
        }
        let mut state = self.lock();
        state.record_writer();
        state
            .groups
            .entry(group.to_string())
            .or_default()
            .members
            .insert(id);
    }

    fn set_visual_group_affixes(&self, group: &str, prefix: &str, suffix: &str) {
        if !self.supports(Surface::VisualGroup) {
            return;
        }
        let mut state = self.lock();
        state.record_writer();
        if let Some(group) = state.groups.get_mut(group) {
            group.prefix = prefix.to_string();
            group.suffix = suffix.to_string();
        }
    }

    fn visual_group_affixes(&self, group: &str) -> Option<(String, String)> {
        if !self.supports(Surface::VisualGroup) {
            return None;
        }
        let state = self.lock();
        state
            .groups
            .get(group)
            .map(|group| (group.prefix.clone(), group.suffix.clone()))
    }

    fn release_visual_group(&self, group: &str) {
        if !self.supports(Surface::VisualGroup) {
            return;
        }
        let mut state = self.lock();
        state.record_writer();
        state.groups.remove(group);
    }
}

impl SessionHost for MemoryHost {
    fn is_connected(&self, id: PrincipalId) -> bool {
        self.lock().sessions.contains_key(&id)
    }

    fn connected_principals(&self) -> Vec<PrincipalId> {
        let mut ids = self.lock().sessions.keys().copied().collect::<Vec<_>>();
        ids.sort();
        ids
    }

    fn bare_name(&self, id: PrincipalId) -> Option<String> {
        self.lock()
            .sessions
            .get(&id)
            .map(|session| session.name.clone())
    }

    fn attach_overlay(&self, id: PrincipalId) -> Option<Box<dyn PermissionOverlay>> {
        let mut state = self.lock();
        state.record_writer();
        state.next_generation = state.next_generation.saturating_add(1);
        let generation = state.next_generation;
        let session = state.sessions.get_mut(&id)?;
        session.overlay = Some(AttachedOverlay {
            generation,
            entries: BTreeMap::new(),
        });
        Some(Box::new(MemoryOverlay {
            state: self.state.clone(),
            id,
            generation,
        }))
    }

    fn recalculate_permissions(&self, id: PrincipalId) {
        let mut state = self.lock();
        state.record_writer();
        if let Some(session) = state.sessions.get_mut(&id) {
            session.recalculations = session.recalculations.saturating_add(1);
        }
    }

    fn refresh_commands(&self, id: PrincipalId) {
        let mut state = self.lock();
        state.record_writer();
        if let Some(session) = state.sessions.get_mut(&id) {
            session.command_refreshes = session.command_refreshes.saturating_add(1);
        }
    }
}

struct MemoryOverlay {
    state: Arc<Mutex<MemoryHostState>>,
    id: PrincipalId,
    generation: u64,
}

impl MemoryOverlay {
    fn write(&self, node: &str, value: bool) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.record_writer();
        let Some(overlay) = state
            .sessions
            .get_mut(&self.id)
            .and_then(|session| session.overlay.as_mut())
        else {
            return;
        };
        if overlay.generation == self.generation {
            overlay.entries.insert(node.to_string(), value);
        }
    }
}

impl PermissionOverlay for MemoryOverlay {
    fn set_grant(&mut self, node: &str) {
        self.write(node, true);
    }

    fn set_deny(&mut self, node: &str) {
        self.write(node, false);
    }

    fn detach(self: Box<Self>) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.record_writer();
        if let Some(session) = state.sessions.get_mut(&self.id) {
            if session
                .overlay
                .as_ref()
                .is_some_and(|overlay| overlay.generation == self.generation)
            {
                session.overlay = None;
            }
        }
    }
}
