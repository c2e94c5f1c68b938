use ward_core::PrincipalId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Enumerates supported `Surface` values.
pub enum Surface {
    Chat,
    Roster,
    VisualGroup,
}

impl Surface {
    pub const ALL: [Surface; 3] = [Surface::Chat, Surface::Roster, Surface::VisualGroup];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Roster => "roster",
            Self::VisualGroup => "visual_group",
        }
    }
}

/// Live grant/deny entries registered with the host for one session.
///
/// Later writes for the same node replace earlier ones.
pub trait PermissionOverlay: Send {
    fn set_grant(&mut self, node: &str);
    fn set_deny(&mut self, node: &str);
    /// Unregisters the overlay from the host.
    fn detach(self: Box<Self>);
}

/// Places where a principal's decorated identity is shown.
///
/// Setters for unsupported surfaces are never called.
pub trait PresentationSurfaces: Send + Sync {
    fn supports(&self, surface: Surface) -> bool;

    fn set_chat_name(&self, id: PrincipalId, value: &str);
    fn chat_name(&self, id: PrincipalId) -> Option<String>;

    fn set_roster_name(&self, id: PrincipalId, value: &str);
    fn roster_name(&self, id: PrincipalId) -> Option<String>;

    /// Creates the scoped visual group when missing and makes `id` a member.
    fn ensure_visual_group(&self, id: PrincipalId, group: &str);
    fn set_visual_group_affixes(&self, group: &str, prefix: &str, suffix: &str);
    fn visual_group_affixes(&self, group: &str) -> Option<(String, String)>;
    fn release_visual_group(&self, group: &str);
}

/// Session-level view of the host.
pub trait SessionHost: PresentationSurfaces {
    fn is_connected(&self, id: PrincipalId) -> bool;
    fn connected_principals(&self) -> Vec<PrincipalId>;
    /// Undecorated name of a connected principal.
    fn bare_name(&self, id: PrincipalId) -> Option<String>;
    /// Registers a fresh, empty overlay. Returns `None` when `id` is offline.
    fn attach_overlay(&self, id: PrincipalId) -> Option<Box<dyn PermissionOverlay>>;
    fn recalculate_permissions(&self, id: PrincipalId);
    fn refresh_commands(&self, id: PrincipalId);
}
