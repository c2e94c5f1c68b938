//! Permission cache and session overlay management.
//!
//! The [`PermissionManager`] keeps a write-through cache of every loaded
//! principal's permission strings and display format, projects them onto the
//! host as a per-session overlay and republishes the `perm_format` tag
//! contribution whenever the format changes.

mod cache;
mod locks;
mod manager;
mod overlay;

pub use cache::{CacheEntry, PermissionCache};
pub use locks::PrincipalLocks;
pub use manager::{PermissionManager, DEFAULT_FORMAT_PRIORITY, PERM_FORMAT_CONTRIBUTION};
pub use overlay::{plan_overlay, OverlayManager, OverlayPlan};
