//! Host boundary contracts for permission overlays and presentation surfaces.
//!
//! The host application owns live sessions, a native permission-check
//! mechanism and several places where a principal's decorated name is shown.
//! Ward only talks to it through the traits in this crate, and only from the
//! single [`MainThread`].

mod host_traits;
mod main_thread;
mod memory_host;

pub use host_traits::{PermissionOverlay, PresentationSurfaces, SessionHost, Surface};
pub use main_thread::{MainThread, MainThreadError, MAIN_THREAD_NAME};
pub use memory_host::{MemoryHost, MemoryHostSnapshot};
