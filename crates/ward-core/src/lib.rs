//! Domain primitives shared across Ward crates.
//!
//! Provides principal identifiers, permission entry parsing with wildcard
//! coverage, the sensitive-node list, and display-format helpers used by the
//! permission cache and the tag composition engine.

pub mod color;
pub mod format;
pub mod node;
pub mod principal;
pub mod sensitive;

pub use color::{translate_color_codes, ALT_COLOR_CHAR, SECTION_SIGN};
pub use format::DisplayFormat;
pub use node::{
    grants_cover, is_double_negated, pattern_covers, validate_node, NodeError, PermissionEntry,
    NEGATION_MARKER, WILDCARD,
};
pub use principal::PrincipalId;
pub use sensitive::{is_sensitive_node, SENSITIVE_NODES};
