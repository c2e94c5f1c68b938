//! Permission entry parsing and wildcard coverage.
//!
//! A stored permission string is either a bare node (`a.b.c`, a grant) or a
//! node prefixed with [`NEGATION_MARKER`] (`-a.b.c`, an explicit deny). Only
//! the first marker is consumed, so `--a.b` denies the literal node `-a.b`.

use thiserror::Error;

pub const NEGATION_MARKER: char = '-';
pub const WILDCARD: &str = "*";

const WILDCARD_SUFFIX: &str = ".*";

/// Errors returned when a permission string cannot be stored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error("permission node must not be empty")]
    Empty,
    #[error("permission node '{0}' must not contain whitespace")]
    Whitespace(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `PermissionEntry` values.
pub enum PermissionEntry<'a> {
    Grant(&'a str),
    Deny(&'a str),
}

impl<'a> PermissionEntry<'a> {
    pub fn parse(raw: &'a str) -> Self {
        match raw.strip_prefix(NEGATION_MARKER) {
            Some(node) => Self::Deny(node),
            None => Self::Grant(raw),
        }
    }

    pub fn node(&self) -> &'a str {
        match self {
            Self::Grant(node) | Self::Deny(node) => node,
        }
    }

    /// Value enacted on the host overlay: `true` grants, `false` denies.
    pub fn value(&self) -> bool {
        matches!(self, Self::Grant(_))
    }
}

/// Checks that `raw` can be persisted as a permission string.
pub fn validate_node(raw: &str) -> Result<(), NodeError> {
    if raw.chars().any(char::is_whitespace) {
        return Err(NodeError::Whitespace(raw.to_string()));
    }
    if PermissionEntry::parse(raw).node().is_empty() {
        return Err(NodeError::Empty);
    }
    Ok(())
}

pub fn is_double_negated(raw: &str) -> bool {
    raw.strip_prefix(NEGATION_MARKER)
        .is_some_and(|rest| rest.starts_with(NEGATION_MARKER))
}

/// Returns true when a granted `pattern` covers `node`.
///
/// Coverage is exact equality, the global wildcard `*`, or a `stem.*`
/// pattern whose stem is a dot-separated ancestor of `node`.
pub fn pattern_covers(pattern: &str, node: &str) -> bool {
    if pattern == node || pattern == WILDCARD {
        return true;
    }
    let Some(stem) = pattern.strip_suffix(WILDCARD_SUFFIX) else {
        return false;
    };
    node.strip_prefix(stem)
        .is_some_and(|rest| rest.starts_with('.') && rest.len() > 1)
}

/// Returns true when any grant entry among `permissions` covers `node`.
/// Deny entries never contribute coverage.
pub fn grants_cover<'a, I>(permissions: I, node: &str) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    permissions
        .into_iter()
        .filter_map(|raw| match PermissionEntry::parse(raw) {
            PermissionEntry::Grant(pattern) => Some(pattern),
            PermissionEntry::Deny(_) => None,
        })
        .any(|pattern| pattern_covers(pattern, node))
}
