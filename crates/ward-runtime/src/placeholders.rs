//! Placeholder values exposed to an optional placeholder provider.

use std::sync::Arc;

use ward_core::{translate_color_codes, PrincipalId, ALT_COLOR_CHAR};
use ward_host::SessionHost;
use ward_perms::PermissionManager;

use crate::afk::AfkTags;

pub const PLACEHOLDER_IDENTIFIER: &str = "ward";

/// A set of placeholders registered under one identifier.
pub trait PlaceholderExpansion: Send + Sync {
    fn identifier(&self) -> &str;
    /// Value of `key` for `id`; `None` when the key is unknown or the
    /// principal is offline.
    fn resolve(&self, id: PrincipalId, key: &str) -> Option<String>;
}

/// Placeholder provider offered by another host plugin.
pub trait PlaceholderRegistry: Send + Sync {
    /// Returns `false` when the provider refused the expansion.
    fn register(&self, expansion: Arc<dyn PlaceholderExpansion>) -> bool;
    fn unregister(&self, identifier: &str);
}

/// Resolves `%ward_<key>%` placeholders from cached state only.
pub struct PlaceholderResolver {
    host: Arc<dyn SessionHost>,
    permissions: Arc<PermissionManager>,
    afk: Arc<AfkTags>,
}

impl PlaceholderResolver {
    pub fn new(
        host: Arc<dyn SessionHost>,
        permissions: Arc<PermissionManager>,
        afk: Arc<AfkTags>,
    ) -> Self {
        Self {
            host,
            permissions,
            afk,
        }
    }
}

impl PlaceholderExpansion for PlaceholderResolver {
    fn identifier(&self) -> &str {
        PLACEHOLDER_IDENTIFIER
    }

    fn resolve(&self, id: PrincipalId, key: &str) -> Option<String> {
        if !self.host.is_connected(id) {
            return None;
        }
        match key {
            "afk" | "afk_status" => Some(self.afk.is_afk(id).to_string()),
            "prefix" => {
                let format = self.permissions.cached_format(id).unwrap_or_default();
                Some(translate_color_codes(ALT_COLOR_CHAR, &format.prefix))
            }
            "suffix" => {
                let format = self.permissions.cached_format(id).unwrap_or_default();
                Some(translate_color_codes(ALT_COLOR_CHAR, &format.suffix))
            }
            "display_name" => self
                .host
                .chat_name(id)
                .or_else(|| self.host.bare_name(id)),
            "permission_count" => Some(
                self.permissions
                    .cached_permissions(id)
                    .map_or(0, |permissions| permissions.len())
                    .to_string(),
            ),
            _ => None,
        }
    }
}
