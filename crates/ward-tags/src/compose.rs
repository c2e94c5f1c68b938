//! Pure merge of prioritized prefix/suffix fragments.

use ward_core::{translate_color_codes, PrincipalId, ALT_COLOR_CHAR};

const VISUAL_GROUP_PREFIX: &str = "ward_";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `TagContribution` used across Ward components.
pub struct TagContribution {
    pub id: String,
    pub prefix: String,
    pub suffix: String,
    pub priority: i32,
}

impl TagContribution {
    pub fn new(
        id: impl Into<String>,
        prefix: impl Into<String>,
        suffix: impl Into<String>,
        priority: i32,
    ) -> Self {
        Self {
            id: id.into(),
            prefix: prefix.into(),
            suffix: suffix.into(),
            priority,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Merged decoration before color translation.
pub struct MergedTag {
    pub prefix: String,
    pub suffix: String,
}

impl MergedTag {
    pub fn is_empty(&self) -> bool {
        self.prefix.is_empty() && self.suffix.is_empty()
    }
}

/// Merges `contributions`, given in insertion order.
///
/// Higher priority comes first; equal priorities keep insertion order.
pub fn compose(contributions: &[TagContribution]) -> MergedTag {
    let mut ordered = contributions.iter().collect::<Vec<_>>();
    ordered.sort_by(|left, right| right.priority.cmp(&left.priority));
    MergedTag {
        prefix: ordered.iter().map(|entry| entry.prefix.as_str()).collect(),
        suffix: ordered.iter().map(|entry| entry.suffix.as_str()).collect(),
    }
}

/// Values written to each presentation surface for one principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RenderedTag {
    pub(crate) display_name: String,
    pub(crate) group_prefix: String,
    pub(crate) group_suffix: String,
}

impl RenderedTag {
    pub(crate) fn render(merged: &MergedTag, bare_name: &str) -> Self {
        let prefix = translate_color_codes(ALT_COLOR_CHAR, &merged.prefix);
        let suffix = translate_color_codes(ALT_COLOR_CHAR, &merged.suffix);
        Self {
            display_name: format!("{prefix}{bare_name}{suffix}"),
            group_prefix: prefix,
            group_suffix: suffix,
        }
    }
}

/// Name of the visual group scoped to `id`.
pub fn visual_group_name(id: PrincipalId) -> String {
    format!("{VISUAL_GROUP_PREFIX}{}", id.short_hex())
}
