use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

pub const WARD_CONFIG_SCHEMA_VERSION: u32 = 1;
pub const WARD_CONFIG_FILE_NAME: &str = "ward.json";
pub const WARD_STATE_DIR: &str = ".ward";
pub const WARD_DATABASE_FILE_NAME: &str = "ward.sqlite";

pub const DEFAULT_LOG_FILTER: &str = "warn";
pub const DEFAULT_AFK_PREFIX: &str = "&7[AFK] &r";
pub const DEFAULT_AFK_PRIORITY: i32 = 100;
pub const DEFAULT_PERM_FORMAT_PRIORITY: i32 = 50;
pub const DEFAULT_PLACEHOLDER_RETRY_ATTEMPTS: u32 = 8;
pub const DEFAULT_PLACEHOLDER_RETRY_INTERVAL_MS: u64 = 250;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Public struct `WardConfig` used across Ward components.
pub struct WardConfig {
    pub schema_version: u32,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub afk: AfkConfig,
    #[serde(default = "default_perm_format_priority")]
    pub perm_format_priority: i32,
    #[serde(default)]
    pub hooks: HooksConfig,
}

impl Default for WardConfig {
    fn default() -> Self {
        Self {
            schema_version: WARD_CONFIG_SCHEMA_VERSION,
            database_path: default_database_path(),
            log_filter: default_log_filter(),
            afk: AfkConfig::default(),
            perm_format_priority: DEFAULT_PERM_FORMAT_PRIORITY,
            hooks: HooksConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
/// Public struct `AfkConfig` used across Ward components.
pub struct AfkConfig {
    pub prefix: String,
    pub suffix: String,
    pub priority: i32,
}

impl Default for AfkConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_AFK_PREFIX.to_string(),
            suffix: String::new(),
            priority: DEFAULT_AFK_PRIORITY,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
/// Public struct `HooksConfig` used across Ward components.
pub struct HooksConfig {
    pub placeholders: IntegrationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
/// Probe settings of one optional integration.
pub struct IntegrationConfig {
    pub enabled: bool,
    pub retry_attempts: u32,
    pub retry_interval_ms: u64,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retry_attempts: DEFAULT_PLACEHOLDER_RETRY_ATTEMPTS,
            retry_interval_ms: DEFAULT_PLACEHOLDER_RETRY_INTERVAL_MS,
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from(WARD_STATE_DIR).join(WARD_DATABASE_FILE_NAME)
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

fn default_perm_format_priority() -> i32 {
    DEFAULT_PERM_FORMAT_PRIORITY
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from(WARD_STATE_DIR).join(WARD_CONFIG_FILE_NAME)
}

/// Loads `path`, falling back to defaults when the file does not exist.
pub fn load_ward_config(path: &Path) -> Result<WardConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file missing; using defaults");
        return Ok(WardConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read ward config {}", path.display()))?;
    let parsed = serde_json::from_str::<WardConfig>(&raw)
        .with_context(|| format!("failed to parse ward config {}", path.display()))?;
    validate_ward_config(&parsed)?;
    Ok(parsed)
}

pub fn write_ward_config(path: &Path, config: &WardConfig) -> Result<()> {
    validate_ward_config(config)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let mut rendered =
        serde_json::to_string_pretty(config).context("failed to serialize ward config")?;
    rendered.push('\n');
    std::fs::write(path, rendered)
        .with_context(|| format!("failed to write ward config {}", path.display()))
}

pub fn validate_ward_config(config: &WardConfig) -> Result<()> {
    if config.schema_version != WARD_CONFIG_SCHEMA_VERSION {
        bail!(
            "unsupported ward config schema_version {} (expected {})",
            config.schema_version,
            WARD_CONFIG_SCHEMA_VERSION
        );
    }
    if config.database_path.as_os_str().is_empty() {
        bail!("ward config database_path must not be empty");
    }
    if config.log_filter.trim().is_empty() {
        bail!("ward config log_filter must not be empty");
    }
    let placeholders = &config.hooks.placeholders;
    if placeholders.enabled && placeholders.retry_interval_ms == 0 {
        bail!("ward config hooks.placeholders.retry_interval_ms must be greater than 0");
    }
    Ok(())
}
