//! Ward runtime: configuration, the explicit [`WardContext`] and the session
//! lifecycle wiring between permissions, tags and optional integrations.

mod afk;
mod config;
mod context;
mod error;
mod integration;
mod placeholders;

pub use afk::{AfkTags, AFK_CONTRIBUTION};
pub use config::{
    default_config_path, load_ward_config, validate_ward_config, write_ward_config, AfkConfig,
    HooksConfig, IntegrationConfig, WardConfig, DEFAULT_AFK_PREFIX, DEFAULT_AFK_PRIORITY,
    DEFAULT_LOG_FILTER, DEFAULT_PERM_FORMAT_PRIORITY, WARD_CONFIG_FILE_NAME,
    WARD_CONFIG_SCHEMA_VERSION, WARD_DATABASE_FILE_NAME, WARD_STATE_DIR,
};
pub use context::{WardContext, WardContextBuilder};
pub use error::RuntimeError;
pub use integration::{Integration, IntegrationState};
pub use placeholders::{
    PlaceholderExpansion, PlaceholderRegistry, PlaceholderResolver, PLACEHOLDER_IDENTIFIER,
};
