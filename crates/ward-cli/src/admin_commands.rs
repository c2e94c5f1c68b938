use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::json;
use ward_core::{translate_color_codes, validate_node, PrincipalId, ALT_COLOR_CHAR};
use ward_host::MemoryHost;
use ward_runtime::{load_ward_config, write_ward_config, WardConfig, WardContext};
use ward_store::SqlitePrincipalStore;

use crate::cli_args::{UserAction, WardCommand};

/// Runs `command` and returns the report printed on success.
pub(crate) async fn execute_ward_command(
    command: &WardCommand,
    config_path: &Path,
    config: WardConfig,
) -> Result<String> {
    match command {
        WardCommand::Init { force } => execute_init(config_path, &config, *force),
        WardCommand::User { principal, action } => {
            with_runtime(config, |context| execute_user(context, *principal, action)).await
        }
        WardCommand::Reload => {
            with_runtime(config, |context| async move {
                let reloaded = context.permissions().reload().await;
                Ok(format!("Permissions reloaded ({reloaded} connected principals)."))
            })
            .await
        }
    }
}

/// Resolves the effective config: file (or defaults), then the database
/// override.
pub(crate) fn resolve_ward_config(
    config_path: &Path,
    database_override: Option<&Path>,
) -> Result<WardConfig> {
    let mut config = load_ward_config(config_path)?;
    if let Some(database) = database_override {
        config.database_path = database.to_path_buf();
    }
    Ok(config)
}

fn execute_init(config_path: &Path, config: &WardConfig, force: bool) -> Result<String> {
    let wrote_config = if config_path.exists() && !force {
        false
    } else {
        write_ward_config(config_path, config)?;
        true
    };
    let store = SqlitePrincipalStore::new(&config.database_path).with_context(|| {
        format!(
            "failed to initialize database {}",
            config.database_path.display()
        )
    })?;
    let config_line = if wrote_config {
        format!("Wrote config {}", config_path.display())
    } else {
        format!("Kept existing config {}", config_path.display())
    };
    Ok(format!(
        "{config_line}\nDatabase ready at {}",
        store.path().display()
    ))
}

async fn with_runtime<F, Fut>(mut config: WardConfig, run: F) -> Result<String>
where
    F: FnOnce(Arc<WardContext>) -> Fut,
    Fut: std::future::Future<Output = Result<String>>,
{
    // No placeholder provider exists outside the host.
    config.hooks.placeholders.enabled = false;
    let store = SqlitePrincipalStore::new(&config.database_path).with_context(|| {
        format!("failed to open database {}", config.database_path.display())
    })?;
    let context = WardContext::builder(config, Arc::new(store), Arc::new(MemoryHost::new()))
        .init()
        .await
        .context("failed to start ward runtime")?;
    let outcome = run(context.clone()).await;
    context
        .teardown()
        .await
        .context("failed to stop ward runtime")?;
    outcome
}

async fn execute_user(
    context: Arc<WardContext>,
    id: PrincipalId,
    action: &UserAction,
) -> Result<String> {
    let permissions = context.permissions();
    match action {
        UserAction::Add { node } => {
            validate_node(node).with_context(|| format!("invalid permission '{node}'"))?;
            if !permissions.add_permission(id, node).await {
                bail!("failed to add permission '{node}' to {id}");
            }
            Ok(format!("Added permission '{node}' to {id}."))
        }
        UserAction::Remove { node } => {
            validate_node(node).with_context(|| format!("invalid permission '{node}'"))?;
            if !permissions.remove_permission(id, node).await {
                bail!("failed to remove permission '{node}' from {id}");
            }
            Ok(format!("Removed permission '{node}' from {id}."))
        }
        UserAction::List => {
            let entries = permissions.get_permissions(id).await;
            let mut lines = vec![format!("=== Permissions for {id} ===")];
            if entries.is_empty() {
                lines.push("No permissions set.".to_string());
            }
            for entry in &entries {
                let marker = if entry.starts_with('-') { '-' } else { '+' };
                lines.push(format!("  {marker} {entry}"));
            }
            Ok(lines.join("\n"))
        }
        UserAction::Info { json } => {
            let format = permissions.get_format(id).await;
            let entries = permissions.get_permissions(id).await;
            if *json {
                let rendered = json!({
                    "id": id,
                    "prefix": format.prefix,
                    "suffix": format.suffix,
                    "permissions": entries,
                });
                return serde_json::to_string_pretty(&rendered)
                    .context("failed to render principal info");
            }
            Ok([
                format!("=== User Info: {id} ==="),
                format!("Prefix: '{}'", format.prefix),
                format!("Suffix: '{}'", format.suffix),
                format!("Permissions: {}", entries.len()),
            ]
            .join("\n"))
        }
        UserAction::Prefix { value } => {
            let prefix = join_format_words(value);
            if !permissions.set_prefix(id, &prefix).await {
                bail!("failed to set prefix for {id}");
            }
            Ok(format!(
                "Set prefix for {id} to: {}",
                translate_color_codes(ALT_COLOR_CHAR, &prefix)
            ))
        }
        UserAction::Suffix { value } => {
            let suffix = join_format_words(value);
            if !permissions.set_suffix(id, &suffix).await {
                bail!("failed to set suffix for {id}");
            }
            Ok(format!(
                "Set suffix for {id} to: {}",
                translate_color_codes(ALT_COLOR_CHAR, &suffix)
            ))
        }
    }
}

/// Joins shell words with single spaces and strips one pair of surrounding
/// double quotes.
fn join_format_words(words: &[String]) -> String {
    let joined = words.join(" ");
    if joined.len() > 1 && joined.starts_with('"') && joined.ends_with('"') {
        joined[1..joined.len() - 1].to_string()
    } else {
        joined
    }
}
