//! Principal store abstractions and in-memory backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;
use ward_core::{DisplayFormat, PrincipalId};

mod sqlite;

pub use sqlite::SqlitePrincipalStore;

/// Result type for principal store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error("store task failed to complete: {0}")]
    Join(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Public struct `PrincipalRecord` used across Ward components.
///
/// A principal without a row loads as an empty record.
pub struct PrincipalRecord {
    pub id: PrincipalId,
    pub display_name: Option<String>,
    pub permissions: BTreeSet<String>,
    pub format: DisplayFormat,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PrincipalRecord {
    pub fn empty(id: PrincipalId) -> Self {
        Self {
            id,
            display_name: None,
            permissions: BTreeSet::new(),
            format: DisplayFormat::default(),
            updated_at: None,
        }
    }
}

/// Partial prefix/suffix change; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatUpdate {
    pub prefix: Option<String>,
    pub suffix: Option<String>,
}

impl FormatUpdate {
    pub fn prefix(value: impl Into<String>) -> Self {
        Self {
            prefix: Some(value.into()),
            suffix: None,
        }
    }

    pub fn suffix(value: impl Into<String>) -> Self {
        Self {
            prefix: None,
            suffix: Some(value.into()),
        }
    }

    fn apply_to(&self, format: &mut DisplayFormat) {
        if let Some(prefix) = &self.prefix {
            format.prefix = prefix.clone();
        }
        if let Some(suffix) = &self.suffix {
            format.suffix = suffix.clone();
        }
    }
}

/// Async store contract used by the permission manager and the CLI.
#[async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn load_record(&self, id: PrincipalId) -> StoreResult<PrincipalRecord>;

    async fn load_permissions(&self, id: PrincipalId) -> StoreResult<BTreeSet<String>> {
        Ok(self.load_record(id).await?.permissions)
    }

    async fn load_format(&self, id: PrincipalId) -> StoreResult<DisplayFormat> {
        Ok(self.load_record(id).await?.format)
    }

    /// Creates the principal row when missing. A provided display name
    /// replaces the stored one.
    async fn ensure_principal(&self, id: PrincipalId, display_name: Option<&str>)
        -> StoreResult<()>;

    /// Returns `false` when the permission string was already present.
    async fn insert_permission(&self, id: PrincipalId, permission: &str) -> StoreResult<bool>;

    /// Returns `false` when the permission string was not present.
    async fn delete_permission(&self, id: PrincipalId, permission: &str) -> StoreResult<bool>;

    /// Applies `update` and returns the resulting format.
    async fn update_format(&self, id: PrincipalId, update: FormatUpdate)
        -> StoreResult<DisplayFormat>;

    async fn list_principals(&self) -> StoreResult<Vec<PrincipalId>>;
}

/// In-memory implementation for tests and local experimentation.
#[derive(Debug, Default)]
pub struct InMemoryPrincipalStore {
    inner: RwLock<HashMap<PrincipalId, PrincipalRecord>>,
    unavailable: AtomicBool,
}

impl InMemoryPrincipalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every operation fails with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

fn ensure_entry(
    records: &mut HashMap<PrincipalId, PrincipalRecord>,
    id: PrincipalId,
) -> &mut PrincipalRecord {
    records.entry(id).or_insert_with(|| PrincipalRecord {
        updated_at: Some(Utc::now()),
        ..PrincipalRecord::empty(id)
    })
}

#[async_trait]
impl PrincipalStore for InMemoryPrincipalStore {
    async fn load_record(&self, id: PrincipalId) -> StoreResult<PrincipalRecord> {
        self.check_available()?;
        let records = self.inner.read().await;
        Ok(records
            .get(&id)
            .cloned()
            .unwrap_or_else(|| PrincipalRecord::empty(id)))
    }

    async fn ensure_principal(
        &self,
        id: PrincipalId,
        display_name: Option<&str>,
    ) -> StoreResult<()> {
        self.check_available()?;
        let mut records = self.inner.write().await;
        let record = ensure_entry(&mut records, id);
        if let Some(name) = display_name {
            if record.display_name.as_deref() != Some(name) {
                record.display_name = Some(name.to_string());
                record.updated_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn insert_permission(&self, id: PrincipalId, permission: &str) -> StoreResult<bool> {
        self.check_available()?;
        let mut records = self.inner.write().await;
        Ok(ensure_entry(&mut records, id)
            .permissions
            .insert(permission.to_string()))
    }

    async fn delete_permission(&self, id: PrincipalId, permission: &str) -> StoreResult<bool> {
        self.check_available()?;
        let mut records = self.inner.write().await;
        Ok(records
            .get_mut(&id)
            .is_some_and(|record| record.permissions.remove(permission)))
    }

    async fn update_format(
        &self,
        id: PrincipalId,
        update: FormatUpdate,
    ) -> StoreResult<DisplayFormat> {
        self.check_available()?;
        let mut records = self.inner.write().await;
        let record = ensure_entry(&mut records, id);
        update.apply_to(&mut record.format);
        record.updated_at = Some(Utc::now());
        Ok(record.format.clone())
    }

    async fn list_principals(&self) -> StoreResult<Vec<PrincipalId>> {
        self.check_available()?;
        let records = self.inner.read().await;
        let mut ids = records.keys().copied().collect::<Vec<_>>();
        ids.sort();
        Ok(ids)
    }
}
