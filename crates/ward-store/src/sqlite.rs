//! SQLite-backed `PrincipalStore` implementation with durable persistence.

use crate::{FormatUpdate, PrincipalRecord, PrincipalStore, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use ward_core::{DisplayFormat, PrincipalId};

/// Persistent SQLite store backend for principal permissions and formats.
///
/// Every operation opens its own connection on a blocking worker thread.
#[derive(Debug, Clone)]
pub struct SqlitePrincipalStore {
    db_path: PathBuf,
}

impl SqlitePrincipalStore {
    /// Creates a SQLite-backed store at `path`, creating schema if needed.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { db_path };
        let connection = open_connection(&store.db_path)?;
        initialize_schema(&connection)?;
        tracing::debug!(path = %store.db_path.display(), "principal store schema ready");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    async fn run_blocking<T, F>(&self, operation: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db_path = self.db_path.clone();
        let join = tokio::task::spawn_blocking(move || {
            let mut connection = open_connection(&db_path)?;
            operation(&mut connection)
        });
        join.await
            .map_err(|error| StoreError::Join(format!("sqlite worker failed: {error}")))?
    }
}

fn open_connection(db_path: &Path) -> StoreResult<Connection> {
    let connection = Connection::open(db_path)?;
    connection.busy_timeout(Duration::from_secs(5))?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        "#,
    )?;
    Ok(connection)
}

fn initialize_schema(connection: &Connection) -> StoreResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS principal (
            id TEXT PRIMARY KEY,
            display_name TEXT NULL,
            prefix TEXT NOT NULL DEFAULT '',
            suffix TEXT NOT NULL DEFAULT '',
            updated_at TEXT NULL
        );

        CREATE TABLE IF NOT EXISTS principal_permission (
            id TEXT NOT NULL,
            permission TEXT NOT NULL,
            UNIQUE (id, permission)
        );

        CREATE INDEX IF NOT EXISTS idx_principal_permission_id
            ON principal_permission (id);
        "#,
    )?;
    Ok(())
}

fn insert_principal_if_missing(connection: &Connection, id: &str) -> StoreResult<()> {
    connection.execute(
        "INSERT OR IGNORE INTO principal (id, prefix, suffix, updated_at) VALUES (?1, '', '', ?2)",
        params![id, timestamp_to_db(Utc::now())],
    )?;
    Ok(())
}

#[async_trait]
impl PrincipalStore for SqlitePrincipalStore {
    async fn load_record(&self, id: PrincipalId) -> StoreResult<PrincipalRecord> {
        self.run_blocking(move |connection| {
            let key = id.to_string();
            let row: Option<(Option<String>, String, String, Option<String>)> = connection
                .query_row(
                    "SELECT display_name, prefix, suffix, updated_at FROM principal WHERE id = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;

            let mut statement = connection.prepare(
                "SELECT permission FROM principal_permission WHERE id = ?1 ORDER BY permission",
            )?;
            let permissions = statement
                .query_map(params![key], |row| row.get::<_, String>(0))?
                .collect::<Result<BTreeSet<_>, _>>()?;

            let Some((display_name, prefix, suffix, updated_at)) = row else {
                return Ok(PrincipalRecord {
                    permissions,
                    ..PrincipalRecord::empty(id)
                });
            };
            Ok(PrincipalRecord {
                id,
                display_name,
                permissions,
                format: DisplayFormat::new(prefix, suffix),
                updated_at: option_timestamp_from_db(updated_at)?,
            })
        })
        .await
    }

    async fn load_permissions(&self, id: PrincipalId) -> StoreResult<BTreeSet<String>> {
        self.run_blocking(move |connection| {
            let mut statement = connection.prepare(
                "SELECT permission FROM principal_permission WHERE id = ?1 ORDER BY permission",
            )?;
            let permissions = statement
                .query_map(params![id.to_string()], |row| row.get::<_, String>(0))?
                .collect::<Result<BTreeSet<_>, _>>()?;
            Ok(permissions)
        })
        .await
    }

    async fn load_format(&self, id: PrincipalId) -> StoreResult<DisplayFormat> {
        self.run_blocking(move |connection| {
            let format = connection
                .query_row(
                    "SELECT prefix, suffix FROM principal WHERE id = ?1",
                    params![id.to_string()],
                    |row| Ok(DisplayFormat::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?;
            Ok(format.unwrap_or_default())
        })
        .await
    }

    async fn ensure_principal(
        &self,
        id: PrincipalId,
        display_name: Option<&str>,
    ) -> StoreResult<()> {
        let display_name = display_name.map(ToString::to_string);
        self.run_blocking(move |connection| {
            connection.execute(
                r#"
                INSERT INTO principal (id, display_name, prefix, suffix, updated_at)
                VALUES (?1, ?2, '', '', ?3)
                ON CONFLICT (id) DO UPDATE SET
                    display_name = excluded.display_name,
                    updated_at = excluded.updated_at
                WHERE excluded.display_name IS NOT NULL
                  AND (principal.display_name IS NULL
                       OR principal.display_name <> excluded.display_name)
                "#,
                params![id.to_string(), display_name, timestamp_to_db(Utc::now())],
            )?;
            Ok(())
        })
        .await
    }

    async fn insert_permission(&self, id: PrincipalId, permission: &str) -> StoreResult<bool> {
        let permission = permission.to_string();
        self.run_blocking(move |connection| {
            let key = id.to_string();
            let transaction = connection.transaction()?;
            insert_principal_if_missing(&transaction, &key)?;
            let inserted = transaction.execute(
                "INSERT OR IGNORE INTO principal_permission (id, permission) VALUES (?1, ?2)",
                params![key, permission],
            )?;
            transaction.commit()?;
            Ok(inserted > 0)
        })
        .await
    }

    async fn delete_permission(&self, id: PrincipalId, permission: &str) -> StoreResult<bool> {
        let permission = permission.to_string();
        self.run_blocking(move |connection| {
            let deleted = connection.execute(
                "DELETE FROM principal_permission WHERE id = ?1 AND permission = ?2",
                params![id.to_string(), permission],
            )?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn update_format(
        &self,
        id: PrincipalId,
        update: FormatUpdate,
    ) -> StoreResult<DisplayFormat> {
        self.run_blocking(move |connection| {
            let key = id.to_string();
            let transaction = connection.transaction()?;
            insert_principal_if_missing(&transaction, &key)?;
            transaction.execute(
                r#"
                UPDATE principal
                SET prefix = COALESCE(?2, prefix),
                    suffix = COALESCE(?3, suffix),
                    updated_at = ?4
                WHERE id = ?1
                "#,
                params![key, update.prefix, update.suffix, timestamp_to_db(Utc::now())],
            )?;
            let format = transaction.query_row(
                "SELECT prefix, suffix FROM principal WHERE id = ?1",
                params![key],
                |row| Ok(DisplayFormat::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )?;
            transaction.commit()?;
            Ok(format)
        })
        .await
    }

    async fn list_principals(&self) -> StoreResult<Vec<PrincipalId>> {
        self.run_blocking(|connection| {
            let mut statement = connection.prepare("SELECT id FROM principal ORDER BY id")?;
            let raw_ids = statement
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            let mut ids = raw_ids
                .into_iter()
                .map(|raw| principal_id_from_db(&raw))
                .collect::<StoreResult<Vec<_>>>()?;
            ids.sort();
            Ok(ids)
        })
        .await
    }
}

fn principal_id_from_db(value: &str) -> StoreResult<PrincipalId> {
    value
        .parse::<PrincipalId>()
        .map_err(|_| StoreError::InvalidPersistedValue {
            field: "principal.id",
            value: value.to_string(),
        })
}

fn timestamp_to_db(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn option_timestamp_from_db(value: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    value
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|parsed| parsed.with_timezone(&Utc))
                .map_err(|_| StoreError::InvalidPersistedValue {
                    field: "principal.updated_at",
                    value: raw,
                })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::SqlitePrincipalStore;
    use crate::{FormatUpdate, PrincipalStore, StoreError};
    use rusqlite::{params, Connection};
    use std::collections::BTreeSet;
    use tempfile::tempdir;
    use ward_core::{DisplayFormat, PrincipalId};

    #[tokio::test]
    async fn integration_persists_permissions_and_format_across_reopen() {
        let temp = tempdir().expect("create tempdir");
        let db_path = temp.path().join("nested").join("ward.sqlite");
        let id = PrincipalId::from_u128(0xabc);

        {
            let store = SqlitePrincipalStore::new(&db_path).expect("create sqlite store");
            store
                .ensure_principal(id, Some("alice"))
                .await
                .expect("ensure");
            assert!(store.insert_permission(id, "fly.use").await.expect("insert"));
            assert!(store
                .insert_permission(id, "-ward.perm.reload")
                .await
                .expect("insert deny"));
            store
                .update_format(id, FormatUpdate::prefix("&6[VIP] "))
                .await
                .expect("prefix");
        }

        let reopened = SqlitePrincipalStore::new(&db_path).expect("reopen sqlite store");
        let record = reopened.load_record(id).await.expect("load record");
        assert_eq!(record.display_name.as_deref(), Some("alice"));
        assert_eq!(
            record.permissions,
            BTreeSet::from(["-ward.perm.reload".to_string(), "fly.use".to_string()])
        );
        assert_eq!(record.format, DisplayFormat::new("&6[VIP] ", ""));
        assert!(record.updated_at.is_some());
        assert_eq!(reopened.list_principals().await.expect("list"), vec![id]);
    }

    #[tokio::test]
    async fn functional_duplicate_insert_and_missing_delete_are_no_ops() {
        let temp = tempdir().expect("create tempdir");
        let store = SqlitePrincipalStore::new(temp.path().join("ward.sqlite")).expect("store");
        let id = PrincipalId::from_u128(1);

        assert!(store.insert_permission(id, "a.b").await.expect("first"));
        assert!(!store.insert_permission(id, "a.b").await.expect("second"));
        assert!(store.delete_permission(id, "a.b").await.expect("delete"));
        assert!(!store.delete_permission(id, "a.b").await.expect("again"));
        assert!(store.load_permissions(id).await.expect("load").is_empty());
    }

    #[tokio::test]
    async fn unit_unknown_principal_loads_empty_permissions_and_format() {
        let temp = tempdir().expect("create tempdir");
        let store = SqlitePrincipalStore::new(temp.path().join("ward.sqlite")).expect("store");
        let id = PrincipalId::from_u128(2);

        assert!(store.load_permissions(id).await.expect("perms").is_empty());
        assert_eq!(
            store.load_format(id).await.expect("format"),
            DisplayFormat::default()
        );
        let record = store.load_record(id).await.expect("record");
        assert_eq!(record.display_name, None);
        assert!(store.list_principals().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn functional_ensure_principal_refreshes_name_but_keeps_format() {
        let temp = tempdir().expect("create tempdir");
        let store = SqlitePrincipalStore::new(temp.path().join("ward.sqlite")).expect("store");
        let id = PrincipalId::from_u128(3);

        store
            .update_format(id, FormatUpdate::suffix(" &c*"))
            .await
            .expect("suffix");
        store.ensure_principal(id, Some("old")).await.expect("old");
        store.ensure_principal(id, Some("new")).await.expect("new");
        store.ensure_principal(id, None).await.expect("anonymous");

        let record = store.load_record(id).await.expect("record");
        assert_eq!(record.display_name.as_deref(), Some("new"));
        assert_eq!(record.format, DisplayFormat::new("", " &c*"));
    }

    #[tokio::test]
    async fn regression_corrupt_principal_id_is_reported_not_skipped() {
        let temp = tempdir().expect("create tempdir");
        let db_path = temp.path().join("ward.sqlite");
        let store = SqlitePrincipalStore::new(&db_path).expect("store");
        let connection = Connection::open(&db_path).expect("open");
        connection
            .execute(
                "INSERT INTO principal (id, prefix, suffix) VALUES (?1, '', '')",
                params!["not-a-uuid"],
            )
            .expect("insert corrupt row");

        let error = store.list_principals().await.expect_err("corrupt id");
        assert!(matches!(
            error,
            StoreError::InvalidPersistedValue {
                field: "principal.id",
                ..
            }
        ));
    }
}
