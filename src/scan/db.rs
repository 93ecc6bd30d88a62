use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};

use super::models::{Job, JobId};
use super::store::JobStore;
use crate::errors::StoreError;

/// Cloneable, shareable owner of the one `ScanDb` connection.
///
/// rusqlite calls block, so every query is shipped to a `spawn_blocking`
/// thread and serialized on the connection mutex.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<ScanDb>>,
}

impl DbHandle {
    pub fn new(db: ScanDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(ScanDb::new(path)?))
    }

    /// Run `query` against the connection off the async runtime.
    pub async fn blocking<F, R>(&self, query: F) -> Result<R>
    where
        F: FnOnce(&ScanDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let shared = Arc::clone(&self.inner);
        let joined = tokio::task::spawn_blocking(move || match shared.lock() {
            Ok(db) => query(&db),
            Err(_) => Err(anyhow::anyhow!("scan database mutex poisoned by an earlier query")),
        })
        .await;
        joined.context("scan database query did not complete")?
    }
}

pub struct ScanDb {
    conn: Connection,
}

impl ScanDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run migrations")?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run migrations")?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS jobs (
                    id TEXT PRIMARY KEY NOT NULL,
                    record TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    /// Insert or replace the record stored under `id`.
    pub fn upsert_record(&self, id: &str, record: &str, updated_at: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO jobs (id, record, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET record = excluded.record,
                                               updated_at = excluded.updated_at",
                params![id, record, updated_at],
            )
            .context("Failed to upsert job record")?;
        Ok(())
    }

    pub fn get_record(&self, id: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT record FROM jobs WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read job record")
    }

    pub fn list_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM jobs")
            .context("Failed to prepare job listing")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("Failed to list job ids")?;
        Ok(ids)
    }
}

/// `JobStore` backed by a single SQLite table of JSON records.
pub struct SqliteStore {
    db: DbHandle,
}

impl SqliteStore {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }
}

fn backend(err: anyhow::Error) -> StoreError {
    StoreError::Backend(format!("{:#}", err))
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn put(&self, job: &Job) -> Result<(), StoreError> {
        let record = serde_json::to_string(job).map_err(|source| StoreError::Encode {
            id: job.id.clone(),
            source,
        })?;
        let id = job.id.clone();
        let updated_at = job.updated_at.to_rfc3339();
        self.db
            .blocking(move |db| db.upsert_record(&id, &record, &updated_at))
            .await
            .map_err(backend)
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let key = id.to_string();
        let record = self
            .db
            .blocking(move |db| db.get_record(&key))
            .await
            .map_err(backend)?;
        record
            .map(|text| {
                serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
                    id: id.to_string(),
                    source,
                })
            })
            .transpose()
    }

    async fn list(&self) -> Result<Vec<JobId>, StoreError> {
        self.db.blocking(|db| db.list_ids()).await.map_err(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> SqliteStore {
        SqliteStore::new(DbHandle::new(ScanDb::new_in_memory().unwrap()))
    }

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = ScanDb::new_in_memory()?;
        let count: i64 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'jobs'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(count, 1);
        // Migrations are idempotent.
        db.run_migrations()?;
        Ok(())
    }

    #[test]
    fn test_upsert_replaces_record() -> Result<()> {
        let db = ScanDb::new_in_memory()?;
        db.upsert_record("a", "{\"v\":1}", "t1")?;
        db.upsert_record("a", "{\"v\":2}", "t2")?;
        assert_eq!(db.get_record("a")?.as_deref(), Some("{\"v\":2}"));
        assert_eq!(db.list_ids()?, vec!["a".to_string()]);
        assert!(db.get_record("b")?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_sqlite_store_round_trips_jobs() {
        let store = store();
        let mut job = Job::new("https://example.com/repo");
        store.put(&job).await.unwrap();
        assert_eq!(store.get(&job.id).await.unwrap(), Some(job.clone()));

        job.complete(json!({"metrics": {"_totals": {"SEVERITY.HIGH": 0}}}), true)
            .unwrap();
        job.touch();
        store.put(&job).await.unwrap();

        let stored = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored, job);
        assert_eq!(store.list().await.unwrap(), vec![job.id.clone()]);
    }

    #[tokio::test]
    async fn test_sqlite_store_unknown_id_is_none() {
        let store = store();
        assert!(store.get("does-not-exist").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_store_reports_corrupt_record() {
        let store = store();
        store
            .db
            .blocking(|db| db.upsert_record("broken", "not json", "t"))
            .await
            .unwrap();
        let err = store.get("broken").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { ref id, .. } if id == "broken"));
    }

    #[tokio::test]
    async fn test_sqlite_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scans.db");
        let job = Job::new("https://example.com/repo");
        {
            let store = SqliteStore::new(DbHandle::open(&path).unwrap());
            store.put(&job).await.unwrap();
        }
        let store = SqliteStore::new(DbHandle::open(&path).unwrap());
        assert_eq!(store.get(&job.id).await.unwrap(), Some(job));
    }
}
