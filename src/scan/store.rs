use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::db::{DbHandle, SqliteStore};
use super::models::{Job, JobId};
use super::redis_store::RedisStore;
use crate::config::{StorageBackend, StorageConfig};
use crate::errors::StoreError;

/// Durable key-value persistence of job records.
///
/// `put` replaces the whole record stored under `job.id`. Each write is
/// atomic per key: readers see either the previous or the new record.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn put(&self, job: &Job) -> Result<(), StoreError>;

    /// `Ok(None)` when no record exists under `id`.
    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError>;

    async fn list(&self) -> Result<Vec<JobId>, StoreError>;
}

/// Process-local store used by tests and the one-shot `scan` command.
#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn put(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<JobId>, StoreError> {
        Ok(self.jobs.read().await.keys().cloned().collect())
    }
}

/// Open the backend selected by `[storage]`.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn JobStore>> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageBackend::Sqlite => {
            if let Some(parent) = config.path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
            let db = DbHandle::open(&config.path)
                .with_context(|| format!("Failed to open {}", config.path.display()))?;
            Ok(Arc::new(SqliteStore::new(db)))
        }
        StorageBackend::Redis => {
            let store = RedisStore::connect(config.redis_connection_info(), &config.key_prefix)
                .await
                .with_context(|| {
                    format!("Failed to connect to redis at {}", config.redis_endpoint())
                })?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_get_missing_is_none() {
        let store = MemoryStore::new();
        assert!(store.get("nope").await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_put_overwrites_whole_record() {
        let store = MemoryStore::new();
        let mut job = Job::new("https://example.com/repo");
        store.put(&job).await.unwrap();

        job.complete(json!({"metrics": {}}), true).unwrap();
        job.touch();
        store.put(&job).await.unwrap();

        let stored = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored, job);
        assert_eq!(store.list().await.unwrap(), vec![job.id.clone()]);
    }

    #[tokio::test]
    async fn test_open_store_memory_and_sqlite() {
        let config = StorageConfig {
            backend: StorageBackend::Memory,
            ..StorageConfig::default()
        };
        let store = open_store(&config).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());

        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            backend: StorageBackend::Sqlite,
            path: dir.path().join("nested").join("scans.db"),
            ..StorageConfig::default()
        };
        let store = open_store(&config).await.unwrap();
        let job = Job::new("https://example.com/repo");
        store.put(&job).await.unwrap();
        assert_eq!(store.get(&job.id).await.unwrap(), Some(job));
    }
}
