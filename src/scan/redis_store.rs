//! Redis-compatible job store.
//!
//! Each job is one string key, `<prefix><id>`, holding the JSON record.
//! `SET` replaces the whole value atomically, which gives the per-key
//! atomicity the orchestrator relies on.

use async_trait::async_trait;
use redis::{Client, IntoConnectionInfo};
use redis::aio::ConnectionManager;
use tracing::{debug, error};

use super::models::{Job, JobId};
use super::store::JobStore;
use crate::errors::StoreError;

const SCAN_BATCH: usize = 500;

pub struct RedisStore {
    connection_manager: ConnectionManager,
    key_prefix: String,
}

impl RedisStore {
    /// Connect using `info` (a `ConnectionInfo` or a `redis://` URL) and
    /// verify the connection with `PING`.
    pub async fn connect(
        info: impl IntoConnectionInfo,
        key_prefix: &str,
    ) -> Result<Self, StoreError> {
        let client = Client::open(info).map_err(|e| {
            error!("Failed to create Redis client: {}", e);
            StoreError::Backend(format!("invalid redis connection parameters: {}", e))
        })?;

        let connection_manager = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to create connection manager: {}", e);
            StoreError::Backend(format!("failed to connect to redis: {}", e))
        })?;

        let mut conn = connection_manager.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(format!("redis PING failed: {}", e)))?;

        debug!(prefix = %key_prefix, "Connected to redis job store");

        Ok(Self {
            connection_manager,
            key_prefix: key_prefix.to_string(),
        })
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.key_prefix, id)
    }
}

/// Strip `prefix` from every key, dropping keys that do not carry it.
fn ids_from_keys(prefix: &str, keys: Vec<String>) -> Vec<JobId> {
    keys.into_iter()
        .filter_map(|k| k.strip_prefix(prefix).map(str::to_string))
        .collect()
}

#[async_trait]
impl JobStore for RedisStore {
    async fn put(&self, job: &Job) -> Result<(), StoreError> {
        let record = serde_json::to_string(job).map_err(|source| StoreError::Encode {
            id: job.id.clone(),
            source,
        })?;
        let mut conn = self.connection_manager.clone();
        redis::cmd("SET")
            .arg(self.key(&job.id))
            .arg(record)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(format!("redis SET failed: {}", e)))
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let mut conn = self.connection_manager.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(self.key(id))
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(format!("redis GET failed: {}", e)))?;

        value
            .map(|text| {
                serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
                    id: id.to_string(),
                    source,
                })
            })
            .transpose()
    }

    async fn list(&self) -> Result<Vec<JobId>, StoreError> {
        let mut conn = self.connection_manager.clone();
        let pattern = format!("{}*", self.key_prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async::<(u64, Vec<String>)>(&mut conn)
                .await
                .map_err(|e| StoreError::Backend(format!("redis SCAN failed: {}", e)))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once across iterations.
        keys.sort();
        keys.dedup();
        Ok(ids_from_keys(&self.key_prefix, keys))
    }
}
