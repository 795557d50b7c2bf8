//! Redis-backed status store.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, IntoConnectionInfo};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use montage_models::{JobId, StatusRecord};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::store::StatusStore;

/// Status store over a single multiplexed Redis connection.
///
/// Built once by the composition root and shared behind an `Arc`. The
/// connection is opened by [`RedisStatusStore::init`], cloned for every call,
/// re-established after I/O failures and dropped by [`RedisStatusStore::close`].
pub struct RedisStatusStore {
    client: redis::Client,
    config: StoreConfig,
    conn: Mutex<Option<MultiplexedConnection>>,
    closed: AtomicBool,
}

impl RedisStatusStore {
    /// Create a store client. Does not touch the network.
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        let mut info = config.redis_url.as_str().into_connection_info()?;
        if let Some(password) = &config.redis_password {
            info.redis.password = Some(password.clone());
        }
        info.redis.db = config.redis_db;

        let client = redis::Client::open(info)?;
        Ok(Self {
            client,
            config,
            conn: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Open the shared connection and check it answers.
    pub async fn init(&self) -> StoreResult<()> {
        self.ping().await?;
        info!(
            db = self.config.redis_db,
            prefix = %self.config.key_prefix,
            "Connected to Redis status store"
        );
        Ok(())
    }

    /// Drop the shared connection. Later calls fail with `ConnectionFailed`.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.conn.lock().await.take();
        info!("Closed Redis status store");
    }

    fn key(&self, job_id: &JobId) -> String {
        self.config.key_for(job_id.as_str())
    }

    async fn connection(&self) -> StoreResult<MultiplexedConnection> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::connection_failed("status store is closed"));
        }

        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self.client.get_multiplexed_async_connection().await?;
        *guard = Some(conn.clone());
        debug!("Opened Redis connection");
        Ok(conn)
    }

    /// Forget a broken connection so the next call reconnects.
    async fn discard_if_broken(&self, err: &redis::RedisError) {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            warn!("Redis connection lost: {}", err);
            self.conn.lock().await.take();
        }
    }
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn put(&self, record: &StatusRecord) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let key = self.key(&record.task_id);
        let payload = serde_json::to_string(record)?;
        let ttl_secs = self.config.record_ttl.as_secs().max(1) as i64;

        let result = redis::pipe()
            .atomic()
            .set(&key, &payload)
            .ignore()
            .expire(&key, ttl_secs)
            .ignore()
            .query_async::<()>(&mut conn)
            .await;

        if let Err(e) = result {
            self.discard_if_broken(&e).await;
            return Err(e.into());
        }

        debug!(job_id = %record.task_id, status = %record.status(), "Stored status record");
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> StoreResult<Option<StatusRecord>> {
        let mut conn = self.connection().await?;
        let key = self.key(job_id);

        let payload = match conn.get::<_, Option<String>>(&key).await {
            Ok(p) => p,
            Err(e) => {
                self.discard_if_broken(&e).await;
                return Err(e.into());
            }
        };

        match payload {
            None => Ok(None),
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StoreError::corrupt(key, e)),
        }
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        if let Err(e) = redis::cmd("PING").query_async::<String>(&mut conn).await {
            self.discard_if_broken(&e).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use montage_models::{JobState, JobStatus};
    use std::time::Duration;

    fn local_config() -> StoreConfig {
        StoreConfig {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: "montage:test:".to_string(),
            record_ttl: Duration::from_secs(30),
            ..StoreConfig::default()
        }
    }

    #[test]
    fn test_rejects_invalid_url() {
        let config = StoreConfig {
            redis_url: "not a url".to_string(),
            ..StoreConfig::default()
        };
        assert!(RedisStatusStore::new(config).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_an_error() {
        let config = StoreConfig {
            redis_url: "redis://127.0.0.1:1".to_string(),
            ..StoreConfig::default()
        };
        let store = RedisStatusStore::new(config).unwrap();

        assert!(store.ping().await.is_err());
        let record = StatusRecord::new(JobId::new(), JobState::pending("Task created"));
        assert!(store.put(&record).await.is_err());
    }

    #[tokio::test]
    async fn test_closed_store_refuses_calls() {
        let store = RedisStatusStore::new(local_config()).unwrap();
        store.close().await;

        assert!(matches!(
            store.get(&JobId::new()).await,
            Err(StoreError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_round_trip_with_ttl() {
        let config = local_config();
        let store = RedisStatusStore::new(config.clone()).unwrap();
        store.init().await.unwrap();

        let record = StatusRecord::new(JobId::new(), JobState::processing("Unpacking archive..."));
        store.put(&record).await.unwrap();

        let fetched = store.get(&record.task_id).await.unwrap().unwrap();
        assert_eq!(fetched.status(), JobStatus::Processing);

        let client = redis::Client::open(config.redis_url.as_str()).unwrap();
        let mut conn = client.get_multiplexed_async_connection().await.unwrap();
        let ttl: i64 = conn.ttl(config.key_for(record.task_id.as_str())).await.unwrap();
        assert!(ttl > 0 && ttl <= 30);

        assert!(store.get(&JobId::new()).await.unwrap().is_none());
        store.close().await;
    }
}
