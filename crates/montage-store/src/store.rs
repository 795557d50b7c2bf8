//! Status store contract and the in-process implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use montage_models::{JobId, StatusRecord};

use crate::error::{StoreError, StoreResult};

/// Persistence for job status records.
///
/// Writes are last-writer-wins: only the orchestrator running a job writes its
/// record, so no versioning is needed. Every write resets the record's expiry.
/// Backend failures are returned as-is and never retried here.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Overwrite the record for `record.task_id` and reset its expiry.
    async fn put(&self, record: &StatusRecord) -> StoreResult<()>;

    /// Most recent record, or `None` if unknown or expired.
    async fn get(&self, job_id: &JobId) -> StoreResult<Option<StatusRecord>>;

    /// Check backend reachability.
    async fn ping(&self) -> StoreResult<()>;
}

struct Entry {
    payload: String,
    expires_at: Instant,
}

/// In-process status store with TTL emulation.
///
/// Records are kept serialized, so reads go through the same decode path as
/// the Redis store.
pub struct MemoryStatusStore {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
    offline: AtomicBool,
}

impl MemoryStatusStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            offline: AtomicBool::new(false),
        }
    }

    /// Simulate an unreachable backend.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Remaining lifetime of a record, if present.
    pub fn ttl_remaining(&self, job_id: &JobId) -> Option<Duration> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(job_id.as_str())
            .map(|e| e.expires_at.saturating_duration_since(Instant::now()))
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.values().filter(|e| e.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::connection_failed("memory store is offline"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn put(&self, record: &StatusRecord) -> StoreResult<()> {
        self.check_online()?;
        let payload = serde_json::to_string(record)?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            record.task_id.as_str().to_string(),
            Entry {
                payload,
                expires_at: Instant::now() + self.ttl,
            },
        );
        debug!(job_id = %record.task_id, status = %record.status(), "Stored status record");
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> StoreResult<Option<StatusRecord>> {
        self.check_online()?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let expired = match entries.get(job_id.as_str()) {
            None => return Ok(None),
            Some(entry) => entry.expires_at <= Instant::now(),
        };
        if expired {
            entries.remove(job_id.as_str());
            return Ok(None);
        }

        let payload = &entries[job_id.as_str()].payload;
        serde_json::from_str(payload)
            .map(Some)
            .map_err(|e| StoreError::corrupt(job_id.as_str(), e))
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_online()
    }
}
