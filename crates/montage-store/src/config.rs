//! Status store configuration.

use std::time::Duration;

/// Which status store implementation the service runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    /// In-process map; records do not survive a restart
    Memory,
}

impl StoreBackend {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Some(Self::Redis),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

/// Status store configuration.
#[derive(Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Redis URL
    pub redis_url: String,
    /// Password applied on top of the URL, if any
    pub redis_password: Option<String>,
    /// Logical database index
    pub redis_db: i64,
    /// Prefix prepended to every job key
    pub key_prefix: String,
    /// Expiry applied on every write
    pub record_ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            redis_url: "redis://localhost:6379".to_string(),
            redis_password: None,
            redis_db: 0,
            key_prefix: "montage:task:".to_string(),
            record_ttl: Duration::from_secs(2 * 3600), // 1h retention + 1h
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            backend: std::env::var("STORE_BACKEND")
                .ok()
                .and_then(|s| StoreBackend::parse(&s))
                .unwrap_or(defaults.backend),
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            redis_password: std::env::var("REDIS_PASSWORD")
                .ok()
                .filter(|s| !s.is_empty()),
            redis_db: std::env::var("REDIS_DB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.redis_db),
            key_prefix: std::env::var("REDIS_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            record_ttl: defaults.record_ttl,
        }
    }

    /// Set the record expiry.
    pub fn with_record_ttl(mut self, ttl: Duration) -> Self {
        self.record_ttl = ttl;
        self
    }

    /// Full key for a job.
    pub fn key_for(&self, job_id: &str) -> String {
        format!("{}{}", self.key_prefix, job_id)
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("backend", &self.backend)
            .field("redis_url", &self.redis_url)
            .field("redis_password", &self.redis_password.as_ref().map(|_| "<redacted>"))
            .field("redis_db", &self.redis_db)
            .field("key_prefix", &self.key_prefix)
            .field("record_ttl", &self.record_ttl)
            .finish()
    }
}
