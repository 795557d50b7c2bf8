//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Status records outlive the artifact they describe by this much.
const RECORD_GRACE: Duration = Duration::from_secs(3600);

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root for staged archives and per-job working directories
    pub temp_dir: PathBuf,
    /// Root for finished montages
    pub output_dir: PathBuf,
    /// External montage script
    pub script_path: PathBuf,
    /// How long a finished montage stays downloadable
    pub retention: Duration,
    /// Endpoint notified when a job succeeds
    pub webhook_url: Option<String>,
    pub webhook_timeout: Duration,
    /// Jobs allowed to run the script at the same time
    pub max_concurrent_jobs: usize,
    /// Upper bound on one script run
    pub script_timeout: Duration,
    /// Period of the retention sweep
    pub sweep_interval: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Extension of the clips picked from the archive
    pub input_extension: String,
    /// File the script leaves in the working directory
    pub result_file_name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            temp_dir: PathBuf::from("./temp"),
            output_dir: PathBuf::from("./output"),
            script_path: PathBuf::from("./process_all.sh"),
            retention: Duration::from_secs(3600),
            webhook_url: None,
            webhook_timeout: Duration::from_secs(10),
            max_concurrent_jobs: 2,
            script_timeout: Duration::from_secs(3600), // 1 hour
            sweep_interval: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(30),
            input_extension: ".mp4".to_string(),
            result_file_name: "result.mp4".to_string(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            temp_dir: std::env::var("TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
            output_dir: std::env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            script_path: std::env::var("SCRIPT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.script_path),
            retention: Duration::from_secs(env_or("FILE_RETENTION_HOURS", 1u64) * 3600),
            webhook_url: std::env::var("WEBHOOK_URL")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            webhook_timeout: Duration::from_secs(env_or("WEBHOOK_TIMEOUT_SECS", 10)),
            max_concurrent_jobs: env_or("MAX_CONCURRENT_JOBS", defaults.max_concurrent_jobs)
                .max(1),
            script_timeout: Duration::from_secs(env_or("SCRIPT_TIMEOUT_SECS", 3600)),
            sweep_interval: Duration::from_secs(env_or("SWEEP_INTERVAL_SECS", 300).max(1)),
            shutdown_timeout: Duration::from_secs(env_or("SHUTDOWN_TIMEOUT_SECS", 30)),
            input_extension: std::env::var("INPUT_EXTENSION").unwrap_or(defaults.input_extension),
            result_file_name: std::env::var("RESULT_FILE_NAME")
                .unwrap_or(defaults.result_file_name),
        }
    }

    /// Expiry applied to every status record write.
    pub fn record_ttl(&self) -> Duration {
        self.retention + RECORD_GRACE
    }

    /// Working directories and archives older than this are orphans.
    pub fn orphan_age(&self) -> Duration {
        self.retention + RECORD_GRACE
    }
}
