//! Deferred deletion, terminal cleanup and the periodic retention sweep.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::fs;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics;

/// What a cleanup pass did with each path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    pub missing: usize,
    pub failed: usize,
}

/// Removes job files once they are no longer needed.
///
/// Every operation is best effort: failures are logged and counted, never
/// returned to the caller.
#[derive(Debug, Clone)]
pub struct RetentionManager {
    output_dir: PathBuf,
    temp_dir: PathBuf,
    retention: Duration,
    orphan_age: Duration,
}

impl RetentionManager {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        temp_dir: impl Into<PathBuf>,
        retention: Duration,
        orphan_age: Duration,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            temp_dir: temp_dir.into(),
            retention,
            orphan_age,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Delete `path` after `after` without blocking the caller.
    ///
    /// The pending deletion lives only in this process. The periodic sweep
    /// catches files whose timer was lost to a restart.
    pub fn schedule_deletion(&self, path: impl Into<PathBuf>, after: Duration) -> JoinHandle<()> {
        let path = path.into();
        debug!(path = %path.display(), after_secs = after.as_secs(), "Scheduled deletion");
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            match fs::remove_file(&path).await {
                Ok(()) => info!(path = %path.display(), "Deleted expired file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "Expired file already gone");
                }
                Err(e) => warn!(path = %path.display(), "Failed to delete expired file: {}", e),
            }
        })
    }

    /// Remove each path now: directories recursively, files directly.
    /// One failure does not stop the others.
    pub async fn cleanup_now<P: AsRef<Path>>(&self, paths: &[P]) -> CleanupReport {
        let mut report = CleanupReport::default();
        for path in paths {
            match remove_path(path.as_ref()).await {
                Ok(true) => report.removed += 1,
                Ok(false) => report.missing += 1,
                Err(e) => {
                    warn!(path = %path.as_ref().display(), "Cleanup failed: {}", e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Delete finished montages older than the retention window.
    pub async fn sweep_expired(&self) -> usize {
        let removed = sweep_dir(&self.output_dir, self.retention, |_, is_dir| !is_dir).await;
        if removed > 0 {
            info!(removed, "Swept expired montages");
            metrics::record_files_swept("artifact", removed);
        }
        removed
    }

    /// Delete leftover working directories and archives.
    ///
    /// `is_active` is asked about each job id-shaped name so that running jobs
    /// are left alone no matter how old their files are.
    pub async fn sweep_orphaned_workdirs<F>(&self, is_active: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let removed = sweep_dir(&self.temp_dir, self.orphan_age, |name, _| {
            let id = name.strip_suffix(".zip").unwrap_or(name);
            !is_active(id)
        })
        .await;
        if removed > 0 {
            info!(removed, "Swept orphaned working files");
            metrics::record_files_swept("workdir", removed);
        }
        removed
    }
}

/// Run both sweeps every `interval` until `shutdown` flips to true.
pub fn spawn_sweeper<F>(
    retention: Arc<RetentionManager>,
    interval: Duration,
    is_active: F,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    F: Fn(&str) -> bool + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    retention.sweep_expired().await;
                    retention.sweep_orphaned_workdirs(&is_active).await;
                }
            }
        }
        debug!("Retention sweeper stopped");
    })
}

/// Returns `Ok(false)` when there was nothing to remove.
async fn remove_path(path: &Path) -> std::io::Result<bool> {
    let meta = match fs::symlink_metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if meta.is_dir() {
        fs::remove_dir_all(path).await?;
    } else {
        fs::remove_file(path).await?;
    }
    Ok(true)
}

async fn sweep_dir<F>(dir: &Path, max_age: Duration, select: F) -> usize
where
    F: Fn(&str, bool) -> bool,
{
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), "Skipping sweep: {}", e);
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        if !select(&name, meta.is_dir()) {
            continue;
        }
        let age = meta
            .modified()
            .ok()
            .and_then(|t| now.duration_since(t).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }
        match remove_path(&entry.path()).await {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(e) => warn!(path = %entry.path().display(), "Sweep failed to remove: {}", e),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir, retention: Duration) -> RetentionManager {
        RetentionManager::new(
            dir.path().join("output"),
            dir.path().join("temp"),
            retention,
            retention,
        )
    }

    #[tokio::test]
    async fn test_schedule_deletion_removes_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("job.mp4");
        std::fs::write(&file, b"montage").unwrap();

        let handle = manager(&dir, Duration::ZERO).schedule_deletion(&file, Duration::from_millis(20));
        assert!(file.exists());

        handle.await.unwrap();
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn test_schedule_deletion_of_missing_file_is_quiet() {
        let dir = TempDir::new().unwrap();
        let handle = manager(&dir, Duration::ZERO)
            .schedule_deletion(dir.path().join("gone.mp4"), Duration::ZERO);
        tokio_test::assert_ok!(handle.await);
    }

    #[tokio::test]
    async fn test_cleanup_now_is_independent_per_path() {
        let dir = TempDir::new().unwrap();
        let work_dir = dir.path().join("job");
        std::fs::create_dir_all(work_dir.join("nested")).unwrap();
        std::fs::write(work_dir.join("nested").join("001.mp4"), b"a").unwrap();
        let archive = dir.path().join("job.zip");
        std::fs::write(&archive, b"PK").unwrap();
        let missing = dir.path().join("never-existed");

        let report = manager(&dir, Duration::ZERO)
            .cleanup_now(&[missing, work_dir.clone(), archive.clone()])
            .await;

        assert_eq!(
            report,
            CleanupReport {
                removed: 2,
                missing: 1,
                failed: 0
            }
        );
        assert!(!work_dir.exists());
        assert!(!archive.exists());
    }

    #[tokio::test]
    async fn test_sweep_expired_respects_age() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("output");
        std::fs::create_dir_all(&output).unwrap();
        std::fs::write(output.join("a.mp4"), b"a").unwrap();

        let keep = manager(&dir, Duration::from_secs(3600));
        assert_eq!(keep.sweep_expired().await, 0);
        assert!(output.join("a.mp4").exists());

        let purge = manager(&dir, Duration::ZERO);
        assert_eq!(purge.sweep_expired().await, 1);
        assert!(!output.join("a.mp4").exists());
    }

    #[tokio::test]
    async fn test_sweep_orphans_skips_active_jobs() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("temp");
        std::fs::create_dir_all(temp.join("active")).unwrap();
        std::fs::create_dir_all(temp.join("stale")).unwrap();
        std::fs::write(temp.join("active.zip"), b"PK").unwrap();
        std::fs::write(temp.join("stale.zip"), b"PK").unwrap();

        let removed = manager(&dir, Duration::ZERO)
            .sweep_orphaned_workdirs(|id| id == "active")
            .await;

        assert_eq!(removed, 2);
        assert!(temp.join("active").exists());
        assert!(temp.join("active.zip").exists());
        assert!(!temp.join("stale").exists());
        assert!(!temp.join("stale.zip").exists());
    }

    #[tokio::test]
    async fn test_sweep_of_missing_dir_is_noop() {
        let dir = TempDir::new().unwrap();
        assert_eq!(manager(&dir, Duration::ZERO).sweep_expired().await, 0);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = spawn_sweeper(
            Arc::new(manager(&dir, Duration::ZERO)),
            Duration::from_millis(10),
            |_| false,
            rx,
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
