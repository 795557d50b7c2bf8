//! Runner for the external montage script.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::fs_utils::list_dir_names;

/// Arguments for one script run.
#[derive(Debug, Clone)]
pub struct ScriptInvocation<'a> {
    /// Number of staged clips
    pub clip_count: usize,
    /// Music track, made absolute before it is passed on
    pub music: &'a Path,
    /// Fade duration in seconds
    pub fade_duration: u8,
    /// Current directory of the child
    pub work_dir: &'a Path,
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    /// The result file inside the working directory
    pub result_path: PathBuf,
    pub stdout: String,
    pub elapsed: Duration,
}

/// Invokes `<script> <count> <abs music path> <fade>` inside a working directory.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    script: PathBuf,
    result_file: String,
    timeout: Duration,
}

impl ScriptRunner {
    /// Create a runner for `script`, expecting it to leave `result_file` behind.
    pub fn new(script: impl Into<PathBuf>, result_file: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            result_file: result_file.into(),
            timeout: Duration::from_secs(3600),
        }
    }

    /// Set the run timeout. The script's whole process group is killed when it expires.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Whether the script is present on disk.
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.script)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Check the script exists and can be executed, returning its absolute path.
    pub async fn verify(&self) -> MediaResult<PathBuf> {
        let meta = match fs::metadata(&self.script).await {
            Ok(m) if m.is_file() => m,
            _ => return Err(MediaError::ScriptNotFound(self.script.clone())),
        };

        if !is_executable(&meta) {
            return Err(MediaError::ScriptNotExecutable(self.script.clone()));
        }

        Ok(fs::canonicalize(&self.script).await?)
    }

    /// Run the script to completion and check it produced the result file.
    pub async fn run(&self, invocation: &ScriptInvocation<'_>) -> MediaResult<ScriptOutput> {
        let program = self.verify().await?;
        let music = fs::canonicalize(invocation.music)
            .await
            .map_err(|_| MediaError::AuxiliaryMissing(invocation.music.to_path_buf()))?;

        let args = [
            invocation.clip_count.to_string(),
            music.to_string_lossy().into_owned(),
            invocation.fade_duration.to_string(),
        ];
        debug!("Running script: {} {}", program.display(), args.join(" "));

        let started = Instant::now();
        let mut command = Command::new(&program);
        command
            .args(&args)
            .current_dir(invocation.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout can take down everything the script started
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn()?;
        let pid = child.id();
        let stdout_task = tokio::spawn(read_pipe(child.stdout.take()));
        let stderr_task = tokio::spawn(read_pipe(child.stderr.take()));

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(timeout = ?self.timeout, "Script timed out, killing process group");
                kill_process_group(pid);
                if let Err(e) = child.kill().await {
                    warn!("Failed to reap timed out script: {}", e);
                }
                stdout_task.abort();
                stderr_task.abort();
                return Err(MediaError::ScriptTimeout(self.timeout));
            }
        };
        // Background leftovers would hold the pipes open
        kill_process_group(pid);
        let output = std::process::Output {
            status,
            stdout: stdout_task.await.unwrap_or_default(),
            stderr: stderr_task.await.unwrap_or_default(),
        };
        let elapsed = started.elapsed();

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !stdout.trim().is_empty() {
            debug!(stdout = %stdout.trim(), "Script stdout");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                exit_code = ?output.status.code(),
                stderr = %stderr.trim(),
                "Script failed"
            );
            return Err(MediaError::script_failed(output.status.code(), &output.stderr));
        }

        let result_path = invocation.work_dir.join(&self.result_file);
        if !fs::try_exists(&result_path).await.unwrap_or(false) {
            let listing = list_dir_names(invocation.work_dir).await;
            return Err(MediaError::OutputMissing { listing });
        }

        info!(
            elapsed_ms = elapsed.as_millis() as u64,
            clips = invocation.clip_count,
            "Script finished"
        );

        Ok(ScriptOutput {
            result_path,
            stdout,
            elapsed,
        })
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!("Failed to read script output: {}", e);
        }
    }
    buf
}

/// SIGKILL every process in the group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid = pid, "Failed to kill script process group: {}", e),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    true
}
