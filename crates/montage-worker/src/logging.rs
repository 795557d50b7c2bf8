//! Per-job lifecycle log lines.
//!
//! Every line carries `job_id` and `phase` so a job can be followed through
//! admission, status changes and its terminal outcome.

use std::fmt::Display;

use tracing::{error, info, warn, Span};

use montage_models::{FadeDuration, JobId, JobStatus};

/// What the orchestrator is doing with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    /// Staging, running the script and publishing the result
    Montage,
    /// Startup cleanup of jobs interrupted by a restart
    Recovery,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Montage => "montage",
            JobPhase::Recovery => "recovery",
        }
    }
}

/// Structured logger bound to one job.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    phase: JobPhase,
}

impl JobLogger {
    pub fn new(job_id: &JobId, phase: JobPhase) -> Self {
        Self {
            job_id: job_id.clone(),
            phase,
        }
    }

    /// The job got past admission control.
    pub fn admitted(&self, fade: FadeDuration) {
        info!(
            job_id = %self.job_id,
            phase = self.phase.as_str(),
            fade_secs = fade.seconds(),
            "Job admitted"
        );
    }

    /// A `processing` message was published.
    pub fn status(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            phase = self.phase.as_str(),
            "Status: {}", message
        );
    }

    pub fn failed(&self, reason: &str, err: impl Display) {
        error!(
            job_id = %self.job_id,
            phase = self.phase.as_str(),
            reason,
            "Job failed: {}", err
        );
    }

    /// A status store call failed while `action`.
    pub fn store_error(&self, action: &str, err: impl Display) {
        error!(
            job_id = %self.job_id,
            phase = self.phase.as_str(),
            "Status store error while {}: {}", action, err
        );
    }

    /// A job left in `previous` by a restart was moved to `failed`.
    pub fn interrupted(&self, previous: JobStatus) {
        warn!(
            job_id = %self.job_id,
            phase = self.phase.as_str(),
            previous = %previous,
            "Marked interrupted job as failed"
        );
    }

    pub fn finished(&self, file_size: u64) {
        info!(
            job_id = %self.job_id,
            phase = self.phase.as_str(),
            file_size,
            "Job finished"
        );
    }

    /// Span wrapping the whole background run of the job.
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            phase = self.phase.as_str()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_labels() {
        assert_eq!(JobPhase::Montage.as_str(), "montage");
        assert_eq!(JobPhase::Recovery.as_str(), "recovery");
    }

    #[test]
    fn test_logging_without_subscriber_is_harmless() {
        let logger = JobLogger::new(&JobId::new(), JobPhase::Recovery);
        let _span = logger.span().entered();
        logger.admitted(FadeDuration::DEFAULT);
        logger.status("Unpacking archive...");
        logger.interrupted(JobStatus::Processing);
        logger.failed("input", "No .mp4 files found in the archive");
        logger.finished(7);
    }
}
