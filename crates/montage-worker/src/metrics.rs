//! Job metrics recorded through the `metrics` facade.
//!
//! Nothing is exported unless the host process installs a recorder.

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_SUBMITTED_TOTAL: &str = "montage_jobs_submitted_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "montage_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "montage_jobs_failed_total";
    pub const JOBS_IN_FLIGHT: &str = "montage_jobs_in_flight";
    pub const SCRIPT_DURATION_SECONDS: &str = "montage_script_duration_seconds";
    pub const WEBHOOKS_TOTAL: &str = "montage_webhooks_total";
    pub const FILES_SWEPT_TOTAL: &str = "montage_files_swept_total";
}

pub fn record_job_submitted() {
    counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
}

pub fn record_job_completed() {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
}

pub fn record_job_failed(reason: &'static str) {
    let labels = [("reason", reason)];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn set_jobs_in_flight(count: usize) {
    gauge!(names::JOBS_IN_FLIGHT).set(count as f64);
}

pub fn record_script_duration(duration_secs: f64) {
    histogram!(names::SCRIPT_DURATION_SECONDS).record(duration_secs);
}

pub fn record_webhook(outcome: &'static str) {
    let labels = [("outcome", outcome)];
    counter!(names::WEBHOOKS_TOTAL, &labels).increment(1);
}

pub fn record_files_swept(kind: &'static str, count: usize) {
    let labels = [("kind", kind)];
    counter!(names::FILES_SWEPT_TOTAL, &labels).increment(count as u64);
}
