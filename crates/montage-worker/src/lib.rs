//! Montage job orchestration.
//!
//! This crate provides:
//! - The job lifecycle (`pending → processing → success | failed`) with
//!   admission control and per-job exclusivity
//! - Terminal cleanup, deferred deletion and the retention sweep
//! - Best-effort webhook notification on success

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod retention;

pub use config::WorkerConfig;
pub use error::{SubmitError, WorkerError, WorkerResult};
pub use logging::{JobLogger, JobPhase};
pub use notify::{NotificationDispatcher, NotifyOutcome};
pub use orchestrator::{ArtifactLookup, HealthReport, JobOrchestrator, SubmitRequest};
pub use retention::{CleanupReport, RetentionManager};
