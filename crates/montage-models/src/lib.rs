//! Shared data models for the montage job service.
//!
//! This crate provides Serde-serializable types for:
//! - Job identity and lifecycle states
//! - Persisted status records and the completion webhook body
//! - Submission parameters and their validation

pub mod job;
pub mod params;
pub mod status;

// Re-export common types
pub use job::{JobId, JobStatus};
pub use params::{validate_archive, validate_audio, FadeDuration, ValidationError};
pub use status::{JobState, StatusRecord, SuccessStatus, WebhookPayload};
