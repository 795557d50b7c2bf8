//! Persisted status records.
//!
//! A record is what the status store holds for a job and what status queries
//! return. Each lifecycle state carries exactly the fields that make sense for
//! it, so a `success` record always has an output file and a `failed` record
//! always has an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobStatus};

/// Fields recorded when a job produced its artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessStatus {
    pub message: String,
    /// Artifact file name inside the output directory
    pub output_file: String,
    /// Artifact size in bytes
    pub file_size: u64,
    /// When the artifact will be deleted
    pub expires_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// State-specific part of a status record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobState {
    Pending {
        message: String,
    },
    Processing {
        message: String,
    },
    Success(SuccessStatus),
    Failed {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

impl JobState {
    pub fn pending(message: impl Into<String>) -> Self {
        Self::Pending {
            message: message.into(),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing {
            message: message.into(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
            details: None,
        }
    }

    pub fn failed_with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
            details: Some(details.into()),
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            JobState::Pending { .. } => JobStatus::Pending,
            JobState::Processing { .. } => JobStatus::Processing,
            JobState::Success(_) => JobStatus::Success,
            JobState::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// A job status record as stored and served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub task_id: JobId,
    /// Stamped on the first write, carried unchanged afterwards
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: JobState,
}

impl StatusRecord {
    /// First record of a freshly accepted job.
    pub fn new(task_id: JobId, state: JobState) -> Self {
        Self {
            task_id,
            created_at: Utc::now(),
            state,
        }
    }

    /// Follow-up record for the same job, keeping `created_at`.
    pub fn next(&self, state: JobState) -> Self {
        Self {
            task_id: self.task_id.clone(),
            created_at: self.created_at,
            state,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.state.status()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Success fields, if the job succeeded.
    pub fn success(&self) -> Option<&SuccessStatus> {
        match &self.state {
            JobState::Success(s) => Some(s),
            _ => None,
        }
    }

    /// Human-readable message for the current state.
    pub fn message(&self) -> &str {
        match &self.state {
            JobState::Pending { message } | JobState::Processing { message } => message,
            JobState::Success(s) => &s.message,
            JobState::Failed { error, .. } => error,
        }
    }
}

/// Body of the completion webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub task_id: JobId,
    pub status: JobStatus,
    pub message: String,
    pub output_file: String,
    pub file_size: u64,
    pub expires_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl WebhookPayload {
    pub fn from_success(task_id: &JobId, success: &SuccessStatus) -> Self {
        Self {
            task_id: task_id.clone(),
            status: JobStatus::Success,
            message: success.message.clone(),
            output_file: success.output_file.clone(),
            file_size: success.file_size,
            expires_at: success.expires_at,
            completed_at: success.completed_at,
        }
    }
}
