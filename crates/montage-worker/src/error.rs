//! Worker error types.

use thiserror::Error;

use montage_media::MediaError;
use montage_models::ValidationError;
use montage_store::StoreError;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors that end a job in `failed`.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("Status store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Worker shut down before the task started")]
    ShuttingDown,
}

impl WorkerError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Diagnostic detail stored alongside the failure message, if any.
    pub fn details(&self) -> Option<String> {
        match self {
            WorkerError::Internal(_) | WorkerError::Io(_) => Some(format!(
                "{:?}\n\n{}",
                self,
                std::backtrace::Backtrace::force_capture()
            )),
            _ => None,
        }
    }
}

/// Errors returned synchronously by job submission.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Status store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to save uploaded files: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_errors_keep_their_message() {
        let err = WorkerError::from(MediaError::NoQualifyingInputs {
            extension: ".mp4".into(),
        });
        assert_eq!(err.to_string(), "No .mp4 files found in the archive");
        assert!(err.details().is_none());
    }

    #[test]
    fn test_internal_errors_carry_details() {
        let err = WorkerError::internal("clock overflow");
        let details = err.details().unwrap();
        assert!(details.contains("clock overflow"));
    }

    #[test]
    fn test_validation_message_passes_through() {
        let err = SubmitError::from(ValidationError::MissingAudio);
        assert_eq!(err.to_string(), ValidationError::MissingAudio.to_string());
    }
}
