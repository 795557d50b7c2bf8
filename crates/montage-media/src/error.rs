//! Error types for staging and script execution.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while staging inputs or running the montage script.
///
/// Every variant except `Io` is a reportable job failure whose message ends up
/// in the job's status record.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("ZIP archive not found: {}", .0.display())]
    ArchiveMissing(PathBuf),

    #[error("Failed to unpack archive: {0}")]
    ArchiveCorrupt(String),

    #[error("No {extension} files found in the archive")]
    NoQualifyingInputs { extension: String },

    #[error("Music file not found: {}", .0.display())]
    AuxiliaryMissing(PathBuf),

    #[error("Script not found: {}", .0.display())]
    ScriptNotFound(PathBuf),

    #[error("Script is not executable: {}", .0.display())]
    ScriptNotExecutable(PathBuf),

    #[error("Processing failed (exit code {}): {stderr}", exit_code_label(.exit_code))]
    ScriptFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Processing timed out after {} seconds", .0.as_secs_f64())]
    ScriptTimeout(Duration),

    #[error("Result file was not created. Files in the working directory: {listing:?}")]
    OutputMissing { listing: Vec<String> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "none, terminated by signal".to_string(),
    }
}

impl MediaError {
    /// Create a script failure from a captured stderr stream.
    pub fn script_failed(exit_code: Option<i32>, stderr: &[u8]) -> Self {
        let text = String::from_utf8_lossy(stderr).trim().to_string();
        Self::ScriptFailed {
            exit_code,
            stderr: if text.is_empty() {
                "unknown error".to_string()
            } else {
                text
            },
        }
    }

    /// Create an archive failure.
    pub fn archive_corrupt(message: impl Into<String>) -> Self {
        Self::ArchiveCorrupt(message.into())
    }

    /// Whether the failure was caused by the job's inputs rather than the host.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            MediaError::ArchiveMissing(_)
                | MediaError::ArchiveCorrupt(_)
                | MediaError::NoQualifyingInputs { .. }
                | MediaError::AuxiliaryMissing(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_failed_embeds_stderr() {
        let err = MediaError::script_failed(Some(1), b"disk full\n");
        assert_eq!(err.to_string(), "Processing failed (exit code 1): disk full");
    }

    #[test]
    fn test_script_failed_with_empty_stderr() {
        let err = MediaError::script_failed(Some(2), b"  ");
        assert!(err.to_string().ends_with("unknown error"));
    }

    #[test]
    fn test_signal_termination_label() {
        let err = MediaError::script_failed(None, b"killed");
        assert!(err.to_string().contains("terminated by signal"));
    }

    #[test]
    fn test_output_missing_lists_files() {
        let err = MediaError::OutputMissing {
            listing: vec!["001.mp4".into(), "music.mp3".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("001.mp4"));
        assert!(msg.contains("music.mp3"));
    }

    #[test]
    fn test_timeout_message_keeps_fractions() {
        let err = MediaError::ScriptTimeout(Duration::from_millis(200));
        assert_eq!(err.to_string(), "Processing timed out after 0.2 seconds");

        let err = MediaError::ScriptTimeout(Duration::from_secs(3600));
        assert_eq!(err.to_string(), "Processing timed out after 3600 seconds");
    }

    #[test]
    fn test_input_error_classification() {
        assert!(MediaError::NoQualifyingInputs {
            extension: ".mp4".into()
        }
        .is_input_error());
        assert!(!MediaError::ScriptTimeout(Duration::from_secs(5)).is_input_error());
    }
}
