//! Submission parameters and their validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Leading bytes of a ZIP local file header (or an empty archive's end record).
const ZIP_SIGNATURES: [&[u8; 4]; 2] = [b"PK\x03\x04", b"PK\x05\x06"];

/// Rejections raised synchronously at ingest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("video archive was not uploaded")]
    MissingArchive,

    #[error("audio file was not uploaded")]
    MissingAudio,

    #[error("video file must be a ZIP archive")]
    NotZipArchive,

    #[error("audio file must be in MP3 format")]
    NotMp3Audio,

    #[error("fade duration must be between {min} and {max} seconds, got {value}")]
    FadeOutOfRange { value: i64, min: u8, max: u8 },
}

/// Fade duration handed to the external program, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct FadeDuration(u8);

impl FadeDuration {
    pub const MIN: u8 = 0;
    pub const MAX: u8 = 10;
    pub const DEFAULT: FadeDuration = FadeDuration(3);

    pub fn new(value: i64) -> Result<Self, ValidationError> {
        if (i64::from(Self::MIN)..=i64::from(Self::MAX)).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(ValidationError::FadeOutOfRange {
                value,
                min: Self::MIN,
                max: Self::MAX,
            })
        }
    }

    /// Parse a raw form value.
    ///
    /// Missing or non-integer input falls back to the default; an integer
    /// outside the allowed range is rejected.
    pub fn from_form(raw: Option<&str>) -> Result<Self, ValidationError> {
        match raw.map(str::trim).and_then(|s| s.parse::<i64>().ok()) {
            Some(value) => Self::new(value),
            None => Ok(Self::DEFAULT),
        }
    }

    pub fn seconds(&self) -> u8 {
        self.0
    }
}

impl Default for FadeDuration {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<i64> for FadeDuration {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FadeDuration> for u8 {
    fn from(value: FadeDuration) -> Self {
        value.0
    }
}

impl fmt::Display for FadeDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Check the uploaded clip bundle: `.zip` name and a ZIP signature.
pub fn validate_archive(file_name: &str, bytes: &[u8]) -> Result<(), ValidationError> {
    if !file_name.ends_with(".zip") {
        return Err(ValidationError::NotZipArchive);
    }
    let looks_like_zip = bytes.len() >= 4 && ZIP_SIGNATURES.iter().any(|sig| bytes[..4] == sig[..]);
    if !looks_like_zip {
        return Err(ValidationError::NotZipArchive);
    }
    Ok(())
}

/// Check the uploaded music track: `.mp3` name and some content.
pub fn validate_audio(file_name: &str, bytes: &[u8]) -> Result<(), ValidationError> {
    if !file_name.ends_with(".mp3") {
        return Err(ValidationError::NotMp3Audio);
    }
    if bytes.is_empty() {
        return Err(ValidationError::MissingAudio);
    }
    Ok(())
}
