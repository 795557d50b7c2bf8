//! Input staging and the external montage script.
//!
//! This crate provides:
//! - ZIP extraction into a per-job working directory and clip discovery
//! - Verification and bounded execution of the montage script
//! - Cross-device safe file moves

pub mod error;
pub mod fs_utils;
pub mod script;
pub mod stager;

pub use error::{MediaError, MediaResult};
pub use fs_utils::{list_dir_names, move_file};
pub use script::{ScriptInvocation, ScriptOutput, ScriptRunner};
pub use stager::{ArtifactStager, StagedInputs};
