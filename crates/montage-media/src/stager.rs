//! Unpacks a job's archive into its working directory and locates the inputs.

use std::fs::File;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};
use zip::ZipArchive;

use crate::error::{MediaError, MediaResult};

/// Inputs ready for the montage script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedInputs {
    /// Qualifying clips, sorted by file name
    pub clips: Vec<PathBuf>,
    /// Music track
    pub music: PathBuf,
    /// Directory the clips were extracted into
    pub work_dir: PathBuf,
}

impl StagedInputs {
    pub fn count(&self) -> usize {
        self.clips.len()
    }
}

/// Materializes job inputs in a per-job working directory.
///
/// Never cleans up after itself; the caller removes the working directory
/// once the job is over, whatever the outcome.
#[derive(Debug, Clone)]
pub struct ArtifactStager {
    extension: String,
}

impl Default for ArtifactStager {
    fn default() -> Self {
        Self::new(".mp4")
    }
}

impl ArtifactStager {
    /// Create a stager that picks clips ending with `extension` (case-sensitive).
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Extract `archive` into `work_dir` and collect the clips.
    ///
    /// Clips are the top-level regular files of `work_dir` with the configured
    /// extension, ordered lexicographically, so `001.mp4` sorts before `002.mp4`
    /// but `10.mp4` sorts before `9.mp4`.
    pub async fn stage(
        &self,
        archive: &Path,
        music: &Path,
        work_dir: &Path,
    ) -> MediaResult<StagedInputs> {
        if !fs::try_exists(archive).await.unwrap_or(false) {
            return Err(MediaError::ArchiveMissing(archive.to_path_buf()));
        }

        fs::create_dir_all(work_dir).await?;
        extract(archive, work_dir).await?;

        let clips = self.collect_clips(work_dir).await?;
        if clips.is_empty() {
            return Err(MediaError::NoQualifyingInputs {
                extension: self.extension.clone(),
            });
        }

        if !fs::try_exists(music).await.unwrap_or(false) {
            return Err(MediaError::AuxiliaryMissing(music.to_path_buf()));
        }

        info!(
            work_dir = %work_dir.display(),
            clips = clips.len(),
            "Staged job inputs"
        );

        Ok(StagedInputs {
            clips,
            music: music.to_path_buf(),
            work_dir: work_dir.to_path_buf(),
        })
    }

    async fn collect_clips(&self, work_dir: &Path) -> MediaResult<Vec<PathBuf>> {
        let mut clips = Vec::new();
        let mut entries = fs::read_dir(work_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(&self.extension) {
                clips.push(entry.path());
            }
        }

        clips.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        debug!(count = clips.len(), extension = %self.extension, "Collected clips");
        Ok(clips)
    }
}

/// Unpack on a blocking thread. Entries whose paths would escape `dest` are
/// rejected by the zip crate.
async fn extract(archive: &Path, dest: &Path) -> MediaResult<()> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || -> MediaResult<()> {
        let file = File::open(&archive)?;
        let mut zip = ZipArchive::new(file).map_err(|e| MediaError::archive_corrupt(e.to_string()))?;
        zip.extract(&dest)
            .map_err(|e| MediaError::archive_corrupt(e.to_string()))
    })
    .await
    .map_err(|e| MediaError::archive_corrupt(format!("extraction task failed: {}", e)))?
}
