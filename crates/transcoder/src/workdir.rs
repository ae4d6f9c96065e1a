use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::TranscodeError;

const SEGMENT_PREFIX: &str = "seg";
const OUTPUT_PREFIX: &str = "out";
const LOG_PREFIX: &str = "job";
const SPLIT_LOG: &str = "split.log";
const STITCH_LOG: &str = "stitch.log";
const CONCAT_LIST: &str = "concat.txt";

/// Per-run scratch directory holding segments, segment outputs and job logs.
#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    /// Create `<parent>/<run_id>`.
    pub async fn create(parent: &Path, run_id: &str) -> Result<Self, TranscodeError> {
        let root = parent.join(run_id);
        tokio::fs::create_dir_all(&root).await?;
        debug!(path = %root.display(), "created work dir");
        Ok(Self { root })
    }

    /// Wrap an existing directory without creating it.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `printf`-style pattern the splitter writes segments to.
    pub fn segment_pattern(&self) -> PathBuf {
        self.root.join(format!("{SEGMENT_PREFIX}%04d.mkv"))
    }

    pub fn segment_path(&self, index: usize) -> PathBuf {
        self.root.join(format!("{SEGMENT_PREFIX}{index:04}.mkv"))
    }

    pub fn output_path(&self, index: usize, extension: &str) -> PathBuf {
        self.root.join(format!("{OUTPUT_PREFIX}{index:04}.{extension}"))
    }

    pub fn log_path(&self, index: usize) -> PathBuf {
        self.root.join(format!("{LOG_PREFIX}{index:04}.log"))
    }

    pub fn split_log(&self) -> PathBuf {
        self.root.join(SPLIT_LOG)
    }

    pub fn stitch_log(&self) -> PathBuf {
        self.root.join(STITCH_LOG)
    }

    pub fn concat_list(&self) -> PathBuf {
        self.root.join(CONCAT_LIST)
    }

    /// Segments the splitter produced, ordered by index.
    pub async fn list_segments(&self) -> Result<Vec<PathBuf>, TranscodeError> {
        let mut segments = Vec::new();
        let mut rd = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = rd.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(SEGMENT_PREFIX) && name.ends_with(".mkv") {
                segments.push(entry.path());
            }
        }
        segments.sort();
        Ok(segments)
    }

    /// Remove every intermediate file and then the directory itself.
    ///
    /// Missing files or a missing directory are not errors, so this can run
    /// repeatedly and on any abort path.
    pub async fn cleanup(&self) -> Result<(), TranscodeError> {
        let mut rd = match tokio::fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0usize;
        while let Some(entry) = rd.next_entry().await? {
            let name = entry.file_name();
            if !is_intermediate(&name.to_string_lossy()) {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "failed to remove intermediate");
                }
            }
        }

        // Only succeeds once nothing but our own files were in it.
        match tokio::fs::remove_dir(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                debug!(path = %self.root.display(), error = %e, "work dir not removed");
            }
        }

        info!(path = %self.root.display(), removed, "cleanup complete");
        Ok(())
    }
}

fn is_intermediate(name: &str) -> bool {
    name.starts_with(SEGMENT_PREFIX)
        || name.starts_with(OUTPUT_PREFIX)
        || (name.starts_with(LOG_PREFIX) && name.ends_with(".log"))
        || name == SPLIT_LOG
        || name == STITCH_LOG
        || name == CONCAT_LIST
}
