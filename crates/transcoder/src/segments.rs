//! Container-level splitting and concatenation.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tracing::info;

use crate::TranscodeError;
use crate::workdir::WorkDir;

/// Splits a clip into keyframe-aligned segments and joins segment outputs.
#[async_trait::async_trait]
pub trait SegmentTool: Send + Sync {
    /// Cut `input` into segments of roughly `target` length inside `workdir`.
    /// Returns the produced segment files ordered by index.
    async fn split(
        &self,
        input: &Path,
        target: Duration,
        workdir: &WorkDir,
    ) -> Result<Vec<PathBuf>, TranscodeError>;

    /// Concatenate `parts` in the given order into `output`.
    async fn stitch(
        &self,
        parts: &[PathBuf],
        output: &Path,
        workdir: &WorkDir,
    ) -> Result<(), TranscodeError>;
}

/// Stream-copy splitter and concatenator built on ffmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegSegmentTool {
    pub ffmpeg_path: PathBuf,
}

impl FfmpegSegmentTool {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    async fn run_logged(&self, args: Vec<String>, log_path: &Path) -> Result<(), TranscodeError> {
        let log_file = std::fs::File::create(log_path)?;
        let status = tokio::process::Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log_file))
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| TranscodeError::spawn(&self.ffmpeg_path, e))?;

        if !status.success() {
            return Err(TranscodeError::ToolFailed {
                tool: self.ffmpeg_path.display().to_string(),
                message: format!("{status}, see {}", log_path.display()),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SegmentTool for FfmpegSegmentTool {
    async fn split(
        &self,
        input: &Path,
        target: Duration,
        workdir: &WorkDir,
    ) -> Result<Vec<PathBuf>, TranscodeError> {
        let args = split_args(input, target, &workdir.segment_pattern());
        info!(input = %input.display(), target_secs = target.as_secs(), "splitting input clip");
        self.run_logged(args, &workdir.split_log()).await?;
        workdir.list_segments().await
    }

    async fn stitch(
        &self,
        parts: &[PathBuf],
        output: &Path,
        workdir: &WorkDir,
    ) -> Result<(), TranscodeError> {
        let list = workdir.concat_list();
        tokio::fs::write(&list, concat_list(parts)).await?;
        let args = stitch_args(&list, output);
        info!(parts = parts.len(), output = %output.display(), "concatenating segments");
        self.run_logged(args, &workdir.stitch_log()).await
    }
}

fn split_args(input: &Path, target: Duration, pattern: &Path) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-y".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-map".into(),
        "0:v:0".into(),
        "-c".into(),
        "copy".into(),
        "-f".into(),
        "segment".into(),
        "-segment_time".into(),
        target.as_secs().to_string(),
        "-segment_format".into(),
        "matroska".into(),
        "-reset_timestamps".into(),
        "1".into(),
        pattern.to_string_lossy().into_owned(),
    ]
}

fn stitch_args(list: &Path, output: &Path) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-y".into(),
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        list.to_string_lossy().into_owned(),
        "-c".into(),
        "copy".into(),
        "-movflags".into(),
        "+faststart".into(),
        output.to_string_lossy().into_owned(),
    ]
}

/// Concat demuxer list, one `file '…'` line per part in order.
fn concat_list(parts: &[PathBuf]) -> String {
    parts
        .iter()
        .map(|p| {
            let escaped = p.to_string_lossy().replace('\'', r"'\''");
            format!("file '{escaped}'\n")
        })
        .collect()
}
