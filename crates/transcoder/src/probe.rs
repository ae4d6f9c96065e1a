use std::path::{Path, PathBuf};

use splitstitch_core::{ClipProfile, Codec, FrameRate};

use crate::TranscodeError;

/// Source of stream properties for an input clip.
#[async_trait::async_trait]
pub trait MediaProber: Send + Sync {
    async fn probe(&self, file: &Path) -> Result<ClipProfile, TranscodeError>;
}

/// Prober backed by `ffprobe -print_format json`.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    pub ffprobe_path: PathBuf,
}

impl FfprobeProber {
    pub fn new(ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }
}

#[async_trait::async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, file: &Path) -> Result<ClipProfile, TranscodeError> {
        let output = tokio::process::Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
                "-select_streams",
                "v:0",
            ])
            .arg(file)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TranscodeError::spawn(&self.ffprobe_path, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranscodeError::ProbeFailed(stderr.into_owned()));
        }

        let raw: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| TranscodeError::ProbeFailed(format!("parse JSON: {e}")))?;

        parse_probe_output(&raw)
    }
}

fn parse_probe_output(raw: &serde_json::Value) -> Result<ClipProfile, TranscodeError> {
    let video = raw
        .get("streams")
        .and_then(|v| v.as_array())
        .and_then(|streams| {
            streams
                .iter()
                .find(|s| s.get("codec_type").and_then(|v| v.as_str()) == Some("video"))
        })
        .ok_or_else(|| TranscodeError::ProbeFailed("no video stream".into()))?;

    let codec_name = video
        .get("codec_name")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    let codec: Codec = codec_name
        .parse()
        .map_err(|e: String| TranscodeError::Unsupported(e))?;

    let width = video.get("width").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let height = video.get("height").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    if width == 0 || height == 0 {
        return Err(TranscodeError::ProbeFailed("missing video dimensions".into()));
    }

    let frame_rate = ["r_frame_rate", "avg_frame_rate"]
        .iter()
        .filter_map(|key| video.get(*key).and_then(|v| v.as_str()))
        .find_map(parse_frame_rate)
        .ok_or_else(|| TranscodeError::ProbeFailed("missing frame rate".into()))?;

    // Container duration first, stream duration as fallback.
    let duration_secs = raw
        .get("format")
        .and_then(|f| f.get("duration"))
        .or_else(|| video.get("duration"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|d| *d > 0.0)
        .ok_or_else(|| TranscodeError::ProbeFailed("missing duration".into()))?;

    Ok(ClipProfile::new(width, height, duration_secs, frame_rate, codec))
}

fn parse_frame_rate(s: &str) -> Option<FrameRate> {
    if let Some((num, den)) = s.split_once('/') {
        FrameRate::new(num.trim().parse().ok()?, den.trim().parse().ok()?)
    } else {
        FrameRate::new(s.trim().parse().ok()?, 1)
    }
}
