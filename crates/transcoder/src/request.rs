use std::path::{Path, PathBuf};

use serde::Serialize;
use splitstitch_core::{Codec, RunError};

pub const MIN_BITRATE_MBPS: f64 = 1.0;
pub const MAX_BITRATE_MBPS: f64 = 25.0;

const INPUT_EXTENSIONS: [&str; 4] = ["mp4", "mov", "MOV", "mkv"];
const OUTPUT_EXTENSIONS: [&str; 1] = ["mp4"];

/// One segmented transcode run as asked for by the operator.
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub codec: Codec,
    pub bitrate_mbps: f64,
    /// `<= 0` lets the capacity estimate decide.
    pub jobs_per_device: i32,
    /// `<= 0` uses every device.
    pub devices: i32,
    /// Passed to the encoder verbatim after the bitrate settings.
    pub extra_options: String,
}

/// Encoder settings shared by every job of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodeParams {
    pub codec_out: Codec,
    pub bitrate_kbps: u32,
    pub extra_options: String,
    /// Extension used for segment outputs, taken from the final output.
    pub output_extension: String,
}

impl TranscodeRequest {
    /// Check everything that can be checked without touching the hardware.
    pub fn validate(&self) -> Result<EncodeParams, RunError> {
        if !(MIN_BITRATE_MBPS..=MAX_BITRATE_MBPS).contains(&self.bitrate_mbps) {
            return Err(RunError::Precondition(format!(
                "bitrate should be between {MIN_BITRATE_MBPS} and {MAX_BITRATE_MBPS} Mbit/s, got {}",
                self.bitrate_mbps
            )));
        }

        let output_extension = extension(&self.output)
            .filter(|ext| OUTPUT_EXTENSIONS.contains(ext))
            .ok_or_else(|| {
                RunError::Precondition(format!(
                    "only .mp4 output is supported: {}",
                    self.output.display()
                ))
            })?;

        if !extension(&self.input).is_some_and(|ext| INPUT_EXTENSIONS.contains(&ext)) {
            return Err(RunError::Precondition(format!(
                "only .mp4, .mov and .mkv input is supported: {}",
                self.input.display()
            )));
        }

        if self.input == self.output {
            return Err(RunError::Precondition(
                "source and destination file names cannot be the same".into(),
            ));
        }

        if !self.input.is_file() {
            return Err(RunError::Precondition(format!(
                "input file {} not found",
                self.input.display()
            )));
        }

        Ok(EncodeParams {
            codec_out: self.codec,
            bitrate_kbps: (self.bitrate_mbps * 1000.0) as u32,
            extra_options: self.extra_options.trim().to_string(),
            output_extension: output_extension.to_string(),
        })
    }
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}
