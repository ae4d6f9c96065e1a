use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Video codec handled by the hardware decoder and encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    H264,
    Hevc,
}

impl Codec {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::Hevc => "hevc",
        }
    }

    /// Name of the GStreamer bitstream parser for this codec.
    pub fn parser_element(self) -> &'static str {
        match self {
            Self::H264 => "h264parse",
            Self::Hevc => "h265parse",
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Codec {
    type Err = String;

    /// Accepts `h264`, `hevc` and `h265` (normalized to `hevc`), case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h264" | "avc" => Ok(Self::H264),
            "hevc" | "h265" => Ok(Self::Hevc),
            other => Err(format!("unsupported codec '{other}' (expected h264, hevc or h265)")),
        }
    }
}

/// Rational frame rate, e.g. 60000/1001.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    /// Returns `None` when the denominator or numerator is zero.
    pub fn new(num: u32, den: u32) -> Option<Self> {
        if num == 0 || den == 0 {
            None
        } else {
            Some(Self { num, den })
        }
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }
}

impl std::fmt::Display for FrameRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Stream properties of the source clip. Produced once per run by the prober.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipProfile {
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
    pub frame_rate: FrameRate,
    pub frame_count: u64,
    pub codec: Codec,
}

impl ClipProfile {
    /// Build a profile, deriving `frame_count` as `ceil(fps * duration)`.
    pub fn new(
        width: u32,
        height: u32,
        duration_secs: f64,
        frame_rate: FrameRate,
        codec: Codec,
    ) -> Self {
        let frame_count = (frame_rate.as_f64() * duration_secs).ceil().max(0.0) as u64;
        Self {
            width,
            height,
            duration_secs,
            frame_rate,
            frame_count,
            codec,
        }
    }
}

/// Hardware devices available for this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePool {
    pub total: usize,
    pub requested: i32,
    pub enabled: usize,
}

impl DevicePool {
    /// `requested <= 0` enables every device; larger requests are clamped to `total`.
    /// Returns `None` when no device is present.
    pub fn new(total: usize, requested: i32) -> Option<Self> {
        if total == 0 {
            return None;
        }
        let enabled = if requested <= 0 {
            total
        } else {
            (requested as usize).min(total)
        };
        Some(Self {
            total,
            requested,
            enabled,
        })
    }

    /// True when the caller asked for more devices than exist.
    pub fn was_clamped(&self) -> bool {
        self.requested > 0 && self.requested as usize > self.total
    }

    /// Round-robin device assignment for a job index.
    pub fn device_for(&self, index: usize) -> usize {
        index % self.enabled
    }
}

/// Lifecycle of one segment job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Success,
    PartialFailure,
    Aborted,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialFailure => "partial_failure",
            Self::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
