#![allow(clippy::collapsible_if, clippy::redundant_closure)]
pub mod capacity;
pub mod devices;
pub mod dispatch;
pub mod monitor;
pub mod planner;
pub mod probe;
pub mod reconcile;
pub mod request;
pub mod scheduler;
pub mod segments;
pub mod stitch;
pub mod worker;
pub mod workdir;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub use splitstitch_core::{ClipProfile, Codec, DevicePool, FrameRate, RunError, RunState};

/// Failure of an external collaborator (prober, device tools, splitter, stitcher).
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("tool not found at {0}")]
    BinaryNotFound(PathBuf),
    #[error("probe failed: {0}")]
    ProbeFailed(String),
    #[error("unsupported input: {0}")]
    Unsupported(String),
    #[error("{tool} failed: {message}")]
    ToolFailed { tool: String, message: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscodeError {
    /// Map a spawn error, turning `NotFound` into [`TranscodeError::BinaryNotFound`].
    pub(crate) fn spawn(tool: &std::path::Path, e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            Self::BinaryNotFound(tool.to_path_buf())
        } else {
            Self::ToolFailed {
                tool: tool.display().to_string(),
                message: format!("spawn: {e}"),
            }
        }
    }
}

/// Global scheduler configuration: tool locations and tunables.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub gst_launch_path: PathBuf,
    pub xclbin_path: PathBuf,
    pub xbutil_path: PathBuf,
    /// Substring identifying one device line in `xbutil examine` output.
    pub device_pattern: String,
    pub xrmadm_path: PathBuf,
    pub xrm_list_cmd: PathBuf,
    pub reservation_tool_path: PathBuf,
    pub reservation_file: PathBuf,
    /// Parent of the per-run working directories.
    pub work_root: PathBuf,
    pub poll_interval: Duration,
    /// Kill-and-abort limit for a single worker. `None` waits forever.
    pub job_timeout: Option<Duration>,
    pub require_idle_devices: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            gst_launch_path: PathBuf::from("gst-launch-1.0"),
            xclbin_path: PathBuf::from("/opt/xilinx/xcdr/xclbins/transcode.xclbin"),
            xbutil_path: PathBuf::from("xbutil"),
            device_pattern: "xilinx_u30".into(),
            xrmadm_path: PathBuf::from("xrmadm"),
            xrm_list_cmd: PathBuf::from("/opt/xilinx/xrm/test/list_cmd.json"),
            reservation_tool_path: PathBuf::from("jobSlotReservation"),
            reservation_file: PathBuf::from("/var/tmp/xilinx/xrm_jobReservation.sh"),
            work_root: std::env::temp_dir().join("splitstitch"),
            poll_interval: Duration::from_millis(100),
            job_timeout: None,
            require_idle_devices: true,
        }
    }
}
