use std::path::PathBuf;
use std::time::Duration;

use splitstitch_transcoder::SchedulerConfig;

/// Build the scheduler config from `SPLITSTITCH_*` environment variables.
pub fn from_env() -> SchedulerConfig {
    from_lookup(|key| std::env::var(key).ok())
}

pub(crate) fn from_lookup(var: impl Fn(&str) -> Option<String>) -> SchedulerConfig {
    let defaults = SchedulerConfig::default();
    let path = |key: &str, default: PathBuf| var(key).map(PathBuf::from).unwrap_or(default);

    let poll_interval = var("SPLITSTITCH_POLL_MS")
        .and_then(|v| v.parse().ok())
        .filter(|ms: &u64| *ms > 0)
        .map(Duration::from_millis)
        .unwrap_or(defaults.poll_interval);
    // 0 disables the timeout
    let job_timeout = var("SPLITSTITCH_JOB_TIMEOUT_SECS")
        .and_then(|v| v.parse().ok())
        .filter(|secs: &u64| *secs > 0)
        .map(Duration::from_secs);
    let require_idle_devices = var("SPLITSTITCH_REQUIRE_IDLE")
        .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no"))
        .unwrap_or(defaults.require_idle_devices);

    SchedulerConfig {
        ffmpeg_path: path("SPLITSTITCH_FFMPEG", defaults.ffmpeg_path),
        ffprobe_path: path("SPLITSTITCH_FFPROBE", defaults.ffprobe_path),
        gst_launch_path: path("SPLITSTITCH_GST_LAUNCH", defaults.gst_launch_path),
        xclbin_path: path("SPLITSTITCH_XCLBIN", defaults.xclbin_path),
        xbutil_path: path("SPLITSTITCH_XBUTIL", defaults.xbutil_path),
        device_pattern: var("SPLITSTITCH_DEVICE_PATTERN").unwrap_or(defaults.device_pattern),
        xrmadm_path: path("SPLITSTITCH_XRMADM", defaults.xrmadm_path),
        xrm_list_cmd: path("SPLITSTITCH_XRM_LIST_CMD", defaults.xrm_list_cmd),
        reservation_tool_path: path("SPLITSTITCH_RESERVATION_TOOL", defaults.reservation_tool_path),
        reservation_file: path("SPLITSTITCH_RESERVATION_FILE", defaults.reservation_file),
        work_root: path("SPLITSTITCH_WORK_DIR", defaults.work_root),
        poll_interval,
        job_timeout,
        require_idle_devices,
    }
}
