use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use splitstitch_core::RunError;
use tracing::{info, warn};

use crate::dispatch::{JobOutcome, JobRecord};

/// Signature the hardware plugins print when no decoder/encoder channel could be allocated.
static ALLOCATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\ballocat(?:e|ion)\b").unwrap());

/// Classification of a finished wave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaveVerdict {
    AllSucceeded,
    ResourceExhausted { failed: Vec<usize> },
    WorkerFailure { failed: Vec<usize> },
}

impl WaveVerdict {
    /// `Ok` when the run may continue to the next wave or to stitching.
    pub fn into_result(self, log_hint: &Path) -> Result<(), RunError> {
        match self {
            Self::AllSucceeded => Ok(()),
            Self::ResourceExhausted { failed } => Err(RunError::ResourceExhausted { failed }),
            Self::WorkerFailure { failed } => Err(RunError::WorkerFailure {
                failed,
                log_hint: log_hint.display().to_string(),
            }),
        }
    }
}

pub fn has_allocation_signature(log: &str) -> bool {
    ALLOCATION_RE.is_match(log)
}

/// Inspect a wave's outcomes. Only logs of failed jobs are scanned.
pub async fn classify(records: &[JobRecord]) -> WaveVerdict {
    let failed: Vec<&JobRecord> = records
        .iter()
        .filter(|r| !r.outcome.is_success())
        .collect();

    if failed.is_empty() {
        info!(jobs = records.len(), "wave finished successfully");
        return WaveVerdict::AllSucceeded;
    }

    let mut allocation = false;
    for record in &failed {
        // Killed or never-started jobs have no meaningful diagnostics.
        if !matches!(record.outcome, JobOutcome::Failed { .. }) {
            continue;
        }
        match tokio::fs::read(&record.spec.log).await {
            Ok(bytes) => {
                if has_allocation_signature(&String::from_utf8_lossy(&bytes)) {
                    allocation = true;
                    warn!(index = record.spec.index, device_id = record.spec.device_id, "job failed to allocate hardware resources");
                }
            }
            Err(e) => warn!(index = record.spec.index, error = %e, "cannot read job log"),
        }
    }

    let indices: Vec<usize> = failed.iter().map(|r| r.spec.index).collect();
    if allocation {
        WaveVerdict::ResourceExhausted { failed: indices }
    } else {
        WaveVerdict::WorkerFailure { failed: indices }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::JobSpec;
    use crate::request::EncodeParams;
    use splitstitch_core::Codec;
    use std::path::PathBuf;

    fn record(dir: &Path, index: usize, outcome: JobOutcome, log: &str) -> JobRecord {
        let log_path = dir.join(format!("job{index:04}.log"));
        std::fs::write(&log_path, log).unwrap();
        JobRecord {
            spec: JobSpec {
                index,
                device_id: index % 2,
                input: PathBuf::from(format!("seg{index:04}.mkv")),
                output: PathBuf::from(format!("out{index:04}.mp4")),
                log: log_path,
                codec_in: Codec::H264,
                encode: EncodeParams {
                    codec_out: Codec::Hevc,
                    bitrate_kbps: 5000,
                    extra_options: String::new(),
                    output_extension: "mp4".into(),
                },
            },
            outcome,
        }
    }

    #[test]
    fn detects_allocation_signature() {
        assert!(has_allocation_signature(
            "ERROR: vvas_xvcuenc0: failed to allocate encoder channel"
        ));
        assert!(has_allocation_signature("xrm: Allocation of CU failed"));
        assert!(!has_allocation_signature("ERROR: from element qtdemux0: Internal data stream error."));
        assert!(!has_allocation_signature("allocated output buffer pool"));
    }

    #[tokio::test]
    async fn all_success_continues() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![
            record(dir.path(), 0, JobOutcome::Succeeded, "rendered: 10"),
            record(dir.path(), 1, JobOutcome::Succeeded, "rendered: 10"),
        ];
        assert_eq!(classify(&records).await, WaveVerdict::AllSucceeded);
    }

    #[tokio::test]
    async fn allocation_failure_is_resource_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![
            record(dir.path(), 0, JobOutcome::Succeeded, "rendered: 10"),
            record(
                dir.path(),
                1,
                JobOutcome::Failed { exit_code: Some(1) },
                "ERROR: unable to allocate decoder resources",
            ),
            record(
                dir.path(),
                2,
                JobOutcome::Failed { exit_code: Some(1) },
                "ERROR: pipeline doesn't want to preroll",
            ),
        ];
        let verdict = classify(&records).await;
        assert_eq!(verdict, WaveVerdict::ResourceExhausted { failed: vec![1, 2] });
        let err = verdict.into_result(dir.path()).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[tokio::test]
    async fn other_failure_is_worker_failure() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![record(
            dir.path(),
            0,
            JobOutcome::Failed { exit_code: Some(255) },
            "ERROR: from element filesrc0: No such file",
        )];
        let verdict = classify(&records).await;
        assert_eq!(verdict, WaveVerdict::WorkerFailure { failed: vec![0] });
        assert!(matches!(
            verdict.into_result(dir.path()),
            Err(RunError::WorkerFailure { .. })
        ));
    }

    #[tokio::test]
    async fn timed_out_job_is_worker_failure() {
        let dir = tempfile::tempdir().unwrap();
        // The log mentions allocation but the job was killed, not refused.
        let records = vec![record(
            dir.path(),
            3,
            JobOutcome::TimedOut,
            "failed to allocate encoder channel",
        )];
        assert_eq!(
            classify(&records).await,
            WaveVerdict::WorkerFailure { failed: vec![3] }
        );
    }
}
