use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::types::RunState;

/// Run-level error taxonomy. Each class maps to its own process exit code.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("capacity query failed: {0}")]
    CapacityQuery(String),

    #[error("splitting input failed: {0}")]
    SplitFailed(String),

    #[error(
        "jobs {failed:?} failed with a resource allocation error; \
         consider rerunning with fewer jobs per device"
    )]
    ResourceExhausted { failed: Vec<usize> },

    #[error("jobs {failed:?} did not finish successfully; see {log_hint} for details")]
    WorkerFailure { failed: Vec<usize>, log_hint: String },

    #[error("stitching segments failed (temporary files kept): {0}")]
    Stitch(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Precondition(_) => "precondition",
            Self::CapacityQuery(_) => "capacity_query",
            Self::SplitFailed(_) => "split_failed",
            Self::ResourceExhausted { .. } => "resource_exhausted",
            Self::WorkerFailure { .. } => "worker_failure",
            Self::Stitch(_) => "stitch_error",
            Self::Cancelled => "cancelled",
            Self::Io(_) => "io_error",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Io(_) => 1,
            Self::Precondition(_) => 2,
            Self::CapacityQuery(_) => 3,
            Self::ResourceExhausted { .. } => 4,
            Self::WorkerFailure { .. } => 5,
            Self::Stitch(_) => 6,
            Self::SplitFailed(_) => 7,
            Self::Cancelled => 130,
        }
    }

    pub fn run_state(&self) -> RunState {
        match self {
            Self::ResourceExhausted { .. } | Self::WorkerFailure { .. } => RunState::PartialFailure,
            _ => RunState::Aborted,
        }
    }

    /// Job indices that failed, when the error came from a wave.
    pub fn failed_jobs(&self) -> &[usize] {
        match self {
            Self::ResourceExhausted { failed } | Self::WorkerFailure { failed, .. } => failed,
            _ => &[],
        }
    }

    /// Whether intermediate files should be removed after this error.
    pub fn cleans_up(&self) -> bool {
        !matches!(self, Self::Stitch(_))
    }
}

/// JSON error envelope: `{ "error": { "code": "…", "message": "…", "exit_code": n, "failed_jobs": [] } }`
#[derive(Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub exit_code: u8,
    pub state: RunState,
    pub failed_jobs: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_secs: Option<f64>,
}

impl ErrorEnvelope {
    /// Attach the wall time the run took before it failed.
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.error.elapsed_secs = Some(elapsed.as_secs_f64());
        self
    }
}

impl From<&RunError> for ErrorEnvelope {
    fn from(e: &RunError) -> Self {
        Self {
            error: ErrorBody {
                code: e.code().to_string(),
                message: e.to_string(),
                exit_code: e.exit_code(),
                state: e.run_state(),
                failed_jobs: e.failed_jobs().to_vec(),
                elapsed_secs: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let errors = [
            RunError::Precondition("x".into()),
            RunError::CapacityQuery("x".into()),
            RunError::SplitFailed("x".into()),
            RunError::ResourceExhausted { failed: vec![1] },
            RunError::WorkerFailure {
                failed: vec![0],
                log_hint: "job0000.log".into(),
            },
            RunError::Stitch("x".into()),
            RunError::Cancelled,
            RunError::Io(std::io::Error::other("x")),
        ];
        let mut codes: Vec<u8> = errors.iter().map(|e| e.exit_code()).collect();
        assert!(codes.iter().all(|c| *c != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn job_failures_are_partial() {
        let e = RunError::ResourceExhausted { failed: vec![2, 3] };
        assert_eq!(e.run_state(), RunState::PartialFailure);
        assert_eq!(e.failed_jobs(), &[2, 3]);
        assert!(e.cleans_up());

        let e = RunError::Stitch("concat".into());
        assert_eq!(e.run_state(), RunState::Aborted);
        assert!(!e.cleans_up());
    }

    #[test]
    fn envelope_carries_code() {
        let e = RunError::Precondition("bitrate out of range".into());
        let json = serde_json::to_value(ErrorEnvelope::from(&e)).unwrap();
        assert_eq!(json["error"]["code"], "precondition");
        assert_eq!(json["error"]["exit_code"], 2);
        assert_eq!(json["error"]["state"], "aborted");
        assert!(json["error"].get("elapsed_secs").is_none());
    }

    #[test]
    fn envelope_reports_elapsed_time() {
        let e = RunError::WorkerFailure {
            failed: vec![1],
            log_hint: "/tmp/run".into(),
        };
        let envelope = ErrorEnvelope::from(&e).with_elapsed(Duration::from_millis(2500));
        let json = serde_json::to_value(envelope).unwrap();
        assert_eq!(json["error"]["elapsed_secs"], 2.5);
        assert_eq!(json["error"]["failed_jobs"], serde_json::json!([1]));
    }
}
