use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use splitstitch_core::{ClipProfile, DevicePool, RunError, RunState};
use tracing::info;

use crate::planner::SegmentPlan;
use crate::segments::SegmentTool;
use crate::workdir::WorkDir;

/// Hand segment outputs to the stitcher strictly in job index order.
///
/// Completion order of the jobs never matters here.
pub async fn stitch(
    tool: &dyn SegmentTool,
    mut outputs: Vec<(usize, PathBuf)>,
    output: &Path,
    workdir: &WorkDir,
) -> Result<(), RunError> {
    outputs.sort_by_key(|(index, _)| *index);
    let parts: Vec<PathBuf> = outputs.into_iter().map(|(_, path)| path).collect();
    if parts.is_empty() {
        return Err(RunError::Stitch("no segment outputs to concatenate".into()));
    }

    tool.stitch(&parts, output, workdir)
        .await
        .map_err(|e| RunError::Stitch(e.to_string()))?;

    info!(segments = parts.len(), output = %output.display(), "stitched final clip");
    Ok(())
}

/// Effective processing rate of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Throughput {
    pub elapsed_secs: f64,
    pub frames_per_sec: f64,
    /// How many times faster than realtime.
    pub speed: f64,
}

impl Throughput {
    pub fn compute(frame_count: u64, duration_secs: f64, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64().max(1e-3);
        Self {
            elapsed_secs: elapsed.as_secs_f64(),
            frames_per_sec: frame_count as f64 / secs,
            speed: duration_secs / secs,
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub input: PathBuf,
    pub output: PathBuf,
    pub profile: ClipProfile,
    pub devices: DevicePool,
    pub plan: SegmentPlan,
    pub segments: usize,
    pub waves: usize,
    pub failed_jobs: Vec<usize>,
    pub throughput: Throughput,
}

impl RunReport {
    /// Multi-line performance summary for the terminal.
    pub fn summary(&self) -> String {
        format!(
            "Performance summary\n  \
             total processing time        : {}\n  \
             effective processing rate    : {:.2} fps\n  \
             effective processing speed   : {:.1} times faster than realtime\n",
            format_elapsed(Duration::from_secs_f64(self.throughput.elapsed_secs)),
            self.throughput.frames_per_sec,
            self.throughput.speed,
        )
    }
}

/// `H:MM:SS`, truncated to whole seconds.
pub fn format_elapsed(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TranscodeError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTool {
        parts: Mutex<Vec<PathBuf>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl SegmentTool for RecordingTool {
        async fn split(
            &self,
            _input: &Path,
            _target: Duration,
            _workdir: &WorkDir,
        ) -> Result<Vec<PathBuf>, TranscodeError> {
            Ok(vec![])
        }

        async fn stitch(
            &self,
            parts: &[PathBuf],
            _output: &Path,
            _workdir: &WorkDir,
        ) -> Result<(), TranscodeError> {
            if self.fail {
                return Err(TranscodeError::ToolFailed {
                    tool: "ffmpeg".into(),
                    message: "exit status: 1".into(),
                });
            }
            *self.parts.lock().unwrap() = parts.to_vec();
            Ok(())
        }
    }

    #[tokio::test]
    async fn outputs_are_ordered_by_index() {
        let tool = RecordingTool::default();
        let wd = WorkDir::at("/w");
        let outputs = vec![
            (2, PathBuf::from("/w/out0002.mp4")),
            (0, PathBuf::from("/w/out0000.mp4")),
            (5, PathBuf::from("/w/out0005.mp4")),
            (1, PathBuf::from("/w/out0001.mp4")),
        ];
        stitch(&tool, outputs, Path::new("/o/final.mp4"), &wd)
            .await
            .unwrap();
        let parts = tool.parts.lock().unwrap().clone();
        assert_eq!(
            parts,
            vec![
                PathBuf::from("/w/out0000.mp4"),
                PathBuf::from("/w/out0001.mp4"),
                PathBuf::from("/w/out0002.mp4"),
                PathBuf::from("/w/out0005.mp4"),
            ]
        );
    }

    #[tokio::test]
    async fn stitch_failure_is_stitch_error() {
        let tool = RecordingTool {
            fail: true,
            ..Default::default()
        };
        let wd = WorkDir::at("/w");
        let err = stitch(&tool, vec![(0, PathBuf::from("a"))], Path::new("o.mp4"), &wd)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Stitch(_)));
        assert!(!err.cleans_up());

        let err = stitch(&tool, vec![], Path::new("o.mp4"), &wd)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Stitch(_)));
    }

    #[test]
    fn throughput_from_elapsed() {
        let t = Throughput::compute(7200, 120.0, Duration::from_secs(30));
        assert!((t.frames_per_sec - 240.0).abs() < 1e-9);
        assert!((t.speed - 4.0).abs() < 1e-9);

        let t = Throughput::compute(10, 1.0, Duration::ZERO);
        assert!(t.frames_per_sec.is_finite());
    }

    #[test]
    fn elapsed_formatting() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "0:00:00");
        assert_eq!(format_elapsed(Duration::from_secs(75)), "0:01:15");
        assert_eq!(format_elapsed(Duration::from_secs(3725)), "1:02:05");
    }
}
