//! Segmented parallel transcode run.
//!
//! Validate -> probe -> enumerate devices -> estimate capacity -> plan -> split
//! -> dispatch waves -> classify -> stitch -> cleanup.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use splitstitch_core::{ClipProfile, DevicePool, RunError, RunState};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capacity::{self, CapacityOracle, XrmOracle};
use crate::devices::{DeviceEnumerator, XbutilEnumerator};
use crate::dispatch::{self, DispatchOptions};
use crate::monitor::{self, ProgressMonitor};
use crate::planner::{self, SegmentPlan};
use crate::probe::{FfprobeProber, MediaProber};
use crate::reconcile;
use crate::request::{EncodeParams, TranscodeRequest};
use crate::segments::{FfmpegSegmentTool, SegmentTool};
use crate::stitch::{self, RunReport, Throughput};
use crate::worker::{GstWorker, WorkerLauncher};
use crate::workdir::WorkDir;
use crate::{SchedulerConfig, TranscodeError};

/// External collaborators the scheduler talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub prober: Arc<dyn MediaProber>,
    pub devices: Arc<dyn DeviceEnumerator>,
    pub oracle: Arc<dyn CapacityOracle>,
    pub segments: Arc<dyn SegmentTool>,
    pub launcher: Arc<dyn WorkerLauncher>,
}

impl Collaborators {
    /// The real tools: ffprobe, xbutil, XRM, ffmpeg and gst-launch.
    pub fn system(config: &SchedulerConfig) -> Self {
        Self {
            prober: Arc::new(FfprobeProber::new(&config.ffprobe_path)),
            devices: Arc::new(XbutilEnumerator::new(
                &config.xbutil_path,
                config.device_pattern.clone(),
            )),
            oracle: Arc::new(XrmOracle {
                xrmadm_path: config.xrmadm_path.clone(),
                list_cmd: config.xrm_list_cmd.clone(),
                reservation_tool: config.reservation_tool_path.clone(),
                reservation_file: config.reservation_file.clone(),
                scratch_dir: config.work_root.clone(),
            }),
            segments: Arc::new(FfmpegSegmentTool::new(&config.ffmpeg_path)),
            launcher: Arc::new(GstWorker::new(&config.gst_launch_path, &config.xclbin_path)),
        }
    }
}

/// Runs one segmented transcode at a time against a device pool.
pub struct Scheduler {
    config: SchedulerConfig,
    tools: Collaborators,
}

/// Everything fixed before the first segment is produced.
struct Prepared {
    encode: EncodeParams,
    profile: ClipProfile,
    pool: DevicePool,
    plan: SegmentPlan,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, tools: Collaborators) -> Self {
        Self { config, tools }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Execute a full run. Cancelling `cancel` kills every worker and cleans up.
    pub async fn run(
        &self,
        request: &TranscodeRequest,
        cancel: CancellationToken,
    ) -> Result<RunReport, RunError> {
        let started = Instant::now();
        let started_at = Utc::now();

        let prepared = cancellable(&cancel, self.prepare(request)).await??;

        let run_id = uuid::Uuid::new_v4().to_string();
        let workdir = WorkDir::create(&self.config.work_root, &run_id)
            .await
            .map_err(|e| RunError::Precondition(format!("cannot create work dir: {e}")))?;
        info!(run_id = %run_id, work_dir = %workdir.root().display(), "run started");

        let result = self.execute(request, prepared, &workdir, &cancel).await;

        match &result {
            Err(e) if !e.cleans_up() => {
                warn!(work_dir = %workdir.root().display(), error = %e, "keeping temporary files");
            }
            _ => {
                if let Err(e) = workdir.cleanup().await {
                    warn!(error = %e, "cleanup failed");
                }
            }
        }

        let report = result?;
        let throughput = Throughput::compute(
            report.profile.frame_count,
            report.profile.duration_secs,
            started.elapsed(),
        );
        Ok(RunReport {
            run_id,
            state: RunState::Success,
            started_at,
            input: request.input.clone(),
            output: request.output.clone(),
            profile: report.profile,
            devices: report.pool,
            plan: report.plan,
            segments: report.segments,
            waves: report.waves,
            failed_jobs: Vec::new(),
            throughput,
        })
    }

    /// Preconditions, probing, device enumeration, capacity and planning.
    async fn prepare(&self, request: &TranscodeRequest) -> Result<Prepared, RunError> {
        let encode = request.validate()?;

        if self.config.require_idle_devices {
            let busy = match self.tools.oracle.resources_in_use().await {
                Ok(busy) => busy,
                // An explicit job count does not depend on the resource manager.
                Err(e) if request.jobs_per_device > 0 => {
                    warn!(error = %e, "utilization query failed, skipping idle check");
                    false
                }
                Err(e) => return Err(RunError::CapacityQuery(format!("utilization query: {e}"))),
            };
            if busy {
                return Err(RunError::Precondition(
                    "some jobs are already running and using hardware resources; \
                     make sure all jobs finish before starting a run"
                        .into(),
                ));
            }
        }

        let profile = self
            .tools
            .prober
            .probe(&request.input)
            .await
            .map_err(|e| match e {
                TranscodeError::Unsupported(msg) => RunError::Precondition(msg),
                other => RunError::Precondition(format!("cannot read input stream properties: {other}")),
            })?;
        info!(
            codec = %profile.codec,
            width = profile.width,
            height = profile.height,
            duration_secs = profile.duration_secs,
            frame_count = profile.frame_count,
            frame_rate = %profile.frame_rate,
            "video clip parameters"
        );

        let total = self
            .tools
            .devices
            .device_count()
            .await
            .map_err(|e| RunError::Precondition(format!("cannot determine number of devices: {e}")))?;
        let pool = DevicePool::new(total, request.devices)
            .ok_or_else(|| RunError::Precondition("no devices found in the system".into()))?;
        if pool.was_clamped() {
            warn!(
                requested = pool.requested,
                available = pool.total,
                "number of devices requested exceeds the number available"
            );
        }
        info!(available = pool.total, enabled = pool.enabled, "system parameters");

        let estimate = if request.jobs_per_device > 0 {
            None
        } else {
            Some(capacity::estimate(self.tools.oracle.as_ref(), &profile, encode.codec_out, &pool).await?)
        };

        let plan = planner::plan(&profile, &pool, request.jobs_per_device, estimate.as_ref())?;

        Ok(Prepared {
            encode,
            profile,
            pool,
            plan,
        })
    }

    async fn execute(
        &self,
        request: &TranscodeRequest,
        prepared: Prepared,
        workdir: &WorkDir,
        cancel: &CancellationToken,
    ) -> Result<Executed, RunError> {
        let Prepared {
            encode,
            profile,
            pool,
            mut plan,
        } = prepared;

        let segments: Vec<PathBuf> = match plan.target_segment_duration {
            Some(target) => cancellable(
                cancel,
                self.tools.segments.split(&request.input, target, workdir),
            )
            .await?
            .map_err(|e| RunError::SplitFailed(e.to_string()))?,
            None => vec![request.input.clone()],
        };
        info!(
            attempted = plan.planned_segments,
            created = segments.len(),
            "split input clip"
        );

        let layout = plan.reconcile(segments.len())?;

        let options = DispatchOptions {
            timeout: self.config.job_timeout,
            cancel: cancel.clone(),
        };
        let mut progress = ProgressMonitor::new(profile.frame_count);
        let mut outputs = Vec::with_capacity(layout.total());
        let mut waves = 0usize;

        for range in layout.waves() {
            if cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }
            waves += 1;
            let specs = dispatch::job_specs(range, &segments, &pool, workdir, profile.codec, &encode);
            info!(wave = waves, jobs = specs.len(), codec = %encode.codec_out, "transcoding segments in parallel");

            let wave = dispatch::dispatch(specs, self.tools.launcher.clone(), &options);
            let records = monitor::wait(wave, &mut progress, self.config.poll_interval).await;

            if cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }
            reconcile::classify(&records)
                .await
                .into_result(workdir.root())?;
            outputs.extend(records.into_iter().map(|r| (r.spec.index, r.spec.output)));
        }

        if let Some(pct) = progress.finish() {
            info!(percent = pct, "transcoding progress");
        }

        cancellable(
            cancel,
            stitch::stitch(self.tools.segments.as_ref(), outputs, &request.output, workdir),
        )
        .await??;

        Ok(Executed {
            profile,
            pool,
            plan,
            segments: segments.len(),
            waves,
        })
    }
}

struct Executed {
    profile: ClipProfile,
    pool: DevicePool,
    plan: SegmentPlan,
    segments: usize,
    waves: usize,
}

/// Race `fut` against cancellation. Dropping `fut` kills any child it owns.
async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output, RunError> {
    tokio::select! {
        out = fut => Ok(out),
        _ = cancel.cancelled() => Err(RunError::Cancelled),
    }
}
