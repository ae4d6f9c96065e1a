use std::collections::BTreeMap;
use std::ops::Range;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use splitstitch_core::{Codec, DevicePool, JobState};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::request::EncodeParams;
use crate::worker::WorkerLauncher;
use crate::workdir::WorkDir;

/// Everything a worker needs to transcode one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    /// Stable ordering key for stitching.
    pub index: usize,
    pub device_id: usize,
    pub input: PathBuf,
    pub output: PathBuf,
    pub log: PathBuf,
    pub codec_in: Codec,
    pub encode: EncodeParams,
}

/// Build job specs for the segment indices in `range`, assigning devices round-robin.
pub fn job_specs(
    range: Range<usize>,
    segments: &[PathBuf],
    pool: &DevicePool,
    workdir: &WorkDir,
    codec_in: Codec,
    encode: &EncodeParams,
) -> Vec<JobSpec> {
    range
        .filter_map(|index| {
            let input = segments.get(index)?.clone();
            Some(JobSpec {
                index,
                device_id: pool.device_for(index),
                input,
                output: workdir.output_path(index, &encode.output_extension),
                log: workdir.log_path(index),
                codec_in,
                encode: encode.clone(),
            })
        })
        .collect()
}

/// Terminal result of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed { exit_code: Option<i32> },
    TimedOut,
    Cancelled,
    SpawnFailed(String),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Messages from job tasks to the wait loop.
#[derive(Debug)]
pub enum JobEvent {
    Started { index: usize, pid: Option<u32> },
    Finished { index: usize, outcome: JobOutcome },
}

/// In-memory view of one dispatched job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub spec: JobSpec,
    pub state: JobState,
    pub pid: Option<u32>,
    pub outcome: Option<JobOutcome>,
}

/// Final record of a job once the wave is over.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub spec: JobSpec,
    pub outcome: JobOutcome,
}

/// Settings shared by every job task of a run.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

/// A batch of jobs dispatched together.
///
/// Dropping a wave aborts its tasks, and with them any child still running.
pub struct Wave {
    jobs: BTreeMap<usize, JobHandle>,
    events: mpsc::UnboundedReceiver<JobEvent>,
    tasks: JoinSet<()>,
}

impl Wave {
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn jobs(&self) -> impl Iterator<Item = &JobHandle> {
        self.jobs.values()
    }

    pub fn any_running(&self) -> bool {
        self.jobs.values().any(|j| !j.state.is_terminal())
    }

    pub(crate) async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }

    pub(crate) fn apply(&mut self, event: JobEvent) {
        match event {
            JobEvent::Started { index, pid } => {
                if let Some(job) = self.jobs.get_mut(&index) {
                    job.state = JobState::Running;
                    job.pid = pid;
                    debug!(index, ?pid, device_id = job.spec.device_id, "job running");
                }
            }
            JobEvent::Finished { index, outcome } => {
                if let Some(job) = self.jobs.get_mut(&index) {
                    job.state = if outcome.is_success() {
                        JobState::Succeeded
                    } else {
                        JobState::Failed
                    };
                    match &outcome {
                        JobOutcome::Succeeded => debug!(index, "job succeeded"),
                        other => warn!(index, outcome = ?other, log = %job.spec.log.display(), "job failed"),
                    }
                    job.outcome = Some(outcome);
                }
            }
        }
    }

    /// Every sender is gone: any job without an outcome lost its task.
    pub(crate) fn abandon_unfinished(&mut self) {
        for job in self.jobs.values_mut().filter(|j| !j.state.is_terminal()) {
            warn!(index = job.spec.index, "job task ended without reporting");
            job.state = JobState::Failed;
            job.outcome = Some(JobOutcome::SpawnFailed("job task ended unexpectedly".into()));
        }
    }

    /// Release task handles and return one record per job, ordered by index.
    pub fn into_records(mut self) -> Vec<JobRecord> {
        self.tasks.detach_all();
        self.jobs
            .into_values()
            .map(|job| JobRecord {
                outcome: job
                    .outcome
                    .unwrap_or(JobOutcome::SpawnFailed("job never finished".into())),
                spec: job.spec,
            })
            .collect()
    }
}

/// Start one worker process per job without waiting for any of them.
///
/// Must be called from within a tokio runtime.
pub fn dispatch(
    specs: Vec<JobSpec>,
    launcher: Arc<dyn WorkerLauncher>,
    options: &DispatchOptions,
) -> Wave {
    let (tx, events) = mpsc::unbounded_channel();
    let mut tasks = JoinSet::new();
    let mut jobs = BTreeMap::new();

    for spec in specs {
        let command = launcher.command(&spec);
        info!(
            index = spec.index,
            device_id = spec.device_id,
            input = %spec.input.display(),
            "dispatching job"
        );
        tasks.spawn(supervise(
            spec.clone(),
            command,
            options.timeout,
            options.cancel.clone(),
            tx.clone(),
        ));
        jobs.insert(
            spec.index,
            JobHandle {
                spec,
                state: JobState::Pending,
                pid: None,
                outcome: None,
            },
        );
    }

    Wave {
        jobs,
        events,
        tasks,
    }
}

async fn supervise(
    spec: JobSpec,
    command: Command,
    timeout: Option<Duration>,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<JobEvent>,
) {
    let index = spec.index;
    let outcome = match run_job(&spec, command, timeout, &cancel, &tx).await {
        Ok(outcome) => outcome,
        Err(e) => JobOutcome::SpawnFailed(e.to_string()),
    };
    let _ = tx.send(JobEvent::Finished { index, outcome });
}

async fn run_job(
    spec: &JobSpec,
    mut command: Command,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
    tx: &mpsc::UnboundedSender<JobEvent>,
) -> std::io::Result<JobOutcome> {
    let log = std::fs::File::create(&spec.log)?;
    let log_err = log.try_clone()?;

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .kill_on_drop(true)
        .spawn()?;

    let _ = tx.send(JobEvent::Started {
        index: spec.index,
        pid: child.id(),
    });

    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        status = child.wait() => {
            let status = status?;
            Ok(if status.success() {
                JobOutcome::Succeeded
            } else {
                JobOutcome::Failed { exit_code: status.code() }
            })
        }
        _ = cancel.cancelled() => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            Ok(JobOutcome::Cancelled)
        }
        _ = deadline => {
            warn!(index = spec.index, ?timeout, "job exceeded timeout, killing worker");
            let _ = child.start_kill();
            let _ = child.wait().await;
            Ok(JobOutcome::TimedOut)
        }
    }
}
