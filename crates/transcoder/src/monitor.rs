//! Progress reporting and the wave wait loop.
//!
//! Progress is the sum of every job's `rendered:` counter over the clip's frame
//! count. It is reported in monotonic 10-point steps.

use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::dispatch::{JobEvent, JobRecord, Wave};

/// Bytes read from the end of a job log per sample.
const TAIL_BYTES: u64 = 4096;
const STEP: u8 = 10;
/// Shortest tick the wait loop will sleep for.
const MIN_TICK: Duration = Duration::from_millis(1);

static RENDERED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"rendered:\s*(\d+)").unwrap());

/// Wait-loop states for one wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveState {
    AnyRunning,
    AllTerminal,
}

/// Aggregates per-job frame counters into a run-wide percentage.
#[derive(Debug, Clone)]
pub struct ProgressMonitor {
    frame_count: u64,
    rendered: BTreeMap<usize, u64>,
    reported: u8,
}

impl ProgressMonitor {
    pub fn new(frame_count: u64) -> Self {
        Self {
            frame_count,
            rendered: BTreeMap::new(),
            reported: 0,
        }
    }

    /// Record a job's latest counter. Counters never move backwards.
    pub fn record(&mut self, index: usize, frames: u64) {
        let entry = self.rendered.entry(index).or_insert(0);
        *entry = (*entry).max(frames);
    }

    pub fn rendered_total(&self) -> u64 {
        self.rendered.values().sum()
    }

    /// Percentage done while jobs are still running, capped at 99.
    pub fn percent(&self) -> u8 {
        if self.frame_count == 0 {
            return 0;
        }
        let pct = self.rendered_total().saturating_mul(100) / self.frame_count;
        pct.min(99) as u8
    }

    /// The new 10-point milestone, if one was crossed since the last report.
    pub fn poll(&mut self) -> Option<u8> {
        let step = self.percent() / STEP * STEP;
        if step > self.reported {
            self.reported = step;
            Some(step)
        } else {
            None
        }
    }

    /// Report completion once.
    pub fn finish(&mut self) -> Option<u8> {
        if self.reported < 100 {
            self.reported = 100;
            Some(100)
        } else {
            None
        }
    }

    pub fn last_reported(&self) -> u8 {
        self.reported
    }

    /// Read the log tail of each listed job and record its counter.
    pub async fn sample<'a>(&mut self, jobs: impl IntoIterator<Item = (usize, &'a Path)>) {
        for (index, log) in jobs {
            match read_tail(log, TAIL_BYTES).await {
                Ok(tail) => {
                    if let Some(frames) = parse_rendered(&tail) {
                        self.record(index, frames);
                    }
                }
                Err(e) => debug!(index, error = %e, "log not readable yet"),
            }
        }
    }
}

/// Last `rendered: N` counter in a chunk of log text.
pub fn parse_rendered(text: &str) -> Option<u64> {
    RENDERED_RE
        .captures_iter(text)
        .last()
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Up to `max_bytes` from the end of a file, lossily decoded.
pub async fn read_tail(path: &Path, max_bytes: u64) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    file.seek(SeekFrom::Start(len.saturating_sub(max_bytes)))
        .await?;
    let mut buf = Vec::with_capacity(max_bytes.min(len) as usize);
    file.read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Drive a wave until every job is terminal, sampling progress on each tick.
///
/// Sleeps between ticks and wakes early on job events; it never busy-spins.
/// There is no overall deadline here: a hung worker keeps the wave open unless
/// a per-job timeout was configured at dispatch.
pub async fn wait(
    mut wave: Wave,
    progress: &mut ProgressMonitor,
    tick: Duration,
) -> Vec<JobRecord> {
    let mut ticker = tokio::time::interval(tick.max(MIN_TICK));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut state = WaveState::AnyRunning;
    while state == WaveState::AnyRunning {
        tokio::select! {
            event = wave.next_event() => match event {
                Some(event) => {
                    if let JobEvent::Finished { index, .. } = &event {
                        if let Some(job) = wave.jobs().find(|j| j.spec.index == *index) {
                            let log = job.spec.log.clone();
                            progress.sample([(*index, log.as_path())]).await;
                        }
                    }
                    wave.apply(event);
                }
                None => wave.abandon_unfinished(),
            },
            _ = ticker.tick() => {
                let running: Vec<_> = wave
                    .jobs()
                    .filter(|j| !j.state.is_terminal())
                    .map(|j| (j.spec.index, j.spec.log.clone()))
                    .collect();
                progress
                    .sample(running.iter().map(|(i, p)| (*i, p.as_path())))
                    .await;
                if let Some(pct) = progress.poll() {
                    info!(percent = pct, "transcoding progress");
                }
            }
        }

        if !wave.any_running() {
            state = WaveState::AllTerminal;
        }
    }

    wave.into_records()
}
