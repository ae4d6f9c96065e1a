use std::ops::Range;
use std::time::Duration;

use serde::Serialize;
use splitstitch_core::{ClipProfile, DevicePool, RunError};
use tracing::{info, warn};

use crate::capacity::CapacityEstimate;

/// Where the jobs-per-device figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobCountSource {
    Requested,
    Estimated,
}

/// How the clip is cut and spread over the enabled devices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentPlan {
    pub jobs_per_device: u32,
    pub source: JobCountSource,
    pub planned_segments: usize,
    /// Whole-second cut length handed to the splitter. `None` means the clip is
    /// transcoded as a single job without splitting.
    pub target_segment_duration: Option<Duration>,
}

impl SegmentPlan {
    pub fn splits(&self) -> bool {
        self.target_segment_duration.is_some()
    }

    /// Absorb the difference between planned and produced segment counts.
    ///
    /// Fewer segments shrink the plan. Surplus segments become a second wave
    /// whose indices continue after the first.
    pub fn reconcile(&mut self, actual_segments: usize) -> Result<WaveLayout, RunError> {
        if actual_segments == 0 {
            return Err(RunError::SplitFailed("splitter produced no segments".into()));
        }

        if actual_segments < self.planned_segments {
            warn!(
                planned = self.planned_segments,
                actual = actual_segments,
                "input clip is too short and does not contain enough GOPs to be split in more segments"
            );
            self.planned_segments = actual_segments;
        } else if actual_segments > self.planned_segments {
            warn!(
                planned = self.planned_segments,
                actual = actual_segments,
                extra = actual_segments - self.planned_segments,
                "splitter created more segments than planned; surplus runs as a second wave"
            );
        }

        Ok(WaveLayout {
            first: 0..self.planned_segments,
            second: self.planned_segments..actual_segments,
        })
    }
}

/// Job index ranges for the first wave and the overrun wave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveLayout {
    pub first: Range<usize>,
    pub second: Range<usize>,
}

impl WaveLayout {
    pub fn waves(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        [self.first.clone(), self.second.clone()]
            .into_iter()
            .filter(|r| !r.is_empty())
    }

    pub fn total(&self) -> usize {
        self.second.end.max(self.first.end)
    }
}

/// Turn the job-count override (or the capacity estimate) into a segment plan.
///
/// A positive `requested_jobs_per_device` is used verbatim; the estimate is only
/// consulted otherwise.
pub fn plan(
    profile: &ClipProfile,
    pool: &DevicePool,
    requested_jobs_per_device: i32,
    estimate: Option<&CapacityEstimate>,
) -> Result<SegmentPlan, RunError> {
    let (jobs_per_device, source) = if requested_jobs_per_device > 0 {
        (requested_jobs_per_device as u32, JobCountSource::Requested)
    } else {
        let est = estimate.ok_or_else(|| {
            RunError::CapacityQuery("no capacity estimate and no job count override".into())
        })?;
        (est.max_jobs_per_device, JobCountSource::Estimated)
    };

    let mut planned_segments = (jobs_per_device as usize * pool.enabled).max(1);

    // Every segment must get at least one whole second of material.
    let whole_secs = profile.duration_secs.floor().max(0.0) as usize;
    if planned_segments > 1 && whole_secs < planned_segments {
        let clamped = whole_secs.max(1);
        warn!(
            requested = planned_segments,
            clamped,
            duration_secs = profile.duration_secs,
            "clip lacks enough material to reach the requested parallelism"
        );
        planned_segments = clamped;
    }

    let target_segment_duration = (planned_segments > 1).then(|| {
        Duration::from_secs((profile.duration_secs / planned_segments as f64).floor() as u64)
    });

    info!(
        jobs_per_device,
        ?source,
        enabled_devices = pool.enabled,
        planned_segments,
        target_secs = target_segment_duration.map(|d| d.as_secs()),
        "segment plan"
    );

    Ok(SegmentPlan {
        jobs_per_device,
        source,
        planned_segments,
        target_segment_duration,
    })
}
