//! Capacity estimation against the hardware resource manager.
//!
//! The resource manager grants job slots for a decode+encode job description.
//! The estimate is always computed fresh for the clip being transcoded.

use std::path::PathBuf;
use std::process::Stdio;

use serde::Serialize;
use splitstitch_core::{ClipProfile, Codec, DevicePool, RunError};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::TranscodeError;

/// Compute units inspected in the utilization report: decoder, scaler, encoder.
const UTILIZATION_UNITS: [u32; 3] = [0, 3, 4];

/// Marker line written once per reserved job slot.
const RESERVATION_MARKER: &str = "XRM_RESERVE_ID";

/// Job description submitted to the resource manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacityRequest {
    pub request: RequestBody,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestBody {
    pub name: String,
    pub request_id: u32,
    pub parameters: RequestParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestParameters {
    pub name: String,
    pub resources: Vec<ResourceSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSpec {
    pub function: String,
    pub format: String,
    pub resolution: Resolution,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub input: ResolutionInput,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionInput {
    pub width: u32,
    pub height: u32,
    #[serde(rename = "frame-rate")]
    pub frame_rate: Rate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rate {
    pub num: u32,
    pub den: u32,
}

impl CapacityRequest {
    /// One decoder in the clip's codec plus one encoder in the output codec.
    pub fn transcode(profile: &ClipProfile, output_codec: Codec) -> Self {
        let input = ResolutionInput {
            width: profile.width,
            height: profile.height,
            frame_rate: Rate {
                num: profile.frame_rate.num,
                den: profile.frame_rate.den,
            },
        };
        let resource = |function: &str, codec: Codec| ResourceSpec {
            function: function.into(),
            format: codec.as_str().into(),
            resolution: Resolution {
                input: input.clone(),
            },
        };
        Self {
            request: RequestBody {
                name: "transcode_job".into(),
                request_id: 1,
                parameters: RequestParameters {
                    name: "transcode_job_params".into(),
                    resources: vec![
                        resource("DECODER", profile.codec),
                        resource("ENCODER", output_codec),
                    ],
                },
            },
        }
    }
}

/// Resource manager queries.
#[async_trait::async_trait]
pub trait CapacityOracle: Send + Sync {
    /// Total job slots grantable for `request` across `devices` devices.
    async fn grantable_slots(
        &self,
        request: &CapacityRequest,
        devices: usize,
    ) -> Result<u32, TranscodeError>;

    /// True when any compute unit already has channels or load allocated.
    async fn resources_in_use(&self) -> Result<bool, TranscodeError>;
}

/// Symmetric per-device job count for one clip profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapacityEstimate {
    pub total_slots: u32,
    pub max_jobs_per_device: u32,
}

/// Ask the oracle for the whole system and spread the grant over every device.
///
/// The query uses `pool.total`, not `pool.enabled`. When fewer devices are
/// enabled the planner multiplies this per-device figure by the enabled count,
/// which leaves the remaining devices' share unused.
pub async fn estimate(
    oracle: &dyn CapacityOracle,
    profile: &ClipProfile,
    output_codec: Codec,
    pool: &DevicePool,
) -> Result<CapacityEstimate, RunError> {
    let request = CapacityRequest::transcode(profile, output_codec);
    let total_slots = oracle
        .grantable_slots(&request, pool.total)
        .await
        .map_err(|e| RunError::CapacityQuery(e.to_string()))?;

    if total_slots == 0 {
        return Err(RunError::CapacityQuery(format!(
            "no job slots available for {}x{} {} -> {}",
            profile.width, profile.height, profile.codec, output_codec
        )));
    }

    let max_jobs_per_device = total_slots / pool.total as u32;
    if max_jobs_per_device == 0 {
        return Err(RunError::CapacityQuery(format!(
            "{total_slots} job slots cannot be spread across {} devices",
            pool.total
        )));
    }

    info!(
        total_slots,
        max_jobs_per_device,
        devices = pool.total,
        "capacity estimate"
    );
    Ok(CapacityEstimate {
        total_slots,
        max_jobs_per_device,
    })
}

/// Oracle backed by the XRM command line tools.
#[derive(Debug, Clone)]
pub struct XrmOracle {
    pub xrmadm_path: PathBuf,
    pub list_cmd: PathBuf,
    pub reservation_tool: PathBuf,
    pub reservation_file: PathBuf,
    /// Directory for the temporary job description file.
    pub scratch_dir: PathBuf,
}

#[async_trait::async_trait]
impl CapacityOracle for XrmOracle {
    async fn grantable_slots(
        &self,
        request: &CapacityRequest,
        devices: usize,
    ) -> Result<u32, TranscodeError> {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let description = self
            .scratch_dir
            .join(format!("job_description_{}.json", uuid::Uuid::new_v4()));
        let body = serde_json::to_vec(request)
            .map_err(|e| TranscodeError::ToolFailed {
                tool: "capacity request".into(),
                message: e.to_string(),
            })?;
        tokio::fs::write(&description, body).await?;
        debug!(path = %description.display(), devices, "submitting job description");

        let result = self.reserve(&description).await;

        if let Err(e) = tokio::fs::remove_file(&description).await {
            warn!(path = %description.display(), error = %e, "failed to remove job description");
        }
        result
    }

    async fn resources_in_use(&self) -> Result<bool, TranscodeError> {
        let output = tokio::process::Command::new(&self.xrmadm_path)
            .arg(&self.list_cmd)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TranscodeError::spawn(&self.xrmadm_path, e))?;

        let raw: serde_json::Value =
            serde_json::from_slice(&output.stdout).map_err(|e| TranscodeError::ToolFailed {
                tool: self.xrmadm_path.display().to_string(),
                message: format!("parse JSON: {e}"),
            })?;
        parse_utilization(&raw)
    }
}

impl XrmOracle {
    /// Hold a reservation session open, end it with a newline, then count the
    /// slots it wrote to the reservation file.
    async fn reserve(&self, description: &std::path::Path) -> Result<u32, TranscodeError> {
        let mut child = tokio::process::Command::new(&self.reservation_tool)
            .arg(description)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TranscodeError::spawn(&self.reservation_tool, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(b"\n").await?;
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(TranscodeError::ToolFailed {
                tool: self.reservation_tool.display().to_string(),
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let reservations = tokio::fs::read_to_string(&self.reservation_file).await?;
        Ok(count_reservations(&reservations))
    }
}

pub fn count_reservations(reservation_script: &str) -> u32 {
    reservation_script
        .lines()
        .filter(|line| line.contains(RESERVATION_MARKER))
        .count() as u32
}

/// Parse the utilization report. Keys in the report carry trailing padding.
pub fn parse_utilization(raw: &serde_json::Value) -> Result<bool, TranscodeError> {
    let bad = |message: String| TranscodeError::ToolFailed {
        tool: "xrmadm".into(),
        message,
    };

    let data = raw
        .get("response")
        .and_then(|r| r.get("data"))
        .ok_or_else(|| bad("missing response.data".into()))?;
    let devices = lookup(data, "deviceNumber")
        .and_then(leading_number)
        .ok_or_else(|| bad("missing deviceNumber".into()))?;

    for id in 0..devices {
        let Some(device) = lookup(data, &format!("device_{id}")) else {
            return Err(bad(format!("missing device_{id}")));
        };
        for unit in UTILIZATION_UNITS {
            let Some(cu) = lookup(device, &format!("cu_{unit}")) else {
                continue;
            };
            let in_use = ["numChanInuse", "usedLoad", "reservedLoad"]
                .iter()
                .filter_map(|key| lookup(cu, key).and_then(leading_number))
                .any(|v| v > 0);
            if in_use {
                let kernel = lookup(cu, "kernelName")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .trim()
                    .to_string();
                debug!(device = id, unit, kernel = %kernel, "compute unit busy");
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn lookup<'a>(obj: &'a serde_json::Value, key: &str) -> Option<&'a serde_json::Value> {
    obj.as_object()?
        .iter()
        .find(|(k, _)| k.trim() == key)
        .map(|(_, v)| v)
}

/// Accepts numbers and strings such as `"250000 of 1000000"`.
fn leading_number(v: &serde_json::Value) -> Option<u64> {
    match v {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.split_whitespace().next()?.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use splitstitch_core::FrameRate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedOracle {
        slots: u32,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl CapacityOracle for FixedOracle {
        async fn grantable_slots(
            &self,
            _request: &CapacityRequest,
            _devices: usize,
        ) -> Result<u32, TranscodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.slots)
        }

        async fn resources_in_use(&self) -> Result<bool, TranscodeError> {
            Ok(false)
        }
    }

    fn profile() -> ClipProfile {
        ClipProfile::new(1920, 1080, 60.0, FrameRate::new(60, 1).unwrap(), Codec::H264)
    }

    #[test]
    fn request_serializes_to_job_description() {
        let req = CapacityRequest::transcode(&profile(), Codec::Hevc);
        let json = serde_json::to_value(&req).unwrap();
        let resources = &json["request"]["parameters"]["resources"];
        assert_eq!(resources[0]["function"], "DECODER");
        assert_eq!(resources[0]["format"], "h264");
        assert_eq!(resources[1]["function"], "ENCODER");
        assert_eq!(resources[1]["format"], "hevc");
        assert_eq!(resources[1]["resolution"]["input"]["width"], 1920);
        assert_eq!(resources[1]["resolution"]["input"]["frame-rate"]["num"], 60);
        assert_eq!(resources[1]["resolution"]["input"]["frame-rate"]["den"], 1);
    }

    #[tokio::test]
    async fn estimate_divides_over_total_devices() {
        let oracle = FixedOracle {
            slots: 7,
            calls: AtomicUsize::new(0),
        };
        // Two of three devices enabled: the grant is still spread over three.
        let pool = DevicePool::new(3, 2).unwrap();
        let est = estimate(&oracle, &profile(), Codec::Hevc, &pool).await.unwrap();
        assert_eq!(est.total_slots, 7);
        assert_eq!(est.max_jobs_per_device, 2);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_slots_is_a_capacity_error() {
        let oracle = FixedOracle {
            slots: 0,
            calls: AtomicUsize::new(0),
        };
        let pool = DevicePool::new(1, 0).unwrap();
        let err = estimate(&oracle, &profile(), Codec::Hevc, &pool)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::CapacityQuery(_)));

        let oracle = FixedOracle {
            slots: 1,
            calls: AtomicUsize::new(0),
        };
        let pool = DevicePool::new(2, 0).unwrap();
        let err = estimate(&oracle, &profile(), Codec::Hevc, &pool)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::CapacityQuery(_)));
    }

    #[test]
    fn counts_reservation_markers() {
        let script = "\
#!/bin/bash
export XRM_RESERVE_ID_1=11
export XRM_RESERVE_ID_2=12
export XRM_RESERVE_ID_3=13
";
        assert_eq!(count_reservations(script), 3);
        assert_eq!(count_reservations(""), 0);
    }

    #[test]
    fn idle_report_is_not_in_use() {
        let report = serde_json::json!({
            "response": {
                "name": "list",
                "data": {
                    "deviceNumber": "1",
                    "device_0": {
                        "cu_0": {
                            "kernelName   ": "decoder",
                            "numChanInuse ": "0",
                            "usedLoad     ": "0 of 1000000",
                            "reservedLoad ": "0 of 1000000"
                        },
                        "cu_3": {
                            "kernelName   ": "scaler",
                            "numChanInuse ": "0",
                            "usedLoad     ": "0 of 1000000",
                            "reservedLoad ": "0 of 1000000"
                        },
                        "cu_4": {
                            "kernelName   ": "encoder",
                            "numChanInuse ": 0,
                            "usedLoad     ": "0 of 1000000",
                            "reservedLoad ": "0 of 1000000"
                        }
                    }
                }
            }
        });
        assert!(!parse_utilization(&report).unwrap());
    }

    #[test]
    fn reserved_load_counts_as_in_use() {
        let report = serde_json::json!({
            "response": {
                "data": {
                    "deviceNumber": 2,
                    "device_0": {
                        "cu_0": { "numChanInuse ": "0", "usedLoad     ": "0 of 1000000", "reservedLoad ": "0 of 1000000" }
                    },
                    "device_1": {
                        "cu_4": {
                            "kernelName   ": "encoder",
                            "numChanInuse ": "0",
                            "usedLoad     ": "0 of 1000000",
                            "reservedLoad ": "250000 of 1000000"
                        }
                    }
                }
            }
        });
        assert!(parse_utilization(&report).unwrap());
    }

    #[test]
    fn malformed_report_is_an_error() {
        let report = serde_json::json!({ "response": {} });
        assert!(parse_utilization(&report).is_err());
    }
}
