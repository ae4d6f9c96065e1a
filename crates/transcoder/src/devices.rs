//! Hardware device enumeration.
//!
//! Counts accelerator cards by running `xbutil examine` and matching the card's
//! platform name in its output.

use std::path::PathBuf;

use tracing::info;

use crate::TranscodeError;

/// Reports how many usable accelerator devices are installed.
#[async_trait::async_trait]
pub trait DeviceEnumerator: Send + Sync {
    async fn device_count(&self) -> Result<usize, TranscodeError>;
}

/// Enumerator backed by the card management utility.
#[derive(Debug, Clone)]
pub struct XbutilEnumerator {
    pub xbutil_path: PathBuf,
    pub pattern: String,
}

impl XbutilEnumerator {
    pub fn new(xbutil_path: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            xbutil_path: xbutil_path.into(),
            pattern: pattern.into(),
        }
    }
}

#[async_trait::async_trait]
impl DeviceEnumerator for XbutilEnumerator {
    async fn device_count(&self) -> Result<usize, TranscodeError> {
        let output = tokio::process::Command::new(&self.xbutil_path)
            .arg("examine")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TranscodeError::spawn(&self.xbutil_path, e))?;

        if !output.status.success() {
            return Err(TranscodeError::ToolFailed {
                tool: self.xbutil_path.display().to_string(),
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let count = count_devices(&String::from_utf8_lossy(&output.stdout), &self.pattern);
        info!(count, pattern = %self.pattern, "device enumeration complete");
        Ok(count)
    }
}

/// Number of output lines naming a device of the given platform.
pub fn count_devices(examine_output: &str, pattern: &str) -> usize {
    examine_output
        .lines()
        .filter(|line| line.contains(pattern))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_matching_lines() {
        let output = "\
System Configuration
  OS Name              : Linux
Devices present
BDF             :  Shell                          Platform UUID  Device ID       Device Ready*
  [0000:21:00.1] : xilinx_u30_gen3x4_base_2        0x12345        user(inst=132)  Yes
  [0000:22:00.1] : xilinx_u30_gen3x4_base_2        0x12345        user(inst=133)  Yes
";
        assert_eq!(count_devices(output, "xilinx_u30"), 2);
        assert_eq!(count_devices(output, "xilinx_u50"), 0);
        assert_eq!(count_devices("", "xilinx_u30"), 0);
    }
}
