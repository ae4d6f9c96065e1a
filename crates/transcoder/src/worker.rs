//! Transcode worker invocation.
//!
//! Each job is one `gst-launch-1.0` process decoding and re-encoding a single
//! segment on one device. `fpsdisplaysink` in verbose mode prints a
//! `rendered: N` counter that the progress monitor reads back from the log.

use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::dispatch::JobSpec;

/// Builds the child process for one job. Output redirection is set by the dispatcher.
pub trait WorkerLauncher: Send + Sync {
    fn command(&self, job: &JobSpec) -> Command;
}

/// Hardware decode/encode pipeline run through `gst-launch-1.0`.
#[derive(Debug, Clone)]
pub struct GstWorker {
    pub gst_launch_path: PathBuf,
    pub xclbin_path: PathBuf,
}

impl GstWorker {
    pub fn new(gst_launch_path: impl Into<PathBuf>, xclbin_path: impl Into<PathBuf>) -> Self {
        Self {
            gst_launch_path: gst_launch_path.into(),
            xclbin_path: xclbin_path.into(),
        }
    }

    pub fn pipeline_args(&self, job: &JobSpec) -> Vec<String> {
        let xclbin = format!("xclbin-location={}", self.xclbin_path.display());
        let dev = format!("dev-idx={}", job.device_id);
        let bitrate = job.encode.bitrate_kbps;

        let mut args: Vec<String> = vec![
            "-v".into(),
            "filesrc".into(),
            format!("location={}", job.input.display()),
            "!".into(),
            demuxer_for(&job.input).into(),
            "!".into(),
            job.codec_in.parser_element().into(),
            "!".into(),
            "vvas_xvcudec".into(),
            xclbin.clone(),
            dev.clone(),
            "!".into(),
            "queue".into(),
            "!".into(),
            "vvas_xvcuenc".into(),
            xclbin,
            dev,
            format!("target-bitrate={bitrate}"),
            format!("max-bitrate={bitrate}"),
        ];

        // Extra encoder properties come last so they override the bitrate.
        args.extend(split_options(&job.encode.extra_options));

        args.extend([
            "!".into(),
            job.encode.codec_out.parser_element().into(),
            "!".into(),
            "qtmux".into(),
            "!".into(),
            "fpsdisplaysink".into(),
            format!("video-sink=filesink location={}", job.output.display()),
            "text-overlay=false".into(),
            "sync=false".into(),
        ]);
        args
    }
}

impl WorkerLauncher for GstWorker {
    fn command(&self, job: &JobSpec) -> Command {
        let mut cmd = Command::new(&self.gst_launch_path);
        cmd.args(self.pipeline_args(job));
        cmd
    }
}

/// Split encoder options on whitespace, keeping quoted runs together.
///
/// `key="a b"` and `key='a b'` become the single argument `key=a b`. There is
/// no escape character and an unterminated quote runs to the end of the string.
pub fn split_options(options: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for c in options.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        args.push(current);
    }
    args
}

/// Matroska for split segments, QuickTime for unsplit `.mp4`/`.mov` sources.
pub fn demuxer_for(input: &Path) -> &'static str {
    match input.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("mkv") => "matroskademux",
        _ => "qtdemux",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::EncodeParams;
    use splitstitch_core::Codec;

    fn job(input: &str, extra: &str) -> JobSpec {
        JobSpec {
            index: 5,
            device_id: 1,
            input: PathBuf::from(input),
            output: PathBuf::from("/w/out0005.mp4"),
            log: PathBuf::from("/w/job0005.log"),
            codec_in: Codec::H264,
            encode: EncodeParams {
                codec_out: Codec::Hevc,
                bitrate_kbps: 5000,
                extra_options: extra.into(),
                output_extension: "mp4".into(),
            },
        }
    }

    #[test]
    fn pipeline_targets_assigned_device() {
        let worker = GstWorker::new("gst-launch-1.0", "/opt/x.xclbin");
        let args = worker.pipeline_args(&job("/w/seg0005.mkv", ""));
        assert_eq!(args.iter().filter(|a| *a == "dev-idx=1").count(), 2);
        assert!(args.contains(&"matroskademux".to_string()));
        assert!(args.contains(&"h264parse".to_string()));
        assert!(args.contains(&"h265parse".to_string()));
        assert!(args.contains(&"target-bitrate=5000".to_string()));
        assert!(args.contains(&"max-bitrate=5000".to_string()));
        assert!(args.contains(&"video-sink=filesink location=/w/out0005.mp4".to_string()));
    }

    #[test]
    fn extra_options_follow_bitrate() {
        let worker = GstWorker::new("gst-launch-1.0", "/opt/x.xclbin");
        let args = worker.pipeline_args(&job("/in/clip.mp4", "b-frames=1 target-bitrate=2000"));
        let base = args.iter().position(|a| a == "target-bitrate=5000").unwrap();
        let over = args.iter().position(|a| a == "target-bitrate=2000").unwrap();
        assert!(over > base);
        assert!(args.contains(&"b-frames=1".to_string()));
        assert!(args.contains(&"qtdemux".to_string()));
    }

    #[test]
    fn quoted_option_values_stay_whole() {
        assert_eq!(
            split_options(r#"  b-frames=1   tune-metrics="psnr ssim" name='x y' "#),
            vec!["b-frames=1", "tune-metrics=psnr ssim", "name=x y"]
        );
        assert_eq!(split_options(r#"empty="""#), vec!["empty="]);
        assert!(split_options("   ").is_empty());

        let worker = GstWorker::new("gst-launch-1.0", "/opt/x.xclbin");
        let args = worker.pipeline_args(&job("/in/clip.mp4", r#"tune-metrics="psnr ssim""#));
        assert!(args.contains(&"tune-metrics=psnr ssim".to_string()));
    }

    #[test]
    fn demuxer_follows_extension() {
        assert_eq!(demuxer_for(Path::new("a.mkv")), "matroskademux");
        assert_eq!(demuxer_for(Path::new("a.MKV")), "matroskademux");
        assert_eq!(demuxer_for(Path::new("a.mp4")), "qtdemux");
        assert_eq!(demuxer_for(Path::new("a.MOV")), "qtdemux");
    }
}
