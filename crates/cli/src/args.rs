use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use splitstitch_core::Codec;
use splitstitch_transcoder::request::TranscodeRequest;

/// Split a clip, transcode the pieces in parallel across devices, stitch the result.
#[derive(Debug, Parser)]
#[command(name = "splitstitch", version)]
pub struct Args {
    /// Input clip (.mp4, .mov or .mkv)
    #[arg(short = 's', long = "sourcefile")]
    pub source: PathBuf,

    /// Output clip; must end in .mp4
    #[arg(short = 'd', long = "destinationfile", default_value = "out.mp4")]
    pub destination: PathBuf,

    /// Output codec: h264 or hevc
    #[arg(short = 'c', long = "codec", default_value = "hevc")]
    pub codec: Codec,

    /// Output bitrate in Mbps (1.0 to 25.0)
    #[arg(short = 'b', long = "bitrate", default_value_t = 5.0)]
    pub bitrate: f64,

    /// Jobs per device; 0 asks the resource manager
    #[arg(short = 'j', long = "numjobs", default_value_t = 0, allow_negative_numbers = true)]
    pub jobs_per_device: i32,

    /// Devices to use; 0 uses all of them
    #[arg(short = 'n', long = "numdevices", default_value_t = 0, allow_negative_numbers = true)]
    pub devices: i32,

    /// Extra encoder properties; quote a value that contains spaces
    #[arg(short = 'x', long = "extra", default_value = "")]
    pub extra: String,

    /// Parent directory for per-run temporary files
    #[arg(long = "work-dir")]
    pub work_dir: Option<PathBuf>,

    /// Kill the run if a single job runs longer than this; 0 disables it
    #[arg(long = "job-timeout-secs")]
    pub job_timeout_secs: Option<u64>,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

impl Args {
    pub fn request(&self) -> TranscodeRequest {
        TranscodeRequest {
            input: self.source.clone(),
            output: self.destination.clone(),
            codec: self.codec,
            bitrate_mbps: self.bitrate,
            jobs_per_device: self.jobs_per_device,
            devices: self.devices,
            extra_options: self.extra.clone(),
        }
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_classic_tool() {
        let args = Args::try_parse_from(["splitstitch", "-s", "in.mp4"]).unwrap();
        assert_eq!(args.destination, PathBuf::from("out.mp4"));
        assert_eq!(args.codec, Codec::Hevc);
        assert_eq!(args.bitrate, 5.0);
        assert_eq!(args.jobs_per_device, 0);
        assert_eq!(args.devices, 0);
        assert!(args.extra.is_empty());
        assert!(!args.json);
        assert_eq!(args.job_timeout(), None);
    }

    #[test]
    fn flags_build_the_request() {
        let args = Args::try_parse_from([
            "splitstitch",
            "--sourcefile",
            "clip.mkv",
            "-d",
            "final.mp4",
            "-c",
            "h264",
            "-b",
            "8.5",
            "-j",
            "3",
            "-n",
            "-1",
            "-x",
            "gop-length=60",
            "--job-timeout-secs",
            "600",
            "--json",
        ])
        .unwrap();
        let req = args.request();
        assert_eq!(req.input, PathBuf::from("clip.mkv"));
        assert_eq!(req.output, PathBuf::from("final.mp4"));
        assert_eq!(req.codec, Codec::H264);
        assert_eq!(req.bitrate_mbps, 8.5);
        assert_eq!(req.jobs_per_device, 3);
        assert_eq!(req.devices, -1);
        assert_eq!(req.extra_options, "gop-length=60");
        assert_eq!(args.job_timeout(), Some(Duration::from_secs(600)));
        assert!(args.json);
    }

    #[test]
    fn zero_job_timeout_means_none() {
        let args =
            Args::try_parse_from(["splitstitch", "-s", "a.mp4", "--job-timeout-secs", "0"]).unwrap();
        assert_eq!(args.job_timeout(), None);
    }

    #[test]
    fn source_is_required() {
        assert!(Args::try_parse_from(["splitstitch"]).is_err());
    }

    #[test]
    fn unknown_codec_is_rejected() {
        assert!(Args::try_parse_from(["splitstitch", "-s", "a.mp4", "-c", "vp9"]).is_err());
    }
}
