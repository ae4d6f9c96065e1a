pub mod error;
pub mod types;

pub use error::RunError;
pub use types::{ClipProfile, Codec, DevicePool, FrameRate, JobState, RunState};
