//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod input;
pub mod output;
pub mod playback;
pub mod resample;

pub use buffer::{AudioFrame, WindowAssembler};
pub use capture::{CaptureBackend, CapturePipeline, EncodedAudioFrame, FrameSink, MuteFlag};
pub use device::{list_devices, get_device_by_id, AudioDevice, AudioDeviceInfo, DeviceClaim};
pub use input::CpalInput;
pub use output::CpalOutput;
pub use playback::{PlaybackOutput, PlaybackScheduler, PlaybackSegment, PlaybackSink};
