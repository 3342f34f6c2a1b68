//! # moviepub media
//!
//! Reads a movie's audio and video tracks, paces them to wall-clock time and
//! feeds them into an RTC session as camera and microphone. Video frames go
//! to a frame sink; file audio is mixed into the live microphone signal inside
//! the record callback of an audio device whose lifecycle, interruptions and
//! route changes this crate manages.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod asset;
pub mod backend;
pub mod capturer;
pub mod control;
pub mod delay;
pub mod device;
pub mod error;
pub mod mixer;
pub mod pacer;
pub mod queue;
pub mod reader;
pub mod session;
pub mod tracks;

// Re-export main types
pub use asset::{MediaAsset, MemoryAsset, OutputSettings, ReaderStatus, TrackOutput};
pub use backend::{
    AudioDirection, AudioIoHandler, AudioUnit, AudioUnitBackend, CpalAudioBackend, DeviceError,
    DrivenAudioBackend, IoHandler, StreamFormat, UnitRequest,
};
pub use capturer::{CaptureSettings, VideoCapturer};
pub use control::{ControlHandle, ControlQueue};
pub use delay::{DelayDirection, DelayEstimator, DelayReading, UnitLatency};
pub use device::{
    AudioBus, AudioDeviceConfig, AudioDeviceManager, AudioDeviceStats, DeviceEvent,
    PlayoutProcessor, RecordProcessor, UnitState, MAX_PLAYOUT_DELAY_MS, RESTART_ATTEMPTS,
};
pub use error::{ErrorCategory, MediaError, MediaResult};
pub use mixer::{mix_samples, AudioMixer, MixOutcome};
pub use pacer::{PacerConfig, PacerWorker, WorkerObserver, WorkerStats};
pub use queue::{FileAudioQueue, DEFAULT_QUEUE_CAPACITY};
pub use reader::{TimedFrame, TrackReader};
pub use session::{
    AudioRoute, AudioSession, CategoryOptions, HostAudioSession, InterruptionType, PortDescription,
    PortOverride, PortType, RouteChangeReason, RouteDescription, SessionCategory, SessionError,
    SessionEvent, SessionMode, SessionParameters,
};
pub use tracks::{
    AudioFrame, FrameSink, MediaFrame, Plane, VideoFrame, VideoOrientation, VideoPixelFormat,
    VideoResolution,
};
