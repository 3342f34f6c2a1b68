//! # moviepub - publish a movie file as camera and microphone
//!
//! moviepub reads the video and audio tracks of a movie and feeds them into a
//! real-time communication session as if they came from a camera and a
//! microphone. Frames are released at playback speed; file audio is mixed
//! into the live microphone signal inside the record callback.
//!
//! ## Key Features
//!
//! - **Open-loop pacing**: each frame waits for its own timestamp gap, minus
//!   decode time and a small margin, with video following the audio clock
//! - **Real-time safe mixing**: the record callback never blocks
//! - **Audio unit lifecycle**: interruptions, route changes and teardown are
//!   handled on a serialized control queue
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use moviepub::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Discard;
//!
//! impl AudioBus for Discard {
//!     fn write_capture_data(&self, _samples: &[i16]) {}
//!     fn read_render_data(&self, _out: &mut [i16]) -> usize {
//!         0
//!     }
//! }
//!
//! impl FrameSink for Discard {
//!     fn consume_frame(&self, _frame: &VideoFrame) {}
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), MoviePubError> {
//!     let config = PublisherConfig::default();
//!     init_logging(&config.log_filter)?;
//!
//!     let asset = Arc::new(MemoryAsset::synthetic(
//!         VideoResolution::new(640, 360),
//!         25,
//!         48000,
//!         Duration::from_secs(10),
//!     ));
//!     let session = Arc::new(HostAudioSession::new());
//!     let backend = Arc::new(CpalAudioBackend::new().with_session(session.clone()));
//!     let sink = Arc::new(Discard);
//!
//!     let publisher = MoviePublisher::new(asset, sink.clone(), sink, backend, session, config)?;
//!     let mut events = publisher.subscribe();
//!     publisher.start()?;
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("{}: {:?}", event.timestamp, event.event);
//!     }
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use moviepub_core::{
    CancellationToken, FrameClock, MediaTime, MoviePubError, PacingConfig, PacingDecision,
    PlaybackClock, StreamKind,
};

pub use moviepub_media::{
    AudioBus, AudioDeviceConfig, AudioDeviceManager, AudioDeviceStats, AudioDirection,
    AudioFrame, AudioRoute, AudioSession, AudioUnitBackend, CaptureSettings, CpalAudioBackend,
    DeviceEvent, DrivenAudioBackend, FrameSink, HostAudioSession, InterruptionType, MediaAsset,
    MediaError, MemoryAsset, RouteChangeReason, RouteDescription, SessionCategory, SessionEvent,
    SessionParameters, StreamFormat, VideoCapturer, VideoFrame, VideoPixelFormat,
    VideoResolution,
};

// Public API modules
pub mod config;
pub mod event;
pub mod logging;
mod monitor;
pub mod publisher;

// Re-export main API types
pub use config::PublisherConfig;
pub use event::{Event, EventPublisher, PublisherEvent, EVENT_CHANNEL_CAPACITY};
pub use logging::init_logging;
pub use publisher::MoviePublisher;
