//! # moviepub core
//!
//! Timing primitives shared by the movie publishing crates: rational
//! presentation timestamps, the cross-stream playback clock, open-loop frame
//! pacing and cooperative cancellation for worker loops.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod clock;
pub mod error;
pub mod pacing;
pub mod time;

// Re-export main types
pub use cancel::CancellationToken;
pub use clock::{PlaybackClock, StreamKind};
pub use error::MoviePubError;
pub use pacing::{
    clamp_sleep, compute_sleep, drift, FrameClock, PacingConfig, PacingDecision, AUDIO_MARGIN,
    DRIFT_TOLERANCE, VIDEO_MARGIN, VIDEO_WARMUP,
};
pub use time::MediaTime;
