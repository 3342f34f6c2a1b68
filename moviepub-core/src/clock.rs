//! Shared playback clock
//!
//! Records the last presentation time emitted on each stream. The audio
//! reader advances the audio side, the video reader advances the video side
//! and reads the audio side to measure drift. Both sides are plain atomics so
//! readers on any thread never wait.

use crate::time::MediaTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sentinel bit pattern for "nothing emitted yet" (a NaN no finite time produces)
const UNSET: u64 = u64::MAX;

/// The two elementary streams of a movie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Audio => write!(f, "audio"),
            StreamKind::Video => write!(f, "video"),
        }
    }
}

/// Last-emitted presentation time per stream, in seconds
#[derive(Debug)]
pub struct PlaybackClock {
    audio: AtomicU64,
    video: AtomicU64,
}

impl PlaybackClock {
    /// Create a clock with nothing emitted on either stream
    pub fn new() -> Self {
        Self {
            audio: AtomicU64::new(UNSET),
            video: AtomicU64::new(UNSET),
        }
    }

    fn slot(&self, stream: StreamKind) -> &AtomicU64 {
        match stream {
            StreamKind::Audio => &self.audio,
            StreamKind::Video => &self.video,
        }
    }

    /// Record `time` for `stream` and return the previously emitted time.
    ///
    /// The stored value never decreases: a sample whose timestamp is earlier
    /// than the last one leaves the clock where it was. Invalid times are
    /// ignored.
    pub fn advance(&self, stream: StreamKind, time: MediaTime) -> Option<f64> {
        let slot = self.slot(stream);
        let Some(seconds) = time.seconds() else {
            return decode(slot.load(Ordering::Acquire));
        };

        let mut current = slot.load(Ordering::Acquire);
        loop {
            let previous = decode(current);
            let next = match previous {
                Some(prev) if prev >= seconds => return previous,
                _ => seconds.to_bits(),
            };
            match slot.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return previous,
                Err(actual) => current = actual,
            }
        }
    }

    /// Last emitted time for `stream` in seconds
    pub fn last(&self, stream: StreamKind) -> Option<f64> {
        decode(self.slot(stream).load(Ordering::Acquire))
    }

    /// Forget the last emitted time for `stream`, used when a track restarts
    pub fn reset(&self, stream: StreamKind) {
        self.slot(stream).store(UNSET, Ordering::Release);
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

fn decode(bits: u64) -> Option<f64> {
    if bits == UNSET {
        None
    } else {
        Some(f64::from_bits(bits))
    }
}
