//! Open-loop frame pacing
//!
//! Each frame's wait is recomputed from scratch using only the previous
//! timestamp on the same track:
//!
//! ```text
//! sleep = (current - previous) - decode + drift - margin
//! ```
//!
//! and clamped at zero. There is no integral term, so small per-frame errors
//! can accumulate into audio/video skew over very long sessions.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default margin subtracted from every video wait
pub const VIDEO_MARGIN: Duration = Duration::from_millis(25);
/// Default margin subtracted from every audio wait
pub const AUDIO_MARGIN: Duration = Duration::from_millis(5);
/// Audio/video offset below which no drift correction is applied
pub const DRIFT_TOLERANCE: Duration = Duration::from_millis(20);
/// Delay before the first video frame so the audio clock has a value to compare against
pub const VIDEO_WARMUP: Duration = Duration::from_secs(5);

/// Pacing parameters for one track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Subtracted from every wait so delivery runs slightly ahead
    pub margin: Duration,
    /// Offsets up to this size are treated as in sync
    pub drift_tolerance: Duration,
    /// Whether waits are stretched or shortened by the offset to the audio clock
    pub compensate_drift: bool,
    /// Wait before the first frame of the first pass
    pub warmup: Duration,
}

impl PacingConfig {
    /// Video defaults: 25 ms margin, drift compensation, 5 s warm-up
    pub fn video() -> Self {
        Self {
            margin: VIDEO_MARGIN,
            drift_tolerance: DRIFT_TOLERANCE,
            compensate_drift: true,
            warmup: VIDEO_WARMUP,
        }
    }

    /// Audio defaults: 5 ms margin, no drift compensation, no warm-up
    pub fn audio() -> Self {
        Self {
            margin: AUDIO_MARGIN,
            drift_tolerance: DRIFT_TOLERANCE,
            compensate_drift: false,
            warmup: Duration::ZERO,
        }
    }
}

/// Raw (unclamped) wait in seconds
pub fn compute_sleep(previous: f64, current: f64, decode: f64, drift: f64, margin: f64) -> f64 {
    (current - previous) - decode + drift - margin
}

/// Clamp a raw wait to something a thread can sleep for
pub fn clamp_sleep(seconds: f64) -> Duration {
    if seconds.is_finite() && seconds > 0.0 {
        Duration::from_secs_f64(seconds)
    } else {
        Duration::ZERO
    }
}

/// Signed video-minus-audio offset, zero while within `tolerance` or when
/// the audio clock has not started
pub fn drift(video: f64, audio: Option<f64>, tolerance: f64) -> f64 {
    match audio {
        Some(audio) => {
            let offset = video - audio;
            if offset.abs() <= tolerance {
                0.0
            } else {
                offset
            }
        }
        None => 0.0,
    }
}

/// Result of pacing one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingDecision {
    /// Wait before clamping, in seconds
    pub raw: f64,
    /// Drift term that went into `raw`
    pub drift: f64,
    /// Wait the worker should actually perform
    pub sleep: Duration,
}

impl PacingDecision {
    /// Whether the raw wait was negative and got clamped to zero
    pub fn clamped(&self) -> bool {
        self.raw < 0.0
    }
}

/// Per-track pacing calculator
#[derive(Debug, Clone)]
pub struct FrameClock {
    config: PacingConfig,
}

impl FrameClock {
    /// Create a frame clock with the given parameters
    pub fn new(config: PacingConfig) -> Self {
        Self { config }
    }

    /// Pacing parameters
    pub fn config(&self) -> &PacingConfig {
        &self.config
    }

    /// Decide how long to wait after delivering the frame at `current`.
    ///
    /// `previous` is the prior frame's time on the same track; the first frame
    /// of a pass has none and is paced against itself. `audio` is the audio
    /// clock, consulted only when drift compensation is enabled.
    pub fn pace(
        &self,
        previous: Option<f64>,
        current: f64,
        decode: Duration,
        audio: Option<f64>,
    ) -> PacingDecision {
        let previous = previous.unwrap_or(current);
        let drift = if self.config.compensate_drift {
            drift(current, audio, self.config.drift_tolerance.as_secs_f64())
        } else {
            0.0
        };
        let raw = compute_sleep(
            previous,
            current,
            decode.as_secs_f64(),
            drift,
            self.config.margin.as_secs_f64(),
        );
        PacingDecision {
            raw,
            drift,
            sleep: clamp_sleep(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nominal_sleep() {
        let sleep = compute_sleep(0.0, 1.0, 0.0, 0.0, 0.005);
        assert!((sleep - 0.995).abs() < 1e-9);
    }

    #[test]
    fn test_negative_sleep_is_clamped() {
        let raw = compute_sleep(0.0, 0.033, 0.050, 0.0, 0.005);
        assert!(raw < 0.0);
        assert_eq!(clamp_sleep(raw), Duration::ZERO);
        assert_eq!(clamp_sleep(f64::NAN), Duration::ZERO);
    }

    #[test]
    fn test_drift_tolerance() {
        assert_eq!(drift(1.010, Some(1.0), 0.020), 0.0);
        assert_eq!(drift(0.990, Some(1.0), 0.020), 0.0);
        assert!((drift(1.100, Some(1.0), 0.020) - 0.100).abs() < 1e-9);
        assert!((drift(0.900, Some(1.0), 0.020) + 0.100).abs() < 1e-9);
        assert_eq!(drift(5.0, None, 0.020), 0.0);
    }

    #[test]
    fn test_video_clock_slows_down_when_ahead_of_audio() {
        let clock = FrameClock::new(PacingConfig::video());
        let decision = clock.pace(Some(1.0), 1.040, Duration::ZERO, Some(0.940));
        assert!((decision.drift - 0.100).abs() < 1e-9);
        assert!((decision.raw - (0.040 + 0.100 - 0.025)).abs() < 1e-9);
        assert!(!decision.clamped());
    }

    #[test]
    fn test_audio_clock_ignores_drift() {
        let clock = FrameClock::new(PacingConfig::audio());
        let decision = clock.pace(Some(0.0), 0.02, Duration::ZERO, Some(10.0));
        assert_eq!(decision.drift, 0.0);
        assert!((decision.raw - 0.015).abs() < 1e-9);
    }

    #[test]
    fn test_first_frame_does_not_wait() {
        let clock = FrameClock::new(PacingConfig::audio());
        let decision = clock.pace(None, 12.0, Duration::ZERO, None);
        assert!(decision.clamped());
        assert_eq!(decision.sleep, Duration::ZERO);
    }
}
