//! Audio delay estimation
//!
//! The estimate is refreshed from inside the audio callback, but only every
//! [`UPDATE_INTERVAL`] invocations, so the session queries stay off the hot
//! path most of the time.

use crate::session::AudioSession;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Callback invocations between two recomputations
pub const UPDATE_INTERVAL: u32 = 100;

/// Bias subtracted from the summed latency, in microseconds
const LATENCY_BIAS_US: u64 = 500;

/// Which side of the session latency applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayDirection {
    /// Recording path, uses the session's input latency
    Capture,
    /// Playout path, uses the session's output latency
    Render,
}

/// Shared delay value in milliseconds, readable from any thread
#[derive(Debug, Default)]
pub struct DelayReading {
    millis: AtomicU32,
}

impl DelayReading {
    /// Reading that starts at 0 ms
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest estimate in milliseconds
    pub fn get(&self) -> u32 {
        self.millis.load(Ordering::Relaxed)
    }

    fn set(&self, millis: u32) {
        self.millis.store(millis, Ordering::Relaxed);
    }
}

/// Latency reported by the audio unit itself, in microseconds
#[derive(Debug, Default)]
pub struct UnitLatency {
    micros: AtomicU64,
}

impl UnitLatency {
    /// Zero until the backend reports a value
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the latency the unit measured, truncated to microseconds
    pub fn set(&self, latency: Duration) {
        self.micros
            .store(latency.as_micros() as u64, Ordering::Relaxed);
    }

    /// Last published unit latency
    pub fn get(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::Relaxed))
    }
}

/// Convert summed latencies to the published millisecond estimate
pub fn latency_to_millis(hardware: Duration, io_buffer: Duration, unit: Duration) -> u32 {
    let micros = hardware.as_micros() as u64 + io_buffer.as_micros() as u64 + unit.as_micros() as u64;
    (micros.saturating_sub(LATENCY_BIAS_US) / 1000) as u32
}

/// Per-callback delay estimator.
///
/// Owned by one callback context; the result is published through a shared
/// [`DelayReading`].
pub struct DelayEstimator {
    direction: DelayDirection,
    session: Arc<dyn AudioSession>,
    unit_latency: Arc<UnitLatency>,
    reading: Arc<DelayReading>,
    counter: u32,
}

impl DelayEstimator {
    /// Estimator for `direction` that publishes into `reading`.
    ///
    /// The first recomputation happens on the hundredth tick, so `reading`
    /// keeps its previous value until then.
    pub fn new(
        direction: DelayDirection,
        session: Arc<dyn AudioSession>,
        unit_latency: Arc<UnitLatency>,
        reading: Arc<DelayReading>,
    ) -> Self {
        Self {
            direction,
            session,
            unit_latency,
            reading,
            counter: 0,
        }
    }

    /// Count one callback and refresh the estimate on every hundredth.
    ///
    /// Returns the new estimate when it was recomputed.
    pub fn tick(&mut self) -> Option<u32> {
        self.counter += 1;
        if self.counter < UPDATE_INTERVAL {
            return None;
        }
        self.counter = 0;

        let hardware = match self.direction {
            DelayDirection::Capture => self.session.input_latency(),
            DelayDirection::Render => self.session.output_latency(),
        };
        let millis = latency_to_millis(
            hardware,
            self.session.io_buffer_duration(),
            self.unit_latency.get(),
        );
        self.reading.set(millis);
        Some(millis)
    }
}

impl std::fmt::Debug for DelayEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayEstimator")
            .field("direction", &self.direction)
            .field("counter", &self.counter)
            .field("reading", &self.reading.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::HostAudioSession;

    #[test]
    fn test_bias_and_truncation() {
        assert_eq!(
            latency_to_millis(
                Duration::from_micros(5_000),
                Duration::from_micros(10_000),
                Duration::from_micros(1_200)
            ),
            15
        );
        assert_eq!(
            latency_to_millis(Duration::from_micros(300), Duration::ZERO, Duration::ZERO),
            0
        );
    }

    #[test]
    fn test_updates_every_hundred_callbacks() {
        let session = Arc::new(HostAudioSession::new());
        session.report_output_latency(Duration::from_millis(20));
        let unit = Arc::new(UnitLatency::new());
        let reading = Arc::new(DelayReading::new());
        let mut estimator =
            DelayEstimator::new(DelayDirection::Render, session.clone(), unit, reading.clone());

        for _ in 0..99 {
            assert_eq!(estimator.tick(), None);
        }
        assert_eq!(reading.get(), 0);
        assert_eq!(estimator.tick(), Some(19));
        assert_eq!(reading.get(), 19);

        session.report_output_latency(Duration::from_millis(40));
        for _ in 0..99 {
            estimator.tick();
        }
        assert_eq!(reading.get(), 19);
        assert_eq!(estimator.tick(), Some(39));
    }

    #[test]
    fn test_capture_uses_input_latency() {
        let session = Arc::new(HostAudioSession::new());
        session.report_input_latency(Duration::from_millis(8));
        session.report_output_latency(Duration::from_millis(90));
        let unit = Arc::new(UnitLatency::new());
        unit.set(Duration::from_millis(2));
        let reading = Arc::new(DelayReading::new());
        let mut estimator =
            DelayEstimator::new(DelayDirection::Capture, session, unit, reading.clone());

        for _ in 0..UPDATE_INTERVAL {
            estimator.tick();
        }
        assert_eq!(reading.get(), 9);
    }
}
