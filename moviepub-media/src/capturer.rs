//! File-backed video capturer
//!
//! Presents the movie's video track to the RTC session as a camera. The
//! session drives it through the usual capture calls; frames go to the
//! [`FrameSink`] the session consumes from.

use crate::asset::MediaAsset;
use crate::pacer::{PacerConfig, PacerWorker, WorkerObserver, WorkerStats};
use crate::tracks::{FrameSink, VideoPixelFormat, VideoResolution};
use moviepub_core::PlaybackClock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Format the capturer reports to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Layout frames are delivered in, always NV12
    pub pixel_format: VideoPixelFormat,
    /// Natural size of the video track, when known
    pub resolution: Option<VideoResolution>,
}

#[derive(Default)]
struct CapturerState {
    initialized: bool,
    worker: Option<PacerWorker>,
    last_stats: Option<WorkerStats>,
}

/// Video capturer reading from a media asset
pub struct VideoCapturer {
    asset: Arc<dyn MediaAsset>,
    sink: Arc<dyn FrameSink>,
    clock: Arc<PlaybackClock>,
    config: PacerConfig,
    observer: Option<WorkerObserver>,
    state: Mutex<CapturerState>,
}

impl VideoCapturer {
    /// Create a capturer. `clock` must be the clock the audio track advances
    /// so video can follow it.
    pub fn new(
        asset: Arc<dyn MediaAsset>,
        sink: Arc<dyn FrameSink>,
        clock: Arc<PlaybackClock>,
        config: PacerConfig,
    ) -> Self {
        Self {
            asset,
            sink,
            clock,
            config,
            observer: None,
            state: Mutex::new(CapturerState::default()),
        }
    }

    /// Be told when the video track cannot be opened
    pub fn with_observer(mut self, observer: WorkerObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Mark the capturer ready. Always succeeds; the track is only opened
    /// on start.
    pub fn init_capture(&self) -> bool {
        self.state.lock().initialized = true;
        true
    }

    /// Stop capturing and forget the initialization
    pub fn release_capture(&self) -> bool {
        self.stop();
        self.state.lock().initialized = false;
        true
    }

    /// Whether `init_capture` ran since the last release
    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Start delivering frames. Starting while started is a no-op.
    pub fn start(&self) -> bool {
        let mut state = self.state.lock();
        if let Some(worker) = &state.worker {
            if !worker.is_finished() {
                return true;
            }
        }
        if let Some(finished) = state.worker.take() {
            Self::collect(&mut state, finished);
        }

        match PacerWorker::spawn_video(
            self.asset.clone(),
            self.sink.clone(),
            self.clock.clone(),
            self.config.clone(),
            self.observer.clone(),
        ) {
            Ok(worker) => {
                info!(worker = %worker.id(), "Video capture started");
                state.worker = Some(worker);
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to start video capture");
                false
            }
        }
    }

    /// Stop delivering frames. Stopping while stopped is a no-op.
    pub fn stop(&self) -> bool {
        let worker = self.state.lock().worker.take();
        if let Some(worker) = worker {
            let id = worker.id();
            worker.cancel();
            let mut state = self.state.lock();
            Self::collect(&mut state, worker);
            debug!(worker = %id, "Video capture stopped");
        }
        true
    }

    /// Whether a worker is running
    pub fn is_capture_started(&self) -> bool {
        self.state
            .lock()
            .worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Frames are always delivered as NV12
    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            pixel_format: VideoPixelFormat::Nv12,
            resolution: self.asset.natural_size(),
        }
    }

    /// Statistics of the most recently finished worker
    pub fn last_stats(&self) -> Option<WorkerStats> {
        self.state.lock().last_stats.clone()
    }

    fn collect(state: &mut CapturerState, worker: PacerWorker) {
        match worker.join() {
            Ok(stats) => state.last_stats = Some(stats),
            Err(e) => debug!(error = %e, "Video worker ended with error"),
        }
    }
}

impl Drop for VideoCapturer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for VideoCapturer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoCapturer")
            .field("started", &self.is_capture_started())
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::MemoryAsset;
    use crate::tracks::VideoFrame;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingSink(AtomicUsize);

    impl FrameSink for CountingSink {
        fn consume_frame(&self, _frame: &VideoFrame) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn capturer(sink: Arc<CountingSink>) -> VideoCapturer {
        let mut config = PacerConfig::default();
        config.video.warmup = Duration::ZERO;
        let asset = Arc::new(MemoryAsset::synthetic(
            VideoResolution::new(32, 18),
            25,
            48000,
            Duration::from_millis(200),
        ));
        VideoCapturer::new(asset, sink, Arc::new(PlaybackClock::new()), config)
    }

    #[test]
    fn test_capture_settings_report_nv12() {
        let capturer = capturer(Arc::new(CountingSink::default()));
        let settings = capturer.capture_settings();
        assert_eq!(settings.pixel_format, VideoPixelFormat::Nv12);
        assert_eq!(settings.resolution, Some(VideoResolution::new(32, 18)));
    }

    #[test]
    fn test_start_stop_idempotent() {
        let sink = Arc::new(CountingSink::default());
        let capturer = capturer(sink.clone());
        assert!(capturer.init_capture());
        assert!(!capturer.is_capture_started());

        assert!(capturer.start());
        assert!(capturer.start());
        assert!(capturer.is_capture_started());

        std::thread::sleep(Duration::from_millis(50));
        assert!(capturer.stop());
        assert!(capturer.stop());
        assert!(!capturer.is_capture_started());
        assert!(sink.0.load(Ordering::SeqCst) > 0);
        assert!(capturer.last_stats().unwrap().frames > 0);
    }

    #[test]
    fn test_release_clears_initialization() {
        let capturer = capturer(Arc::new(CountingSink::default()));
        capturer.init_capture();
        capturer.start();
        assert!(capturer.release_capture());
        assert!(!capturer.is_initialized());
        assert!(!capturer.is_capture_started());
    }
}
