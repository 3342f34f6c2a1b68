//! Playback pacing workers
//!
//! One worker thread per active track reads decoded frames and releases them
//! at playback speed. The video worker hands frames to a [`FrameSink`]; the
//! audio worker feeds the file-audio queue that the record callback mixes
//! from. Both are open-loop: each frame's wait is computed from its own
//! timestamps, the time spent producing it and, for video, the drift against
//! the audio clock.

use crate::asset::MediaAsset;
use crate::error::{MediaError, MediaResult};
use crate::queue::FileAudioQueue;
use crate::reader::{TimedFrame, TrackReader};
use crate::tracks::{FrameSink, MediaFrame};
use moviepub_core::{CancellationToken, FrameClock, PacingConfig, PacingDecision, PlaybackClock, StreamKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Pacing parameters for both tracks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacerConfig {
    /// Pacing of the video worker
    pub video: PacingConfig,
    /// Pacing of the file-audio feed
    pub audio: PacingConfig,
    /// Start the track again when it ends
    pub looping: bool,
    /// Sample rate the audio track is decoded to
    pub sample_rate: u32,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            video: PacingConfig::video(),
            audio: PacingConfig::audio(),
            looping: true,
            sample_rate: 48000,
        }
    }
}

/// Counters reported when a worker exits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Frames delivered to the sink or the queue
    pub frames: u64,
    /// Total time spent sleeping between frames
    pub slept: Duration,
    /// Passes over the track, counting the current one
    pub passes: u32,
    /// Frames whose computed wait was negative
    pub clamped: u64,
}

impl WorkerStats {
    fn record(&mut self, decision: &PacingDecision) {
        self.frames += 1;
        self.slept += decision.sleep;
        if decision.clamped() {
            self.clamped += 1;
        }
    }
}

/// Callback notified when a worker fails to open its track
pub type WorkerObserver = Arc<dyn Fn(StreamKind, &MediaError) + Send + Sync>;

/// Where decoded frames of one track go
enum Delivery {
    Video(Arc<dyn FrameSink>),
    Audio(Arc<FileAudioQueue>),
}

impl Delivery {
    fn kind(&self) -> StreamKind {
        match self {
            Delivery::Video(_) => StreamKind::Video,
            Delivery::Audio(_) => StreamKind::Audio,
        }
    }

    /// Hand off one frame. Returns `false` if cancelled while waiting for room.
    fn deliver(&self, frame: &MediaFrame, token: &CancellationToken) -> bool {
        match (self, frame) {
            (Delivery::Video(sink), MediaFrame::Video(video)) => {
                sink.consume_frame(video);
                true
            }
            (Delivery::Audio(queue), MediaFrame::Audio(audio)) => {
                queue.push_blocking(&audio.samples, token)
            }
            _ => true,
        }
    }
}

struct PacingLoop {
    kind: StreamKind,
    asset: Arc<dyn MediaAsset>,
    delivery: Delivery,
    clock: Arc<PlaybackClock>,
    frame_clock: FrameClock,
    config: PacerConfig,
    token: CancellationToken,
    observer: Option<WorkerObserver>,
}

impl PacingLoop {
    fn open(&self) -> MediaResult<TrackReader> {
        match self.kind {
            StreamKind::Video => TrackReader::video(self.asset.as_ref(), self.clock.clone()),
            StreamKind::Audio => {
                TrackReader::audio(self.asset.as_ref(), self.config.sample_rate, self.clock.clone())
            }
        }
    }

    fn run(self) -> MediaResult<WorkerStats> {
        let mut stats = WorkerStats::default();
        let warmup = self.frame_clock.config().warmup;
        if !warmup.is_zero() {
            debug!(kind = %self.kind, ?warmup, "Waiting before first frame");
            if self.token.sleep(warmup) {
                return Ok(stats);
            }
        }

        while !self.token.is_cancelled() {
            self.clock.reset(self.kind);
            let mut reader = match self.open() {
                Ok(reader) => reader,
                Err(e) => {
                    error!(kind = %self.kind, error = %e, "Failed to open track");
                    if let Some(observer) = &self.observer {
                        observer(self.kind, &e);
                    }
                    return Err(e);
                }
            };
            stats.passes += 1;
            debug!(kind = %self.kind, pass = stats.passes, "Starting track pass");

            let delivered_before = stats.frames;
            if !self.play_pass(&mut reader, &mut stats) {
                break;
            }

            if stats.frames == delivered_before {
                warn!(kind = %self.kind, "Track produced no frames, not looping");
                break;
            }
            if !self.config.looping {
                break;
            }
        }

        info!(
            kind = %self.kind,
            frames = stats.frames,
            passes = stats.passes,
            clamped = stats.clamped,
            "Pacing worker finished"
        );
        Ok(stats)
    }

    /// Play one pass. Returns `false` when cancelled.
    fn play_pass(&self, reader: &mut TrackReader, stats: &mut WorkerStats) -> bool {
        loop {
            if self.token.is_cancelled() {
                return false;
            }

            let started = Instant::now();
            let Some(TimedFrame {
                frame,
                previous,
                current,
            }) = reader.next()
            else {
                return true;
            };
            if !self.delivery.deliver(&frame, &self.token) {
                return false;
            }
            let decode = started.elapsed();

            let audio = match self.kind {
                StreamKind::Video => self.clock.last(StreamKind::Audio),
                StreamKind::Audio => None,
            };
            let decision = self.frame_clock.pace(previous, current, decode, audio);
            stats.record(&decision);
            trace!(
                kind = %self.kind,
                current,
                drift = decision.drift,
                sleep_ms = decision.sleep.as_secs_f64() * 1000.0,
                "Paced frame"
            );

            if self.token.sleep(decision.sleep) {
                return false;
            }
        }
    }
}

/// Handle to a running pacing worker.
///
/// Dropping the handle cancels the worker and waits for it to exit.
pub struct PacerWorker {
    id: Uuid,
    kind: StreamKind,
    token: CancellationToken,
    thread: Option<JoinHandle<MediaResult<WorkerStats>>>,
}

impl PacerWorker {
    /// Start pacing the video track into `sink`
    pub fn spawn_video(
        asset: Arc<dyn MediaAsset>,
        sink: Arc<dyn FrameSink>,
        clock: Arc<PlaybackClock>,
        config: PacerConfig,
        observer: Option<WorkerObserver>,
    ) -> MediaResult<Self> {
        Self::spawn(asset, Delivery::Video(sink), clock, config, observer)
    }

    /// Start pacing the audio track into `queue`
    pub fn spawn_audio(
        asset: Arc<dyn MediaAsset>,
        queue: Arc<FileAudioQueue>,
        clock: Arc<PlaybackClock>,
        config: PacerConfig,
        observer: Option<WorkerObserver>,
    ) -> MediaResult<Self> {
        Self::spawn(asset, Delivery::Audio(queue), clock, config, observer)
    }

    fn spawn(
        asset: Arc<dyn MediaAsset>,
        delivery: Delivery,
        clock: Arc<PlaybackClock>,
        config: PacerConfig,
        observer: Option<WorkerObserver>,
    ) -> MediaResult<Self> {
        let kind = delivery.kind();
        let pacing = match kind {
            StreamKind::Video => config.video.clone(),
            StreamKind::Audio => config.audio.clone(),
        };
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        let worker = PacingLoop {
            kind,
            asset,
            delivery,
            clock,
            frame_clock: FrameClock::new(pacing),
            config,
            token: token.clone(),
            observer,
        };

        let thread = std::thread::Builder::new()
            .name(format!("{kind}-pacer"))
            .spawn(move || worker.run())
            .map_err(|e| MediaError::Worker {
                message: format!("Failed to spawn {kind} pacer: {e}"),
            })?;

        debug!(%id, %kind, "Spawned pacing worker");
        Ok(Self {
            id,
            kind,
            token,
            thread: Some(thread),
        })
    }

    /// Unique worker id, also used in log fields
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Track the worker paces
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Ask the worker to exit at its next check
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the worker thread has exited
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Wait for the worker to exit on its own
    pub fn join(mut self) -> MediaResult<WorkerStats> {
        self.join_inner()
    }

    /// Cancel and wait
    pub fn stop(self) -> MediaResult<WorkerStats> {
        self.cancel();
        self.join()
    }

    fn join_inner(&mut self) -> MediaResult<WorkerStats> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| MediaError::Worker {
                message: format!("{} pacer panicked", self.kind),
            })?,
            None => Err(MediaError::InvalidState {
                message: format!("{} pacer already joined", self.kind),
            }),
        }
    }
}

impl Drop for PacerWorker {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.token.cancel();
            if let Err(e) = self.join_inner() {
                debug!(kind = %self.kind, error = %e, "Pacing worker ended with error");
            }
        }
    }
}

impl std::fmt::Debug for PacerWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacerWorker")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::MemoryAsset;
    use crate::tracks::{VideoFrame, VideoResolution};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        timestamps: Mutex<Vec<f64>>,
    }

    impl FrameSink for RecordingSink {
        fn consume_frame(&self, frame: &VideoFrame) {
            self.timestamps
                .lock()
                .push(frame.timestamp.seconds().unwrap_or(-1.0));
        }
    }

    fn fast_config(looping: bool) -> PacerConfig {
        let mut config = PacerConfig {
            looping,
            sample_rate: 8000,
            ..Default::default()
        };
        config.video.warmup = Duration::ZERO;
        config
    }

    fn asset(duration: Duration) -> Arc<dyn MediaAsset> {
        Arc::new(MemoryAsset::synthetic(
            VideoResolution::new(4, 4),
            25,
            8000,
            duration,
        ))
    }

    #[test]
    fn test_video_pass_delivers_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let clock = Arc::new(PlaybackClock::new());
        let worker = PacerWorker::spawn_video(
            asset(Duration::from_millis(200)),
            sink.clone(),
            clock,
            fast_config(false),
            None,
        )
        .unwrap();

        let stats = worker.join().unwrap();
        assert_eq!(stats.frames, 5);
        assert_eq!(stats.passes, 1);
        let seen = sink.timestamps.lock().clone();
        assert_eq!(seen.len(), 5);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_video_pacing_spaces_frames() {
        let sink = Arc::new(RecordingSink::default());
        let clock = Arc::new(PlaybackClock::new());
        let started = Instant::now();
        let stats = PacerWorker::spawn_video(
            asset(Duration::from_millis(400)),
            sink,
            clock,
            fast_config(false),
            None,
        )
        .unwrap()
        .join()
        .unwrap();

        // nine gaps of 40ms minus the 25ms margin
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(stats.slept >= Duration::from_millis(100));
    }

    #[test]
    fn test_looping_resets_clock_and_cancels() {
        let sink = Arc::new(RecordingSink::default());
        let clock = Arc::new(PlaybackClock::new());
        let worker = PacerWorker::spawn_video(
            asset(Duration::from_millis(80)),
            sink.clone(),
            clock.clone(),
            fast_config(true),
            None,
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(150));
        let stats = worker.stop().unwrap();
        assert!(stats.passes >= 2);
        assert!(sink.timestamps.lock().iter().filter(|&&t| t == 0.0).count() >= 2);
        assert!(clock.last(StreamKind::Video).unwrap() <= 0.04);
    }

    #[test]
    fn test_cancel_during_warmup() {
        let mut config = fast_config(false);
        config.video.warmup = Duration::from_secs(30);
        let worker = PacerWorker::spawn_video(
            asset(Duration::from_millis(80)),
            Arc::new(RecordingSink::default()),
            Arc::new(PlaybackClock::new()),
            config,
            None,
        )
        .unwrap();

        let started = Instant::now();
        let stats = worker.stop().unwrap();
        assert_eq!(stats.frames, 0);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_missing_track_reports_to_observer() {
        let failures = Arc::new(Mutex::new(Vec::new()));
        let seen = failures.clone();
        let observer: WorkerObserver = Arc::new(move |kind, err| {
            seen.lock().push((kind, err.to_string()));
        });
        let video_only: Arc<dyn MediaAsset> = Arc::new(MemoryAsset::new().with_video(vec![]));
        let worker = PacerWorker::spawn_audio(
            video_only,
            Arc::new(FileAudioQueue::new(64)),
            Arc::new(PlaybackClock::new()),
            fast_config(true),
            Some(observer),
        )
        .unwrap();

        assert!(matches!(
            worker.join(),
            Err(MediaError::TrackNotFound {
                kind: StreamKind::Audio
            })
        ));
        assert_eq!(failures.lock()[0].0, StreamKind::Audio);
    }

    #[test]
    fn test_audio_worker_fills_queue() {
        let queue = Arc::new(FileAudioQueue::new(4096));
        let clock = Arc::new(PlaybackClock::new());
        // 8 kHz audio in 20 ms chunks of 160 samples
        let stats = PacerWorker::spawn_audio(
            asset(Duration::from_millis(100)),
            queue.clone(),
            clock.clone(),
            fast_config(false),
            None,
        )
        .unwrap()
        .join()
        .unwrap();

        assert_eq!(stats.frames, 5);
        assert_eq!(queue.len(), 800);
        assert!((clock.last(StreamKind::Audio).unwrap() - 0.08).abs() < 1e-9);
    }

    #[test]
    fn test_empty_track_does_not_spin() {
        let empty: Arc<dyn MediaAsset> = Arc::new(MemoryAsset::new().with_video(vec![]));
        let stats = PacerWorker::spawn_video(
            empty,
            Arc::new(RecordingSink::default()),
            Arc::new(PlaybackClock::new()),
            fast_config(true),
            None,
        )
        .unwrap()
        .join()
        .unwrap();
        assert_eq!(stats.frames, 0);
        assert_eq!(stats.passes, 1);
    }
}
