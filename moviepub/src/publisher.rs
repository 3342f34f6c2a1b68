//! Publisher orchestration
//!
//! [`MoviePublisher`] wires one asset to both halves of an RTC session: the
//! video track goes through a [`VideoCapturer`] into the frame sink, the
//! audio track is mixed into the microphone by the [`AudioDeviceManager`].
//! Both share one playback clock so video follows audio.

use crate::config::PublisherConfig;
use crate::event::{Event, EventPublisher, PublisherEvent};
use crate::monitor::{Monitor, MonitorContext, VideoFlags};
use moviepub_core::{MoviePubError, PlaybackClock};
use moviepub_media::{
    AudioBus, AudioDeviceManager, AudioSession, AudioUnitBackend, FrameSink, MediaAsset,
    SessionEvent, VideoCapturer, WorkerObserver,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

/// Publishes a movie as camera and microphone
pub struct MoviePublisher {
    id: Uuid,
    config: PublisherConfig,
    clock: Arc<PlaybackClock>,
    manager: Arc<AudioDeviceManager>,
    capturer: Arc<VideoCapturer>,
    events: EventPublisher,
    video: Arc<VideoFlags>,
    running: Mutex<bool>,
    monitor: Option<Monitor>,
}

impl MoviePublisher {
    /// Create a publisher. Nothing is read or opened until [`MoviePublisher::start`].
    ///
    /// # Example
    /// ```rust,no_run
    /// use moviepub::*;
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// # fn example(bus: Arc<dyn AudioBus>, sink: Arc<dyn FrameSink>) -> Result<(), MoviePubError> {
    /// let asset = Arc::new(MemoryAsset::synthetic(
    ///     VideoResolution::new(640, 360),
    ///     25,
    ///     48000,
    ///     Duration::from_secs(10),
    /// ));
    /// let session = Arc::new(HostAudioSession::new());
    /// let backend = Arc::new(CpalAudioBackend::new().with_session(session.clone()));
    ///
    /// let publisher = MoviePublisher::new(asset, bus, sink, backend, session, PublisherConfig::default())?;
    /// publisher.start()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(
        asset: Arc<dyn MediaAsset>,
        bus: Arc<dyn AudioBus>,
        sink: Arc<dyn FrameSink>,
        backend: Arc<dyn AudioUnitBackend>,
        session: Arc<dyn AudioSession>,
        config: PublisherConfig,
    ) -> Result<Self, MoviePubError> {
        config.validate()?;

        let clock = Arc::new(PlaybackClock::new());
        let manager = AudioDeviceManager::new(
            backend,
            session,
            bus,
            asset.clone(),
            clock.clone(),
            config.device_config(),
        )?;

        let events = EventPublisher::new();
        let video = Arc::new(VideoFlags::default());
        let observer: WorkerObserver = {
            let events = events.clone();
            let video = video.clone();
            Arc::new(move |kind, error| {
                video.mark_failed();
                events.publish(Event::TrackFailed {
                    kind,
                    reason: error.to_string(),
                });
            })
        };
        let capturer = Arc::new(
            VideoCapturer::new(asset, sink, clock.clone(), config.pacer_config())
                .with_observer(observer),
        );

        let monitor = Monitor::spawn(MonitorContext {
            manager: manager.clone(),
            capturer: capturer.clone(),
            device_events: manager.subscribe(),
            events: events.clone(),
            video: video.clone(),
            interval: config.monitor_interval,
        })
        .map_err(|e| MoviePubError::Initialization {
            reason: format!("Failed to spawn publisher monitor: {}", e),
        })?;

        let id = Uuid::new_v4();
        info!(publisher = %id, sample_rate = config.sample_rate, "Created movie publisher");

        Ok(Self {
            id,
            config,
            clock,
            manager,
            capturer,
            events,
            video,
            running: Mutex::new(false),
            monitor: Some(monitor),
        })
    }

    /// Start the video capturer, the capture unit and, if enabled, the
    /// playout unit. Starting while running is a no-op.
    ///
    /// Whatever started is stopped again when any part fails.
    pub fn start(&self) -> Result<(), MoviePubError> {
        let mut running = self.running.lock();
        if *running {
            return Ok(());
        }

        self.manager.configure_route(self.config.route);
        self.video.arm();
        self.capturer.init_capture();
        let video = self.capturer.start();
        let audio = self.manager.initialize_capture() && self.manager.start_capture();
        let playout = !self.config.enable_playout
            || (self.manager.initialize_rendering() && self.manager.start_rendering());

        if !video {
            self.shutdown();
            return Err(MoviePubError::MediaProcessing {
                reason: "video capture could not start".to_string(),
            });
        }
        if !audio || !playout {
            self.shutdown();
            let direction = if audio { "playout" } else { "capture" };
            return Err(MoviePubError::AudioDevice {
                reason: format!("{} unit could not start", direction),
                recoverable: true,
            });
        }

        *running = true;
        info!(publisher = %self.id, "Publishing started");
        self.events.publish(Event::CaptureStarted { video, audio });
        Ok(())
    }

    /// Stop everything [`MoviePublisher::start`] started. Stopping while
    /// stopped is a no-op.
    pub fn stop(&self) {
        let mut running = self.running.lock();
        if !*running {
            return;
        }
        self.shutdown();
        *running = false;
        info!(publisher = %self.id, "Publishing stopped");
        self.events.publish(Event::CaptureStopped);
    }

    fn shutdown(&self) {
        self.video.disarm();
        self.capturer.release_capture();
        if !self.manager.stop_capture() {
            warn!(publisher = %self.id, "Capture unit did not stop cleanly");
        }
        if self.config.enable_playout && !self.manager.stop_rendering() {
            warn!(publisher = %self.id, "Playout unit did not stop cleanly");
        }
    }

    /// Whether [`MoviePublisher::start`] succeeded and no stop followed
    pub fn is_running(&self) -> bool {
        *self.running.lock()
    }

    /// Forward an audio session notification to the device manager
    pub fn handle_session_event(&self, event: SessionEvent) -> bool {
        self.manager.handle_session_event(event)
    }

    /// Wait until forwarded session notifications have been handled
    pub async fn flush(&self) {
        self.manager.flush().await;
    }

    /// Subscribe to publisher events
    pub fn subscribe(&self) -> broadcast::Receiver<PublisherEvent> {
        self.events.subscribe()
    }

    /// Publisher ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Active configuration
    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Clock shared by both tracks
    pub fn clock(&self) -> &Arc<PlaybackClock> {
        &self.clock
    }

    /// The audio device manager
    pub fn device(&self) -> &Arc<AudioDeviceManager> {
        &self.manager
    }

    /// The video capturer
    pub fn capturer(&self) -> &Arc<VideoCapturer> {
        &self.capturer
    }
}

impl Drop for MoviePublisher {
    fn drop(&mut self) {
        self.stop();
        self.monitor.take();
    }
}

impl std::fmt::Debug for MoviePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MoviePublisher")
            .field("id", &self.id)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
