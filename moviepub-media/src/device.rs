//! Audio unit lifecycle manager
//!
//! Owns one record unit and one playout unit, the audio session
//! configuration and the file-audio feed that gets mixed into the
//! microphone signal. The RTC session drives it through the usual audio
//! device calls (`initialize_*`, `start_*`, `stop_*`, format and delay
//! queries); the host forwards session notifications through
//! [`AudioDeviceManager::handle_session_event`].
//!
//! Every lifecycle operation runs under one state lock. Notifications and
//! recovery retries run on a serial control queue and take the same lock, so
//! a notification never interleaves with a start or stop issued by the
//! session.

use crate::asset::MediaAsset;
use crate::backend::{
    AudioDirection, AudioIoHandler, AudioUnit, AudioUnitBackend, DeviceError, StreamFormat,
    UnitRequest,
};
use crate::control::{ControlHandle, ControlQueue};
use crate::delay::{DelayDirection, DelayEstimator, DelayReading, UnitLatency};
use crate::error::{MediaError, MediaResult};
use crate::mixer::AudioMixer;
use crate::pacer::{PacerConfig, PacerWorker, WorkerObserver};
use crate::queue::{FileAudioQueue, DEFAULT_QUEUE_CAPACITY};
use crate::session::{
    AudioRoute, AudioSession, CategoryOptions, InterruptionType, PortOverride, RouteChangeReason,
    RouteDescription, SessionCategory, SessionEvent, SessionMode, SessionParameters,
};
use moviepub_core::{PlaybackClock, StreamKind};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Upper bound reported for the playout delay, in milliseconds
pub const MAX_PLAYOUT_DELAY_MS: u16 = 150;

/// Capture restart attempts after an interruption before giving up
pub const RESTART_ATTEMPTS: u32 = 3;

/// Where the RTC session exchanges audio with the device.
///
/// Both calls happen on the real-time audio thread and must not block.
pub trait AudioBus: Send + Sync {
    /// Deliver captured (and mixed) samples
    fn write_capture_data(&self, samples: &[i16]);

    /// Fill `out` with samples to play; returns how many were written
    fn read_render_data(&self, out: &mut [i16]) -> usize;
}

/// Lifecycle state of one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UnitState {
    /// No unit exists; the next start creates one
    #[default]
    Uninitialized,
    /// A unit exists but has not been started
    Initialized,
    /// The unit is running and its callback is live
    Started,
    /// The unit was stopped and is kept for a quick restart
    Stopped,
}

/// Notifications published by the manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// A direction started
    Started(AudioDirection),
    /// A direction stopped
    Stopped(AudioDirection),
    /// An interruption stopped the listed directions
    Interrupted {
        /// Capture was running
        recorder: bool,
        /// Playout was running
        player: bool,
    },
    /// A direction came back after an interruption
    Resumed(AudioDirection),
    /// Capture could not be restarted after an interruption
    RecoveryFailed {
        /// Restart attempts made
        attempts: u32,
    },
    /// The output device changed and the units were rebuilt
    RouteRestarted {
        /// Output port name before the change
        previous: String,
        /// Output port name now
        current: String,
    },
    /// Both units were disposed and the session put back as it was
    TornDown,
    /// The file-audio feed could not open its track
    FeedFailed {
        /// Open error
        reason: String,
    },
}

impl DeviceEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            DeviceEvent::Started(_) => "started",
            DeviceEvent::Stopped(_) => "stopped",
            DeviceEvent::Interrupted { .. } => "interrupted",
            DeviceEvent::Resumed(_) => "resumed",
            DeviceEvent::RecoveryFailed { .. } => "recovery_failed",
            DeviceEvent::RouteRestarted { .. } => "route_restarted",
            DeviceEvent::TornDown => "torn_down",
            DeviceEvent::FeedFailed { .. } => "feed_failed",
        }
    }
}

/// Lifecycle counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDeviceStats {
    /// Audio units created
    pub units_created: u32,
    /// Audio units disposed
    pub units_disposed: u32,
    /// Failed unit creations or starts
    pub start_failures: u32,
    /// Capture restart attempts after interruptions
    pub recovery_attempts: u32,
    /// Route-change restarts
    pub route_restarts: u32,
    /// Full teardowns
    pub teardowns: u32,
}

/// Manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioDeviceConfig {
    /// Format of both units
    pub format: StreamFormat,
    /// Pending file samples before the feed waits
    pub queue_capacity: usize,
    /// I/O buffer duration requested from the session
    pub io_buffer_duration: Duration,
    /// Pacing of the file-audio feed
    pub pacer: PacerConfig,
}

impl Default for AudioDeviceConfig {
    fn default() -> Self {
        Self {
            format: StreamFormat::mono(48000),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            io_buffer_duration: Duration::from_millis(10),
            pacer: PacerConfig::default(),
        }
    }
}

/// Record callback context: mixes pending file audio into the microphone
/// signal and hands the result to the bus.
pub struct RecordProcessor {
    recording: Arc<AtomicBool>,
    queue: Arc<FileAudioQueue>,
    mixer: AudioMixer,
    bus: Arc<dyn AudioBus>,
    delay: DelayEstimator,
}

impl RecordProcessor {
    /// Mixing only happens while `recording` is set; the delay estimator
    /// ticks on every callback regardless.
    pub fn new(
        recording: Arc<AtomicBool>,
        queue: Arc<FileAudioQueue>,
        bus: Arc<dyn AudioBus>,
        delay: DelayEstimator,
    ) -> Self {
        Self {
            recording,
            queue,
            mixer: AudioMixer::with_capacity(1024),
            bus,
            delay,
        }
    }
}

impl AudioIoHandler for RecordProcessor {
    fn process(&mut self, buffer: &mut [i16]) {
        if self.recording.load(Ordering::Acquire) {
            let mixed = self.mixer.mix(buffer, &self.queue);
            self.bus.write_capture_data(mixed.samples);
        }
        self.delay.tick();
    }
}

/// Playout callback context: pulls samples from the bus.
pub struct PlayoutProcessor {
    playing: Arc<AtomicBool>,
    bus: Arc<dyn AudioBus>,
    delay: DelayEstimator,
}

impl PlayoutProcessor {
    /// Pull from `bus` while `playing` is set, silence otherwise
    pub fn new(playing: Arc<AtomicBool>, bus: Arc<dyn AudioBus>, delay: DelayEstimator) -> Self {
        Self {
            playing,
            bus,
            delay,
        }
    }
}

impl AudioIoHandler for PlayoutProcessor {
    fn process(&mut self, buffer: &mut [i16]) {
        if !self.playing.load(Ordering::Acquire) {
            buffer.fill(0);
            return;
        }
        let written = self.bus.read_render_data(buffer).min(buffer.len());
        buffer[written..].fill(0);
        self.delay.tick();
    }
}

#[derive(Default)]
struct DirectionState {
    state: UnitState,
    unit: Option<Box<dyn AudioUnit>>,
}

#[derive(Default)]
struct ManagerState {
    capture: DirectionState,
    render: DirectionState,
    recorder_interrupted: bool,
    player_interrupted: bool,
    resetting: bool,
    retry_count: u32,
    session_configured: bool,
    saved_parameters: Option<SessionParameters>,
    feed: Option<PacerWorker>,
    stats: AudioDeviceStats,
}

impl ManagerState {
    fn direction(&mut self, direction: AudioDirection) -> &mut DirectionState {
        match direction {
            AudioDirection::Capture => &mut self.capture,
            AudioDirection::Render => &mut self.render,
        }
    }
}

/// Audio device built from a record unit, a playout unit and a file feed
pub struct AudioDeviceManager {
    this: Weak<AudioDeviceManager>,
    backend: Arc<dyn AudioUnitBackend>,
    session: Arc<dyn AudioSession>,
    bus: Arc<dyn AudioBus>,
    asset: Arc<dyn MediaAsset>,
    clock: Arc<PlaybackClock>,
    queue: Arc<FileAudioQueue>,
    config: AudioDeviceConfig,
    state: Mutex<ManagerState>,
    recording: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
    capture_delay: Arc<DelayReading>,
    render_delay: Arc<DelayReading>,
    capture_latency: Arc<UnitLatency>,
    render_latency: Arc<UnitLatency>,
    events: broadcast::Sender<DeviceEvent>,
    control: ControlQueue,
}

impl AudioDeviceManager {
    /// Create a manager. Nothing touches the session or the backend until
    /// the first start.
    pub fn new(
        backend: Arc<dyn AudioUnitBackend>,
        session: Arc<dyn AudioSession>,
        bus: Arc<dyn AudioBus>,
        asset: Arc<dyn MediaAsset>,
        clock: Arc<PlaybackClock>,
        config: AudioDeviceConfig,
    ) -> MediaResult<Arc<Self>> {
        if config.queue_capacity == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: "file audio queue capacity must be positive".to_string(),
            });
        }
        if config.format.sample_rate != config.pacer.sample_rate {
            return Err(MediaError::InvalidConfiguration {
                message: format!(
                    "feed decodes at {} Hz but units run at {} Hz",
                    config.pacer.sample_rate, config.format.sample_rate
                ),
            });
        }

        let control = ControlQueue::new("audio-control")?;
        let (events, _) = broadcast::channel(64);
        let queue = Arc::new(FileAudioQueue::new(config.queue_capacity));
        info!(backend = backend.name(), format = ?config.format, "Created audio device manager");

        Ok(Arc::new_cyclic(|this| Self {
            this: this.clone(),
            backend,
            session,
            bus,
            asset,
            clock,
            queue,
            config,
            state: Mutex::new(ManagerState::default()),
            recording: Arc::new(AtomicBool::new(false)),
            playing: Arc::new(AtomicBool::new(false)),
            capture_delay: Arc::new(DelayReading::new()),
            render_delay: Arc::new(DelayReading::new()),
            capture_latency: Arc::new(UnitLatency::new()),
            render_latency: Arc::new(UnitLatency::new()),
            events,
            control,
        }))
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Queue of file samples waiting to be mixed
    pub fn file_queue(&self) -> &Arc<FileAudioQueue> {
        &self.queue
    }

    /// Format the record unit runs at
    pub fn capture_format(&self) -> StreamFormat {
        self.config.format
    }

    /// Format the playout unit runs at
    pub fn render_format(&self) -> StreamFormat {
        self.config.format
    }

    /// Whether the backend has an input device
    pub fn capture_is_available(&self) -> bool {
        self.backend.is_available(AudioDirection::Capture)
    }

    /// Whether the backend has an output device
    pub fn rendering_is_available(&self) -> bool {
        self.backend.is_available(AudioDirection::Render)
    }

    /// Whether a record unit exists. Teardown clears it.
    pub fn capture_is_initialized(&self) -> bool {
        self.state.lock().capture.state != UnitState::Uninitialized
    }

    /// Whether a playout unit exists
    pub fn rendering_is_initialized(&self) -> bool {
        self.state.lock().render.state != UnitState::Uninitialized
    }

    /// Whether the record unit is started
    pub fn is_capturing(&self) -> bool {
        self.state.lock().capture.state == UnitState::Started
    }

    /// Whether the playout unit is started
    pub fn is_rendering(&self) -> bool {
        self.state.lock().render.state == UnitState::Started
    }

    /// Current state of `direction`
    pub fn unit_state(&self, direction: AudioDirection) -> UnitState {
        self.state.lock().direction(direction).state
    }

    /// Playout delay in milliseconds, capped at [`MAX_PLAYOUT_DELAY_MS`]
    pub fn estimated_render_delay(&self) -> u16 {
        self.render_delay.get().min(MAX_PLAYOUT_DELAY_MS as u32) as u16
    }

    /// Recording delay in milliseconds
    pub fn estimated_capture_delay(&self) -> u16 {
        self.capture_delay.get().min(u16::MAX as u32) as u16
    }

    /// Counters since creation
    pub fn stats(&self) -> AudioDeviceStats {
        self.state.lock().stats.clone()
    }

    /// Whether an interruption left a direction waiting to be restarted
    pub fn is_interrupted(&self) -> bool {
        let state = self.state.lock();
        state.recorder_interrupted || state.player_interrupted
    }

    /// Mark rendering as initialized. Fails while rendering.
    pub fn initialize_rendering(&self) -> bool {
        Self::initialize(&mut self.state.lock().render)
    }

    /// Mark capture as initialized. Fails while capturing.
    pub fn initialize_capture(&self) -> bool {
        Self::initialize(&mut self.state.lock().capture)
    }

    fn initialize(direction: &mut DirectionState) -> bool {
        match direction.state {
            UnitState::Started => false,
            UnitState::Uninitialized => {
                direction.state = UnitState::Initialized;
                true
            }
            UnitState::Initialized | UnitState::Stopped => true,
        }
    }

    /// Start playout. Starting while started is a no-op.
    pub fn start_rendering(&self) -> bool {
        let mut state = self.state.lock();
        self.start_rendering_locked(&mut state)
    }

    /// Stop playout. Stopping while stopped is a no-op.
    pub fn stop_rendering(&self) -> bool {
        let mut state = self.state.lock();
        self.stop_rendering_locked(&mut state)
    }

    /// Start recording and the file-audio feed. Starting while started is a
    /// no-op.
    pub fn start_capture(&self) -> bool {
        let mut state = self.state.lock();
        self.start_capture_locked(&mut state)
    }

    /// Stop recording and the file-audio feed. Stopping while stopped is a
    /// no-op.
    pub fn stop_capture(&self) -> bool {
        let mut state = self.state.lock();
        self.stop_capture_locked(&mut state)
    }

    /// Queue a session notification for the control thread.
    ///
    /// Returns `false` if the control queue has shut down.
    pub fn handle_session_event(&self, event: SessionEvent) -> bool {
        let this = self.this.clone();
        self.control_handle().submit(move || {
            if let Some(manager) = this.upgrade() {
                manager.process_session_event(event);
            }
        })
    }

    /// Wait until queued notifications and their retries have run
    pub async fn flush(&self) {
        self.control_handle().flush().await;
    }

    /// Blocking form of [`AudioDeviceManager::flush`]
    pub fn flush_blocking(&self) {
        self.control_handle().flush_blocking();
    }

    /// Apply a preferred route to the session
    pub fn configure_route(&self, route: AudioRoute) {
        let _state = self.state.lock();
        self.apply_route(route);
    }

    fn emit(&self, event: DeviceEvent) {
        debug!(event = event.event_type(), "Audio device event");
        let _ = self.events.send(event);
    }

    fn start_rendering_locked(&self, state: &mut ManagerState) -> bool {
        if state.render.state == UnitState::Started {
            return true;
        }
        if state.render.unit.is_none() {
            match self.create_unit(state, AudioDirection::Render) {
                Ok(unit) => state.render.unit = Some(unit),
                Err(e) => {
                    warn!(error = %e, "Failed to set up playout unit");
                    state.stats.start_failures += 1;
                    return false;
                }
            }
        }

        self.playing.store(true, Ordering::Release);
        let started = state.render.unit.as_mut().map(|unit| unit.start());
        match started {
            Some(Ok(())) => {
                state.render.state = UnitState::Started;
                info!("Rendering started");
                self.emit(DeviceEvent::Started(AudioDirection::Render));
                true
            }
            Some(Err(e)) => {
                warn!(error = %e, "Failed to start playout unit");
                self.playing.store(false, Ordering::Release);
                state.stats.start_failures += 1;
                false
            }
            None => {
                self.playing.store(false, Ordering::Release);
                false
            }
        }
    }

    fn stop_rendering_locked(&self, state: &mut ManagerState) -> bool {
        if state.render.state != UnitState::Started {
            return true;
        }
        self.playing.store(false, Ordering::Release);
        state.render.state = UnitState::Stopped;

        if let Some(unit) = state.render.unit.as_mut() {
            if let Err(e) = unit.stop() {
                warn!(error = %e, "Failed to stop playout unit");
                return false;
            }
        }
        info!("Rendering stopped");
        self.emit(DeviceEvent::Stopped(AudioDirection::Render));

        if state.capture.state != UnitState::Started && !Self::teardown_blocked(state) {
            self.teardown(state);
        }
        true
    }

    fn start_capture_locked(&self, state: &mut ManagerState) -> bool {
        if state.capture.state == UnitState::Started {
            return true;
        }
        self.start_feed(state);

        if state.capture.unit.is_none() {
            match self.create_unit(state, AudioDirection::Capture) {
                Ok(unit) => state.capture.unit = Some(unit),
                Err(e) => {
                    warn!(error = %e, "Failed to set up recording unit");
                    state.stats.start_failures += 1;
                    self.stop_feed(state);
                    return false;
                }
            }
        }

        self.recording.store(true, Ordering::Release);
        let started = state.capture.unit.as_mut().map(|unit| unit.start());
        match started {
            Some(Ok(())) => {
                state.capture.state = UnitState::Started;
                info!("Capture started");
                self.emit(DeviceEvent::Started(AudioDirection::Capture));
                true
            }
            Some(Err(e)) => {
                warn!(error = %e, "Failed to start recording unit");
                self.recording.store(false, Ordering::Release);
                state.stats.start_failures += 1;
                self.stop_feed(state);
                false
            }
            None => {
                self.recording.store(false, Ordering::Release);
                self.stop_feed(state);
                false
            }
        }
    }

    fn stop_capture_locked(&self, state: &mut ManagerState) -> bool {
        if state.capture.state != UnitState::Started {
            return true;
        }
        self.recording.store(false, Ordering::Release);
        state.capture.state = UnitState::Stopped;
        self.stop_feed(state);

        if let Some(unit) = state.capture.unit.as_mut() {
            if let Err(e) = unit.stop() {
                warn!(error = %e, "Failed to stop recording unit");
                return false;
            }
        }
        info!("Capture stopped");
        self.emit(DeviceEvent::Stopped(AudioDirection::Capture));

        if state.render.state != UnitState::Started && !Self::teardown_blocked(state) {
            self.teardown(state);
        }
        true
    }

    fn teardown_blocked(state: &ManagerState) -> bool {
        state.recorder_interrupted || state.player_interrupted || state.resetting
    }

    fn create_unit(
        &self,
        state: &mut ManagerState,
        direction: AudioDirection,
    ) -> Result<Box<dyn AudioUnit>, DeviceError> {
        if !state.session_configured {
            self.configure_session(state);
        }

        let handler: Box<dyn AudioIoHandler> = match direction {
            AudioDirection::Capture => Box::new(RecordProcessor::new(
                self.recording.clone(),
                self.queue.clone(),
                self.bus.clone(),
                DelayEstimator::new(
                    DelayDirection::Capture,
                    self.session.clone(),
                    self.capture_latency.clone(),
                    self.capture_delay.clone(),
                ),
            )),
            AudioDirection::Render => Box::new(PlayoutProcessor::new(
                self.playing.clone(),
                self.bus.clone(),
                DelayEstimator::new(
                    DelayDirection::Render,
                    self.session.clone(),
                    self.render_latency.clone(),
                    self.render_delay.clone(),
                ),
            )),
        };
        let latency = match direction {
            AudioDirection::Capture => self.capture_latency.clone(),
            AudioDirection::Render => self.render_latency.clone(),
        };

        let unit = self.backend.create_unit(UnitRequest {
            direction,
            format: self.config.format,
            handler,
            latency,
        })?;
        state.stats.units_created += 1;
        debug!(%direction, backend = self.backend.name(), "Created audio unit");

        self.prefer_bluetooth_input();
        Ok(unit)
    }

    fn dispose_unit(&self, state: &mut ManagerState, direction: AudioDirection) {
        if let Some(unit) = state.direction(direction).unit.take() {
            drop(unit);
            state.stats.units_disposed += 1;
            debug!(%direction, "Disposed audio unit");
        }
    }

    fn teardown(&self, state: &mut ManagerState) {
        info!("Tearing down audio units");
        self.dispose_unit(state, AudioDirection::Render);
        self.dispose_unit(state, AudioDirection::Capture);
        state.capture.state = UnitState::Uninitialized;
        state.render.state = UnitState::Uninitialized;
        state.stats.teardowns += 1;
        self.restore_session(state);
        self.emit(DeviceEvent::TornDown);
    }

    fn start_feed(&self, state: &mut ManagerState) {
        if state.feed.as_ref().is_some_and(|feed| !feed.is_finished()) {
            return;
        }
        self.stop_feed(state);

        let events = self.events.clone();
        let observer: WorkerObserver = Arc::new(move |_kind: StreamKind, err: &MediaError| {
            let _ = events.send(DeviceEvent::FeedFailed {
                reason: err.to_string(),
            });
        });
        match PacerWorker::spawn_audio(
            self.asset.clone(),
            self.queue.clone(),
            self.clock.clone(),
            self.config.pacer.clone(),
            Some(observer),
        ) {
            Ok(feed) => state.feed = Some(feed),
            Err(e) => warn!(error = %e, "Failed to start file audio feed"),
        }
    }

    fn stop_feed(&self, state: &mut ManagerState) {
        if let Some(feed) = state.feed.take() {
            match feed.stop() {
                Ok(stats) => debug!(frames = stats.frames, passes = stats.passes, "File audio feed stopped"),
                Err(e) => debug!(error = %e, "File audio feed ended with error"),
            }
        }
        self.queue.clear();
    }

    fn configure_session(&self, state: &mut ManagerState) {
        let session = &self.session;
        // a snapshot kept from a failed restore is still the one to go back to
        if state.saved_parameters.is_none() {
            state.saved_parameters = Some(session.parameters());
        }

        if let Err(e) = session.set_preferred_sample_rate(self.config.format.sample_rate as f64) {
            warn!(error = %e, "Error setting up audio session");
        }
        if let Err(e) = session.set_preferred_io_buffer_duration(self.config.io_buffer_duration) {
            warn!(error = %e, "Error setting up audio session");
        }
        let options = CategoryOptions {
            mix_with_others: true,
            allow_bluetooth: true,
            default_to_speaker: true,
        };
        if let Err(e) = session.set_category(
            SessionCategory::PlayAndRecord,
            SessionMode::VideoChat,
            options,
        ) {
            warn!(error = %e, "Error setting up audio session");
        }
        if let Err(e) = session.set_active(true) {
            warn!(error = %e, "Error activating audio session");
        }

        state.session_configured = true;
        debug!("Audio session configured");
    }

    fn restore_session(&self, state: &mut ManagerState) {
        let Some(saved) = state.saved_parameters.clone() else {
            return;
        };
        // partially reverted either way, so the next start configures again
        state.session_configured = false;
        match self.apply_parameters(&saved) {
            Ok(()) => {
                state.saved_parameters = None;
                debug!(?saved, "Audio session restored");
            }
            Err(e) => warn!(error = %e, "Error resetting audio session, keeping snapshot"),
        }
    }

    fn apply_parameters(&self, saved: &SessionParameters) -> MediaResult<()> {
        let session = &self.session;
        session.set_category(saved.category, SessionMode::Default, CategoryOptions::default())?;
        session.set_mode(saved.mode)?;
        session.set_preferred_sample_rate(saved.preferred_sample_rate)?;
        session.set_preferred_input_channels(saved.input_channels)?;
        Ok(())
    }

    fn prefer_bluetooth_input(&self) {
        let bluetooth = self
            .session
            .available_inputs()
            .into_iter()
            .filter(|port| port.port_type.is_bluetooth())
            .last();
        if let Some(port) = bluetooth {
            match self.session.set_preferred_input(&port) {
                Ok(()) => debug!(port = %port.name, "Preferring Bluetooth input"),
                Err(e) => warn!(error = %e, "Error setting Bluetooth as preferred input"),
            }
        }
    }

    fn apply_route(&self, route: AudioRoute) {
        if route == AudioRoute::Bluetooth {
            self.prefer_bluetooth_input();
        }
        let port_override = match route {
            AudioRoute::Speaker => PortOverride::Speaker,
            AudioRoute::Bluetooth | AudioRoute::Headset => PortOverride::None,
        };
        if let Err(e) = self.session.override_output_port(port_override) {
            warn!(error = %e, ?route, "Error setting audio route");
        }
    }

    fn process_session_event(&self, event: SessionEvent) {
        debug!(event = event.event_type(), "Handling session event");
        match event {
            SessionEvent::Interruption(InterruptionType::Began) => self.interruption_began(),
            SessionEvent::Interruption(InterruptionType::Ended) | SessionEvent::BecameActive => {
                let mut state = self.state.lock();
                self.apply_route(AudioRoute::Bluetooth);
                self.restart_after_interruption(&mut state);
            }
            SessionEvent::RouteChange {
                reason,
                previous_route,
            } => self.route_changed(reason, &previous_route),
        }
    }

    fn interruption_began(&self) {
        let mut state = self.state.lock();
        let recorder = state.capture.state == UnitState::Started;
        let player = state.render.state == UnitState::Started;
        if recorder {
            state.recorder_interrupted = true;
            self.stop_capture_locked(&mut state);
        }
        if player {
            state.player_interrupted = true;
            self.stop_rendering_locked(&mut state);
        }
        if recorder || player {
            info!(recorder, player, "Audio interrupted");
            self.emit(DeviceEvent::Interrupted { recorder, player });
        }
    }

    fn restart_after_interruption(&self, state: &mut ManagerState) {
        if state.recorder_interrupted {
            state.stats.recovery_attempts += 1;
            if self.start_capture_locked(state) {
                state.recorder_interrupted = false;
                state.retry_count = 0;
                self.emit(DeviceEvent::Resumed(AudioDirection::Capture));
            } else {
                state.retry_count += 1;
                if state.retry_count < RESTART_ATTEMPTS {
                    debug!(attempt = state.retry_count, "Capture restart failed, retrying");
                    self.schedule_restart_retry();
                } else {
                    state.recorder_interrupted = false;
                    state.player_interrupted = false;
                    state.retry_count = 0;
                    error!(
                        attempts = RESTART_ATTEMPTS,
                        "Unable to acquire audio session after interruption"
                    );
                    self.emit(DeviceEvent::RecoveryFailed {
                        attempts: RESTART_ATTEMPTS,
                    });
                }
            }
        }

        if state.player_interrupted {
            state.player_interrupted = false;
            if self.start_rendering_locked(state) {
                self.emit(DeviceEvent::Resumed(AudioDirection::Render));
            }
        }
    }

    fn schedule_restart_retry(&self) {
        let this = self.this.clone();
        let submitted = self.control_handle().submit(move || {
            if let Some(manager) = this.upgrade() {
                let mut state = manager.state.lock();
                manager.restart_after_interruption(&mut state);
            }
        });
        if !submitted {
            warn!("Control queue closed, dropping capture restart");
        }
    }

    fn control_handle(&self) -> ControlHandle {
        self.control.handle()
    }

    fn route_changed(&self, reason: RouteChangeReason, previous_route: &RouteDescription) {
        match reason {
            RouteChangeReason::Override | RouteChangeReason::CategoryChange => {}
            other => {
                debug!(reason = ?other, "Ignoring route change");
                return;
            }
        }

        let current_route = self.session.current_route();
        let (Some(previous), Some(current)) =
            (previous_route.output_name(), current_route.output_name())
        else {
            return;
        };
        if previous == current {
            return;
        }

        info!(previous, current, "Output device changed, restarting audio");
        let mut state = self.state.lock();
        self.restart_units(&mut state);
        self.emit(DeviceEvent::RouteRestarted {
            previous: previous.to_string(),
            current: current.to_string(),
        });
    }

    fn restart_units(&self, state: &mut ManagerState) {
        state.resetting = true;
        state.stats.route_restarts += 1;

        if state.capture.state == UnitState::Started {
            self.stop_capture_locked(state);
            self.dispose_unit(state, AudioDirection::Capture);
            self.start_capture_locked(state);
        }
        if state.render.state == UnitState::Started {
            self.stop_rendering_locked(state);
            self.dispose_unit(state, AudioDirection::Render);
            self.start_rendering_locked(state);
        }

        state.resetting = false;
    }
}

impl Drop for AudioDeviceManager {
    fn drop(&mut self) {
        let mut state = std::mem::take(self.state.get_mut());
        self.recording.store(false, Ordering::Release);
        self.playing.store(false, Ordering::Release);
        self.stop_feed(&mut state);
        if state.capture.unit.is_some()
            || state.render.unit.is_some()
            || state.saved_parameters.is_some()
        {
            self.teardown(&mut state);
        }
    }
}

impl std::fmt::Debug for AudioDeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioDeviceManager")
            .field("backend", &self.backend.name())
            .field("format", &self.config.format)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::HostAudioSession;
    use std::time::Duration;

    #[derive(Default)]
    struct CollectingBus {
        captured: Mutex<Vec<i16>>,
    }

    impl AudioBus for CollectingBus {
        fn write_capture_data(&self, samples: &[i16]) {
            self.captured.lock().extend_from_slice(samples);
        }

        fn read_render_data(&self, out: &mut [i16]) -> usize {
            let n = out.len() / 2;
            out[..n].fill(7);
            n
        }
    }

    fn estimator(direction: DelayDirection) -> DelayEstimator {
        DelayEstimator::new(
            direction,
            Arc::new(HostAudioSession::new()),
            Arc::new(UnitLatency::new()),
            Arc::new(DelayReading::new()),
        )
    }

    #[test]
    fn test_record_processor_mixes_file_audio() {
        let recording = Arc::new(AtomicBool::new(true));
        let queue = Arc::new(FileAudioQueue::new(16));
        queue.push_available(&[10, 20]);
        let bus = Arc::new(CollectingBus::default());
        let mut processor = RecordProcessor::new(
            recording.clone(),
            queue.clone(),
            bus.clone(),
            estimator(DelayDirection::Capture),
        );

        processor.process(&mut [1, 1, 1]);
        assert_eq!(*bus.captured.lock(), vec![11, 21, 1]);

        recording.store(false, Ordering::SeqCst);
        processor.process(&mut [5, 5]);
        assert_eq!(bus.captured.lock().len(), 3);
    }

    #[test]
    fn test_playout_processor_pads_with_silence() {
        let playing = Arc::new(AtomicBool::new(true));
        let bus = Arc::new(CollectingBus::default());
        let mut processor =
            PlayoutProcessor::new(playing.clone(), bus, estimator(DelayDirection::Render));

        let mut buffer = [3i16; 4];
        processor.process(&mut buffer);
        assert_eq!(buffer, [7, 7, 0, 0]);

        playing.store(false, Ordering::SeqCst);
        let mut buffer = [3i16; 4];
        processor.process(&mut buffer);
        assert_eq!(buffer, [0; 4]);
    }

    #[test]
    fn test_initialize_rules() {
        let mut direction = DirectionState::default();
        assert!(AudioDeviceManager::initialize(&mut direction));
        assert_eq!(direction.state, UnitState::Initialized);
        direction.state = UnitState::Started;
        assert!(!AudioDeviceManager::initialize(&mut direction));
    }

    #[test]
    fn test_default_config() {
        let config = AudioDeviceConfig::default();
        assert_eq!(config.format, StreamFormat::mono(48000));
        assert_eq!(config.io_buffer_duration, Duration::from_millis(10));
        assert_eq!(config.queue_capacity, 16384);
    }
}
