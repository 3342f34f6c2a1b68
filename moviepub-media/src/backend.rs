//! Audio unit backends
//!
//! The lifecycle manager never talks to audio hardware directly. It asks an
//! [`AudioUnitBackend`] for one unit per direction and hands it the callback
//! context that runs on every hardware buffer.
//!
//! Two backends ship with the crate:
//!
//! - [`CpalAudioBackend`] drives the default input and output devices.
//! - [`DrivenAudioBackend`] lets the host push buffers itself, for SDKs that
//!   own the audio thread and pull capture data on their own schedule.

use crate::delay::UnitLatency;
use crate::error::MediaError;
use crate::session::HostAudioSession;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, error, info, warn};

/// Audio backend errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// No device for the requested direction
    #[error("No {direction} device available")]
    DeviceNotFound {
        /// Requested direction
        direction: AudioDirection,
    },

    /// The device rejected the stream configuration
    #[error("Configuration not supported: {reason}")]
    ConfigurationNotSupported {
        /// Reason
        reason: String,
    },

    /// Building, starting or stopping the stream failed
    #[error("Stream error: {reason}")]
    StreamError {
        /// Reason
        reason: String,
    },
}

impl From<DeviceError> for MediaError {
    fn from(err: DeviceError) -> Self {
        MediaError::Device {
            message: err.to_string(),
        }
    }
}

/// Direction of an audio unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioDirection {
    /// Microphone input
    Capture,
    /// Speaker output
    Render,
}

impl AudioDirection {
    fn index(self) -> usize {
        match self {
            AudioDirection::Capture => 0,
            AudioDirection::Render => 1,
        }
    }
}

impl std::fmt::Display for AudioDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioDirection::Capture => write!(f, "capture"),
            AudioDirection::Render => write!(f, "render"),
        }
    }
}

/// Interleaved signed 16-bit stream format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
}

impl StreamFormat {
    /// Mono at `sample_rate`
    pub fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self::mono(48000)
    }
}

/// Callback context run on every hardware buffer.
///
/// For capture units `buffer` holds the recorded samples; for render units
/// the handler fills it. Implementations must not block.
pub trait AudioIoHandler: Send + 'static {
    /// Handle one hardware buffer
    fn process(&mut self, buffer: &mut [i16]);
}

/// Boxed callback context
pub type IoHandler = Box<dyn AudioIoHandler>;

/// Everything a backend needs to create a unit
pub struct UnitRequest {
    /// Unit direction
    pub direction: AudioDirection,
    /// Stream format
    pub format: StreamFormat,
    /// Callback context moved into the unit
    pub handler: IoHandler,
    /// Where the backend publishes the unit's own latency
    pub latency: Arc<UnitLatency>,
}

impl std::fmt::Debug for UnitRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitRequest")
            .field("direction", &self.direction)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// A created audio unit. Dropping it disposes the unit.
pub trait AudioUnit: Send {
    /// Start delivering callbacks
    fn start(&mut self) -> Result<(), DeviceError>;

    /// Stop delivering callbacks. The unit can be started again.
    fn stop(&mut self) -> Result<(), DeviceError>;

    /// Direction the unit was created for
    fn direction(&self) -> AudioDirection;
}

/// Factory for audio units
pub trait AudioUnitBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Whether a device exists for `direction`
    fn is_available(&self, direction: AudioDirection) -> bool;

    /// Create an unstarted unit
    fn create_unit(&self, request: UnitRequest) -> Result<Box<dyn AudioUnit>, DeviceError>;
}

enum StreamCommand {
    Play(Arc<Reply>),
    Pause(Arc<Reply>),
    Close,
}

/// Result slot a stream thread fills in for a caller blocked on it.
///
/// Callers may sit inside an async runtime, where tokio's blocking receives
/// panic, so the wait is a plain condvar.
#[derive(Default)]
struct Reply {
    result: Mutex<Option<Result<(), DeviceError>>>,
    ready: Condvar,
}

impl Reply {
    fn send(&self, result: Result<(), DeviceError>) {
        *self.result.lock() = Some(result);
        self.ready.notify_all();
    }

    /// Wait for the result, or fail once the stream thread is gone
    fn wait(&self, thread: &JoinHandle<()>) -> Result<(), DeviceError> {
        let mut result = self.result.lock();
        loop {
            if let Some(result) = result.take() {
                return result;
            }
            if thread.is_finished() {
                return Err(DeviceError::StreamError {
                    reason: "Stream thread is gone".to_string(),
                });
            }
            self.ready.wait_for(&mut result, Duration::from_millis(50));
        }
    }
}

/// Audio units backed by cpal streams on the default host.
///
/// cpal streams cannot move between threads on every platform, so each unit
/// owns its stream on a dedicated thread and is driven through a command
/// channel.
#[derive(Debug, Clone, Default)]
pub struct CpalAudioBackend {
    session: Option<Arc<HostAudioSession>>,
}

impl CpalAudioBackend {
    /// Backend on the default cpal host
    pub fn new() -> Self {
        Self::default()
    }

    /// Also publish measured hardware latencies into `session`
    pub fn with_session(mut self, session: Arc<HostAudioSession>) -> Self {
        self.session = Some(session);
        self
    }
}

impl AudioUnitBackend for CpalAudioBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn is_available(&self, direction: AudioDirection) -> bool {
        let host = cpal::default_host();
        match direction {
            AudioDirection::Capture => host.default_input_device().is_some(),
            AudioDirection::Render => host.default_output_device().is_some(),
        }
    }

    fn create_unit(&self, request: UnitRequest) -> Result<Box<dyn AudioUnit>, DeviceError> {
        let direction = request.direction;
        let session = self.session.clone();
        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<StreamCommand>();
        let ready = Arc::new(Reply::default());
        let ready_tx = ready.clone();

        let thread = std::thread::Builder::new()
            .name(format!("cpal-{direction}"))
            .spawn(move || {
                let stream = match build_stream(request, session) {
                    Ok(stream) => {
                        ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        ready_tx.send(Err(e));
                        return;
                    }
                };

                while let Some(command) = command_rx.blocking_recv() {
                    match command {
                        StreamCommand::Play(reply) => {
                            reply.send(stream.play().map_err(|e| DeviceError::StreamError {
                                reason: format!("Failed to start stream: {e}"),
                            }));
                        }
                        StreamCommand::Pause(reply) => {
                            reply.send(stream.pause().map_err(|e| DeviceError::StreamError {
                                reason: format!("Failed to stop stream: {e}"),
                            }));
                        }
                        StreamCommand::Close => break,
                    }
                }
                debug!(%direction, "Closing cpal stream");
            })
            .map_err(|e| DeviceError::StreamError {
                reason: format!("Failed to spawn stream thread: {e}"),
            })?;

        if let Err(e) = ready.wait(&thread) {
            let _ = thread.join();
            return Err(e);
        }

        info!(%direction, "Created cpal audio unit");
        Ok(Box::new(CpalAudioUnit {
            direction,
            commands: command_tx,
            thread: Some(thread),
        }))
    }
}

struct CpalAudioUnit {
    direction: AudioDirection,
    commands: UnboundedSender<StreamCommand>,
    thread: Option<JoinHandle<()>>,
}

impl CpalAudioUnit {
    fn request(
        &self,
        command: impl FnOnce(Arc<Reply>) -> StreamCommand,
    ) -> Result<(), DeviceError> {
        let gone = || DeviceError::StreamError {
            reason: "Stream thread is gone".to_string(),
        };
        let thread = self.thread.as_ref().ok_or_else(gone)?;
        let reply = Arc::new(Reply::default());
        self.commands
            .send(command(reply.clone()))
            .map_err(|_| gone())?;
        reply.wait(thread)
    }
}

impl AudioUnit for CpalAudioUnit {
    fn start(&mut self) -> Result<(), DeviceError> {
        self.request(StreamCommand::Play)
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.request(StreamCommand::Pause)
    }

    fn direction(&self) -> AudioDirection {
        self.direction
    }
}

impl Drop for CpalAudioUnit {
    fn drop(&mut self) {
        let _ = self.commands.send(StreamCommand::Close);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(direction = %self.direction, "cpal stream thread panicked");
            }
        }
    }
}

fn build_stream(
    request: UnitRequest,
    session: Option<Arc<HostAudioSession>>,
) -> Result<cpal::Stream, DeviceError> {
    let UnitRequest {
        direction,
        format,
        mut handler,
        latency,
    } = request;

    let host = cpal::default_host();
    let device = match direction {
        AudioDirection::Capture => host.default_input_device(),
        AudioDirection::Render => host.default_output_device(),
    }
    .ok_or(DeviceError::DeviceNotFound { direction })?;

    let supported = match direction {
        AudioDirection::Capture => device.default_input_config(),
        AudioDirection::Render => device.default_output_config(),
    }
    .map_err(|e| DeviceError::ConfigurationNotSupported {
        reason: format!("Failed to get default {direction} config: {e}"),
    })?;

    let config = cpal::StreamConfig {
        channels: format.channels as cpal::ChannelCount,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let on_error = move |err: cpal::StreamError| {
        error!(%direction, %err, "Audio stream error");
    };

    // sized for 100 ms so typical device buffers never reallocate
    let mut scratch: Vec<i16> = Vec::with_capacity(format.sample_rate as usize / 10);

    let stream = match (direction, supported.sample_format()) {
        (AudioDirection::Capture, cpal::SampleFormat::I16) => device.build_input_stream(
            &config,
            move |data: &[i16], info: &cpal::InputCallbackInfo| {
                let ts = info.timestamp();
                if let Some(measured) = ts.callback.duration_since(&ts.capture) {
                    latency.set(measured);
                    if let Some(session) = &session {
                        session.report_input_latency(measured);
                    }
                }
                scratch.clear();
                scratch.extend_from_slice(data);
                handler.process(&mut scratch);
            },
            on_error,
            None,
        ),
        (AudioDirection::Capture, cpal::SampleFormat::F32) => device.build_input_stream(
            &config,
            move |data: &[f32], info: &cpal::InputCallbackInfo| {
                let ts = info.timestamp();
                if let Some(measured) = ts.callback.duration_since(&ts.capture) {
                    latency.set(measured);
                    if let Some(session) = &session {
                        session.report_input_latency(measured);
                    }
                }
                scratch.clear();
                scratch.extend(data.iter().map(|&s| f32_to_i16(s)));
                handler.process(&mut scratch);
            },
            on_error,
            None,
        ),
        (AudioDirection::Render, cpal::SampleFormat::I16) => device.build_output_stream(
            &config,
            move |data: &mut [i16], info: &cpal::OutputCallbackInfo| {
                let ts = info.timestamp();
                if let Some(measured) = ts.playback.duration_since(&ts.callback) {
                    latency.set(measured);
                    if let Some(session) = &session {
                        session.report_output_latency(measured);
                    }
                }
                handler.process(data);
            },
            on_error,
            None,
        ),
        (AudioDirection::Render, cpal::SampleFormat::F32) => device.build_output_stream(
            &config,
            move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
                let ts = info.timestamp();
                if let Some(measured) = ts.playback.duration_since(&ts.callback) {
                    latency.set(measured);
                    if let Some(session) = &session {
                        session.report_output_latency(measured);
                    }
                }
                scratch.clear();
                scratch.resize(data.len(), 0);
                handler.process(&mut scratch);
                for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                    *dst = src as f32 / i16::MAX as f32;
                }
            },
            on_error,
            None,
        ),
        (_, sample_format) => {
            return Err(DeviceError::ConfigurationNotSupported {
                reason: format!("Unsupported sample format: {sample_format:?}"),
            });
        }
    }
    .map_err(|e| DeviceError::StreamError {
        reason: format!("Failed to build {direction} stream: {e}"),
    })?;

    Ok(stream)
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

struct DrivenSlot {
    id: u64,
    handler: IoHandler,
    running: bool,
}

#[derive(Default)]
struct DrivenShared {
    slots: Mutex<[Option<DrivenSlot>; 2]>,
    unavailable: [AtomicBool; 2],
    next_id: AtomicU64,
}

/// Backend whose units are driven by the host calling [`DrivenAudioBackend::drive`].
///
/// Cloning yields another handle to the same units.
#[derive(Clone, Default)]
pub struct DrivenAudioBackend {
    shared: Arc<DrivenShared>,
}

impl DrivenAudioBackend {
    /// Both directions available, no units yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the device for `direction` as present or missing. Creating a
    /// unit for a missing device fails.
    pub fn set_available(&self, direction: AudioDirection, available: bool) {
        self.shared.unavailable[direction.index()].store(!available, Ordering::SeqCst);
    }

    /// Run one buffer through the started unit for `direction`.
    ///
    /// Returns `false` when no unit exists or it is not started; `buffer` is
    /// left untouched then.
    pub fn drive(&self, direction: AudioDirection, buffer: &mut [i16]) -> bool {
        let mut slots = self.shared.slots.lock();
        match slots[direction.index()].as_mut() {
            Some(slot) if slot.running => {
                slot.handler.process(buffer);
                true
            }
            _ => false,
        }
    }

    /// Whether a unit currently exists for `direction`
    pub fn has_unit(&self, direction: AudioDirection) -> bool {
        self.shared.slots.lock()[direction.index()].is_some()
    }

    /// Whether the unit for `direction` is started
    pub fn is_running(&self, direction: AudioDirection) -> bool {
        self.shared.slots.lock()[direction.index()]
            .as_ref()
            .is_some_and(|slot| slot.running)
    }
}

impl std::fmt::Debug for DrivenAudioBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrivenAudioBackend")
            .field("capture", &self.is_running(AudioDirection::Capture))
            .field("render", &self.is_running(AudioDirection::Render))
            .finish()
    }
}

impl AudioUnitBackend for DrivenAudioBackend {
    fn name(&self) -> &'static str {
        "driven"
    }

    fn is_available(&self, direction: AudioDirection) -> bool {
        !self.shared.unavailable[direction.index()].load(Ordering::SeqCst)
    }

    fn create_unit(&self, request: UnitRequest) -> Result<Box<dyn AudioUnit>, DeviceError> {
        let direction = request.direction;
        if !self.is_available(direction) {
            return Err(DeviceError::DeviceNotFound { direction });
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        self.shared.slots.lock()[direction.index()] = Some(DrivenSlot {
            id,
            handler: request.handler,
            running: false,
        });
        Ok(Box::new(DrivenAudioUnit {
            shared: self.shared.clone(),
            direction,
            id,
        }))
    }
}

struct DrivenAudioUnit {
    shared: Arc<DrivenShared>,
    direction: AudioDirection,
    id: u64,
}

impl DrivenAudioUnit {
    fn set_running(&self, running: bool) -> Result<(), DeviceError> {
        let mut slots = self.shared.slots.lock();
        match slots[self.direction.index()].as_mut() {
            Some(slot) if slot.id == self.id => {
                slot.running = running;
                Ok(())
            }
            _ => Err(DeviceError::StreamError {
                reason: format!("{} unit was replaced", self.direction),
            }),
        }
    }
}

impl AudioUnit for DrivenAudioUnit {
    fn start(&mut self) -> Result<(), DeviceError> {
        if !self.shared.unavailable[self.direction.index()].load(Ordering::SeqCst) {
            self.set_running(true)
        } else {
            Err(DeviceError::DeviceNotFound {
                direction: self.direction,
            })
        }
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.set_running(false)
    }

    fn direction(&self) -> AudioDirection {
        self.direction
    }
}

impl Drop for DrivenAudioUnit {
    fn drop(&mut self) {
        let mut slots = self.shared.slots.lock();
        let slot = &mut slots[self.direction.index()];
        if slot.as_ref().is_some_and(|s| s.id == self.id) {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fill(i16);

    impl AudioIoHandler for Fill {
        fn process(&mut self, buffer: &mut [i16]) {
            buffer.fill(self.0);
        }
    }

    fn request(direction: AudioDirection, value: i16) -> UnitRequest {
        UnitRequest {
            direction,
            format: StreamFormat::default(),
            handler: Box::new(Fill(value)),
            latency: Arc::new(UnitLatency::new()),
        }
    }

    #[test]
    fn test_driven_unit_lifecycle() {
        let backend = DrivenAudioBackend::new();
        let mut unit = backend.create_unit(request(AudioDirection::Render, 3)).unwrap();
        assert!(backend.has_unit(AudioDirection::Render));

        let mut buffer = [0i16; 4];
        assert!(!backend.drive(AudioDirection::Render, &mut buffer));

        unit.start().unwrap();
        assert!(backend.drive(AudioDirection::Render, &mut buffer));
        assert_eq!(buffer, [3; 4]);

        unit.stop().unwrap();
        assert!(!backend.is_running(AudioDirection::Render));
        drop(unit);
        assert!(!backend.has_unit(AudioDirection::Render));
    }

    #[test]
    fn test_unavailable_device_fails_creation() {
        let backend = DrivenAudioBackend::new();
        backend.set_available(AudioDirection::Capture, false);
        assert!(matches!(
            backend.create_unit(request(AudioDirection::Capture, 0)),
            Err(DeviceError::DeviceNotFound {
                direction: AudioDirection::Capture
            })
        ));
        assert!(backend.is_available(AudioDirection::Render));
    }

    #[test]
    fn test_stale_unit_does_not_remove_replacement() {
        let backend = DrivenAudioBackend::new();
        let old = backend.create_unit(request(AudioDirection::Capture, 1)).unwrap();
        let mut new = backend.create_unit(request(AudioDirection::Capture, 2)).unwrap();
        drop(old);
        assert!(backend.has_unit(AudioDirection::Capture));
        new.start().unwrap();

        let mut buffer = [0i16; 2];
        backend.drive(AudioDirection::Capture, &mut buffer);
        assert_eq!(buffer, [2, 2]);
    }

    #[tokio::test]
    async fn test_stream_reply_waits_inside_runtime() {
        let reply = Arc::new(Reply::default());
        let sender = reply.clone();
        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            sender.send(Ok(()));
        });
        assert_eq!(reply.wait(&thread), Ok(()));
        thread.join().unwrap();
    }

    #[test]
    fn test_stream_reply_fails_when_thread_exits() {
        let (commands, mut receiver) = mpsc::unbounded_channel::<StreamCommand>();
        let thread = std::thread::spawn(move || {
            // drops the command unanswered
            let _ = receiver.blocking_recv();
        });
        let reply = Arc::new(Reply::default());
        commands.send(StreamCommand::Play(reply.clone())).ok().unwrap();
        assert!(matches!(
            reply.wait(&thread),
            Err(DeviceError::StreamError { .. })
        ));
        thread.join().unwrap();
        assert!(commands.send(StreamCommand::Close).is_err());
    }

    #[test]
    fn test_f32_conversion_clamps() {
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(-1.0), -i16::MAX);
    }
}
