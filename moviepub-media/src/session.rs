//! Audio session model
//!
//! Models the process-wide audio session a mobile host exposes (category,
//! mode, preferred hardware parameters, routes and latency reporting) and the
//! notifications it emits. [`HostAudioSession`] is the in-process
//! implementation used on hosts without a system session.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Errors reported when the session rejects a configuration change
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// The session refused the requested value
    #[error("Session rejected {property}: {reason}")]
    Rejected {
        /// Property being set
        property: &'static str,
        /// Reason given by the session
        reason: String,
    },

    /// The requested port is not available
    #[error("Port not available: {port}")]
    PortUnavailable {
        /// Port name
        port: String,
    },
}

/// Session category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionCategory {
    /// Mixes with other audio, silenced by the ring switch
    Ambient,
    /// Like `Ambient` but interrupts other audio
    SoloAmbient,
    /// Output only
    Playback,
    /// Input only
    Record,
    /// Simultaneous input and output, needed while publishing
    PlayAndRecord,
    /// Several routes at once
    MultiRoute,
}

/// Session mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionMode {
    /// No mode-specific processing
    Default,
    /// Two-way voice, voice processing on
    VoiceChat,
    /// Two-way video call, the mode used while publishing
    VideoChat,
    /// In-game chat
    GameChat,
    /// Recording video
    VideoRecording,
    /// Minimal signal processing
    Measurement,
    /// Movie playback
    MoviePlayback,
    /// Spoken content such as podcasts
    SpokenAudio,
}

/// Category options applied together with a category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryOptions {
    /// Mix with audio from other applications
    pub mix_with_others: bool,
    /// Allow Bluetooth hands-free devices
    pub allow_bluetooth: bool,
    /// Route output to the speaker rather than the receiver
    pub default_to_speaker: bool,
}

/// Parameters saved before the session is claimed and restored afterwards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionParameters {
    /// Category
    pub category: SessionCategory,
    /// Mode
    pub mode: SessionMode,
    /// Preferred hardware sample rate in Hz
    pub preferred_sample_rate: f64,
    /// Input channel count
    pub input_channels: u32,
}

impl Default for SessionParameters {
    fn default() -> Self {
        Self {
            category: SessionCategory::SoloAmbient,
            mode: SessionMode::Default,
            preferred_sample_rate: 0.0,
            input_channels: 1,
        }
    }
}

/// Kind of audio port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortType {
    /// Built-in microphone
    BuiltInMic,
    /// Earpiece receiver
    BuiltInReceiver,
    /// Built-in loudspeaker
    BuiltInSpeaker,
    /// Wired headset microphone
    HeadsetMic,
    /// Wired headphones
    Headphones,
    /// Bluetooth stereo output
    BluetoothA2dp,
    /// Bluetooth Low Energy audio
    BluetoothLe,
    /// Bluetooth hands-free, input and output
    BluetoothHfp,
    /// USB audio interface
    UsbAudio,
    /// Analog line input
    LineIn,
    /// Analog line output
    LineOut,
    /// Anything else
    Other,
}

impl PortType {
    /// Whether this is one of the Bluetooth port kinds
    pub fn is_bluetooth(&self) -> bool {
        matches!(
            self,
            PortType::BluetoothA2dp | PortType::BluetoothLe | PortType::BluetoothHfp
        )
    }
}

/// One input or output port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescription {
    /// Human-readable port name
    pub name: String,
    /// Port kind
    pub port_type: PortType,
}

impl PortDescription {
    /// Port called `name`
    pub fn new(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            name: name.into(),
            port_type,
        }
    }
}

/// Active inputs and outputs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDescription {
    /// Active input ports
    pub inputs: Vec<PortDescription>,
    /// Active output ports, the first one names the route
    pub outputs: Vec<PortDescription>,
}

impl RouteDescription {
    /// Name of the first output port, if any
    pub fn output_name(&self) -> Option<&str> {
        self.outputs.first().map(|port| port.name.as_str())
    }
}

/// Output port override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortOverride {
    /// Follow the category's default route
    None,
    /// Force output to the built-in speaker
    Speaker,
}

/// Route the device manager asks for after an interruption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioRoute {
    /// Prefer a Bluetooth input, no output override
    Bluetooth,
    /// Force output to the speaker
    Speaker,
    /// Wired headset, no override
    Headset,
}

/// Why the route changed
///
/// Only `CategoryChange` and `Override` can restart the units; the others
/// are left to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteChangeReason {
    /// No reason given
    Unknown,
    /// A device was plugged in
    NewDeviceAvailable,
    /// A device went away
    OldDeviceUnavailable,
    /// The category changed
    CategoryChange,
    /// The output port override changed
    Override,
    /// The device woke from sleep
    WakeFromSleep,
    /// The category has nowhere to route to
    NoSuitableRouteForCategory,
    /// The set of inputs or outputs was reconfigured
    RouteConfigurationChange,
}

/// Interruption phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterruptionType {
    /// The hardware was taken away
    Began,
    /// The hardware is available again
    Ended,
}

/// Notifications delivered by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// Another client took or released the audio hardware
    Interruption(InterruptionType),
    /// The active route changed
    RouteChange {
        /// Why it changed
        reason: RouteChangeReason,
        /// Route before the change
        previous_route: RouteDescription,
    },
    /// The host application returned to the foreground
    BecameActive,
}

impl SessionEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::Interruption(InterruptionType::Began) => "interruption_began",
            SessionEvent::Interruption(InterruptionType::Ended) => "interruption_ended",
            SessionEvent::RouteChange { .. } => "route_change",
            SessionEvent::BecameActive => "became_active",
        }
    }
}

/// The host's audio session
pub trait AudioSession: Send + Sync {
    /// Snapshot of the parameters that are saved and restored
    fn parameters(&self) -> SessionParameters;

    /// Set category, mode and options together
    fn set_category(
        &self,
        category: SessionCategory,
        mode: SessionMode,
        options: CategoryOptions,
    ) -> Result<(), SessionError>;

    /// Change the mode, keeping the category
    fn set_mode(&self, mode: SessionMode) -> Result<(), SessionError>;

    /// Preferred hardware sample rate in Hz
    fn set_preferred_sample_rate(&self, rate: f64) -> Result<(), SessionError>;

    /// Preferred length of one hardware buffer
    fn set_preferred_io_buffer_duration(&self, duration: Duration) -> Result<(), SessionError>;

    /// Preferred number of input channels
    fn set_preferred_input_channels(&self, channels: u32) -> Result<(), SessionError>;

    /// Claim or release the audio hardware
    fn set_active(&self, active: bool) -> Result<(), SessionError>;

    /// Inputs the session could switch to
    fn available_inputs(&self) -> Vec<PortDescription>;

    /// Fails with [`SessionError::PortUnavailable`] for ports not in
    /// [`AudioSession::available_inputs`]
    fn set_preferred_input(&self, port: &PortDescription) -> Result<(), SessionError>;

    /// Override the category's output routing
    fn override_output_port(&self, port_override: PortOverride) -> Result<(), SessionError>;

    /// Route currently in use
    fn current_route(&self) -> RouteDescription;

    /// Hardware input latency
    fn input_latency(&self) -> Duration;

    /// Hardware output latency
    fn output_latency(&self) -> Duration;

    /// Current I/O buffer duration
    fn io_buffer_duration(&self) -> Duration;
}

#[derive(Debug)]
struct HostSessionState {
    parameters: SessionParameters,
    options: CategoryOptions,
    active: bool,
    available_inputs: Vec<PortDescription>,
    preferred_input: Option<PortDescription>,
    port_override: PortOverride,
    route: RouteDescription,
}

/// In-process audio session.
///
/// Stores whatever it is told and reports latencies published by the audio
/// backend. Latency reads are lock-free so the real-time callback can query
/// them.
#[derive(Debug)]
pub struct HostAudioSession {
    state: RwLock<HostSessionState>,
    input_latency_us: AtomicU64,
    output_latency_us: AtomicU64,
    io_buffer_us: AtomicU64,
}

impl HostAudioSession {
    /// Session with default parameters and a built-in mic/speaker route
    pub fn new() -> Self {
        Self::with_parameters(SessionParameters::default())
    }

    /// Session starting from `parameters`
    pub fn with_parameters(parameters: SessionParameters) -> Self {
        let mic = PortDescription::new("Microphone", PortType::BuiltInMic);
        let speaker = PortDescription::new("Speaker", PortType::BuiltInSpeaker);
        Self {
            state: RwLock::new(HostSessionState {
                parameters,
                options: CategoryOptions::default(),
                active: false,
                available_inputs: vec![mic.clone()],
                preferred_input: None,
                port_override: PortOverride::None,
                route: RouteDescription {
                    inputs: vec![mic],
                    outputs: vec![speaker],
                },
            }),
            input_latency_us: AtomicU64::new(0),
            output_latency_us: AtomicU64::new(0),
            io_buffer_us: AtomicU64::new(0),
        }
    }

    /// Whether the session is active
    pub fn is_active(&self) -> bool {
        self.state.read().active
    }

    /// Options set with the current category
    pub fn category_options(&self) -> CategoryOptions {
        self.state.read().options
    }

    /// Input chosen through [`AudioSession::set_preferred_input`]
    pub fn preferred_input(&self) -> Option<PortDescription> {
        self.state.read().preferred_input.clone()
    }

    /// Current output override
    pub fn port_override(&self) -> PortOverride {
        self.state.read().port_override
    }

    /// Replace the active route, as a host would after a device change
    pub fn set_route(&self, route: RouteDescription) {
        self.state.write().route = route;
    }

    /// Replace the list of selectable inputs
    pub fn set_available_inputs(&self, inputs: Vec<PortDescription>) {
        self.state.write().available_inputs = inputs;
    }

    /// Publish a measured input latency
    pub fn report_input_latency(&self, latency: Duration) {
        self.input_latency_us
            .store(latency.as_micros() as u64, Ordering::Relaxed);
    }

    /// Publish a measured output latency
    pub fn report_output_latency(&self, latency: Duration) {
        self.output_latency_us
            .store(latency.as_micros() as u64, Ordering::Relaxed);
    }
}

impl Default for HostAudioSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSession for HostAudioSession {
    fn parameters(&self) -> SessionParameters {
        self.state.read().parameters.clone()
    }

    fn set_category(
        &self,
        category: SessionCategory,
        mode: SessionMode,
        options: CategoryOptions,
    ) -> Result<(), SessionError> {
        let mut state = self.state.write();
        state.parameters.category = category;
        state.parameters.mode = mode;
        state.options = options;
        Ok(())
    }

    fn set_mode(&self, mode: SessionMode) -> Result<(), SessionError> {
        self.state.write().parameters.mode = mode;
        Ok(())
    }

    fn set_preferred_sample_rate(&self, rate: f64) -> Result<(), SessionError> {
        if !(rate >= 0.0 && rate.is_finite()) {
            return Err(SessionError::Rejected {
                property: "preferred sample rate",
                reason: format!("{rate} is not a valid rate"),
            });
        }
        self.state.write().parameters.preferred_sample_rate = rate;
        Ok(())
    }

    fn set_preferred_io_buffer_duration(&self, duration: Duration) -> Result<(), SessionError> {
        self.io_buffer_us
            .store(duration.as_micros() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn set_preferred_input_channels(&self, channels: u32) -> Result<(), SessionError> {
        if channels == 0 {
            return Err(SessionError::Rejected {
                property: "input channels",
                reason: "at least one channel is required".to_string(),
            });
        }
        self.state.write().parameters.input_channels = channels;
        Ok(())
    }

    fn set_active(&self, active: bool) -> Result<(), SessionError> {
        self.state.write().active = active;
        Ok(())
    }

    fn available_inputs(&self) -> Vec<PortDescription> {
        self.state.read().available_inputs.clone()
    }

    fn set_preferred_input(&self, port: &PortDescription) -> Result<(), SessionError> {
        let mut state = self.state.write();
        if !state.available_inputs.contains(port) {
            return Err(SessionError::PortUnavailable {
                port: port.name.clone(),
            });
        }
        state.preferred_input = Some(port.clone());
        state.route.inputs = vec![port.clone()];
        Ok(())
    }

    fn override_output_port(&self, port_override: PortOverride) -> Result<(), SessionError> {
        self.state.write().port_override = port_override;
        Ok(())
    }

    fn current_route(&self) -> RouteDescription {
        self.state.read().route.clone()
    }

    fn input_latency(&self) -> Duration {
        Duration::from_micros(self.input_latency_us.load(Ordering::Relaxed))
    }

    fn output_latency(&self) -> Duration {
        Duration::from_micros(self.output_latency_us.load(Ordering::Relaxed))
    }

    fn io_buffer_duration(&self) -> Duration {
        Duration::from_micros(self.io_buffer_us.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_session_stores_parameters() {
        let session = HostAudioSession::new();
        session
            .set_category(
                SessionCategory::PlayAndRecord,
                SessionMode::VideoChat,
                CategoryOptions {
                    mix_with_others: true,
                    ..Default::default()
                },
            )
            .unwrap();
        session.set_preferred_sample_rate(48000.0).unwrap();

        let params = session.parameters();
        assert_eq!(params.category, SessionCategory::PlayAndRecord);
        assert_eq!(params.mode, SessionMode::VideoChat);
        assert_eq!(params.preferred_sample_rate, 48000.0);
        assert!(session.category_options().mix_with_others);
    }

    #[test]
    fn test_preferred_input_must_be_available() {
        let session = HostAudioSession::new();
        let headset = PortDescription::new("AirPods", PortType::BluetoothHfp);
        assert!(matches!(
            session.set_preferred_input(&headset),
            Err(SessionError::PortUnavailable { .. })
        ));

        session.set_available_inputs(vec![headset.clone()]);
        session.set_preferred_input(&headset).unwrap();
        assert_eq!(session.preferred_input(), Some(headset.clone()));
        assert_eq!(session.current_route().inputs, vec![headset]);
    }

    #[test]
    fn test_latency_reporting() {
        let session = HostAudioSession::new();
        session.report_input_latency(Duration::from_micros(2500));
        session
            .set_preferred_io_buffer_duration(Duration::from_millis(10))
            .unwrap();
        assert_eq!(session.input_latency(), Duration::from_micros(2500));
        assert_eq!(session.io_buffer_duration(), Duration::from_millis(10));
        assert_eq!(session.output_latency(), Duration::ZERO);
    }

    #[test]
    fn test_route_output_name() {
        let route = RouteDescription::default();
        assert_eq!(route.output_name(), None);
        assert_eq!(
            HostAudioSession::new().current_route().output_name(),
            Some("Speaker")
        );
        assert!(PortType::BluetoothLe.is_bluetooth());
        assert!(!PortType::Headphones.is_bluetooth());
    }
}
