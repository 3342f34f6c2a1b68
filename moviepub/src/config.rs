//! Publisher configuration
//!
//! Every top-level field has a default, so a JSON file only needs the values
//! it changes. Pacing sections are replaced whole:
//!
//! ```json
//! { "looping": false, "sample_rate": 44100 }
//! ```

use moviepub_core::{MoviePubError, PacingConfig};
use moviepub_media::{
    AudioDeviceConfig, AudioRoute, PacerConfig, StreamFormat, DEFAULT_QUEUE_CAPACITY,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Highest sample rate the units are asked to run at
const MAX_SAMPLE_RATE: u32 = 192_000;

/// Configuration of a [`crate::MoviePublisher`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Sample rate of the audio units and of the decoded file audio
    pub sample_rate: u32,
    /// Channel count of the audio units
    pub channels: u16,
    /// File samples buffered ahead of the record callback
    pub queue_capacity: usize,
    /// I/O buffer duration requested from the audio session
    pub io_buffer_duration: Duration,
    /// Video track pacing
    pub video: PacingConfig,
    /// Audio track pacing
    pub audio: PacingConfig,
    /// Play the movie again when it ends
    pub looping: bool,
    /// Also run the playout unit while publishing
    pub enable_playout: bool,
    /// Route applied to the session before starting
    pub route: AudioRoute,
    /// How often the publisher polls delays and worker state
    pub monitor_interval: Duration,
    /// `EnvFilter` directive used by [`crate::init_logging`]
    pub log_filter: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            io_buffer_duration: Duration::from_millis(10),
            video: PacingConfig::video(),
            audio: PacingConfig::audio(),
            looping: true,
            enable_playout: true,
            route: AudioRoute::Speaker,
            monitor_interval: Duration::from_millis(100),
            log_filter: "info".to_string(),
        }
    }
}

impl PublisherConfig {
    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self, MoviePubError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| MoviePubError::configuration("json", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MoviePubError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| MoviePubError::Initialization {
            reason: format!("Failed to read {}: {}", path.display(), e),
        })?;
        Self::from_json(&json)
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json(&self) -> Result<String, MoviePubError> {
        serde_json::to_string_pretty(self).map_err(|e| MoviePubError::configuration("json", e.to_string()))
    }

    /// Check that the values can drive the device and the pacers
    pub fn validate(&self) -> Result<(), MoviePubError> {
        if self.sample_rate == 0 || self.sample_rate > MAX_SAMPLE_RATE {
            return Err(MoviePubError::configuration(
                "sample_rate",
                format!("must be between 1 and {} Hz", MAX_SAMPLE_RATE),
            ));
        }
        if self.channels != 1 {
            return Err(MoviePubError::configuration("channels", "only mono is supported"));
        }
        if self.queue_capacity == 0 {
            return Err(MoviePubError::configuration("queue_capacity", "must be positive"));
        }
        if self.io_buffer_duration.is_zero() {
            return Err(MoviePubError::configuration("io_buffer_duration", "must be positive"));
        }
        if self.monitor_interval.is_zero() {
            return Err(MoviePubError::configuration("monitor_interval", "must be positive"));
        }
        validate_pacing("video", &self.video)?;
        validate_pacing("audio", &self.audio)?;
        Ok(())
    }

    /// Pacing settings shared by both workers
    pub fn pacer_config(&self) -> PacerConfig {
        PacerConfig {
            video: self.video.clone(),
            audio: self.audio.clone(),
            looping: self.looping,
            sample_rate: self.sample_rate,
        }
    }

    /// Settings of the audio device manager
    pub fn device_config(&self) -> AudioDeviceConfig {
        AudioDeviceConfig {
            format: StreamFormat {
                sample_rate: self.sample_rate,
                channels: self.channels,
            },
            queue_capacity: self.queue_capacity,
            io_buffer_duration: self.io_buffer_duration,
            pacer: self.pacer_config(),
        }
    }
}

fn validate_pacing(track: &str, pacing: &PacingConfig) -> Result<(), MoviePubError> {
    let limit = Duration::from_secs(1);
    if pacing.margin >= limit {
        return Err(MoviePubError::configuration(
            format!("{}.margin", track),
            "must be below one second",
        ));
    }
    if pacing.drift_tolerance >= limit {
        return Err(MoviePubError::configuration(
            format!("{}.drift_tolerance", track),
            "must be below one second",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PublisherConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.video.margin, Duration::from_millis(25));
        assert_eq!(config.audio.margin, Duration::from_millis(5));
        assert!(config.looping);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = PublisherConfig::from_json(r#"{ "looping": false, "sample_rate": 44100 }"#).unwrap();
        assert!(!config.looping);
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.pacer_config().sample_rate, 44100);
        assert_eq!(config.device_config().format.sample_rate, 44100);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = PublisherConfig::from_json(r#"{ "channels": 2 }"#).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIGURATION");

        let mut config = PublisherConfig::default();
        config.video.margin = Duration::from_secs(2);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("video.margin"));

        let config = PublisherConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_json_rejected() {
        let err = PublisherConfig::from_json("{ looping: ").unwrap_err();
        assert!(matches!(err, MoviePubError::Configuration { .. }));
    }

    #[test]
    fn test_json_roundtrip_preserves_route() {
        let config = PublisherConfig {
            route: AudioRoute::Bluetooth,
            ..Default::default()
        };
        let parsed = PublisherConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }
}
