//! Error types for movie publishing

use thiserror::Error;

/// Main error type for movie publishing operations
#[derive(Error, Debug)]
pub enum MoviePubError {
    /// Initialization error
    #[error("Initialization failed: {reason}")]
    Initialization {
        /// Reason for initialization failure
        reason: String,
    },

    /// Invalid or inconsistent configuration
    #[error("Invalid configuration: {field} - {reason}")]
    Configuration {
        /// Offending configuration field
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Media processing error
    #[error("Media processing error: {reason}")]
    MediaProcessing {
        /// Reason for media error
        reason: String,
    },

    /// Audio device error
    #[error("Audio device error: {reason}")]
    AudioDevice {
        /// Reason for the device failure
        reason: String,
        /// Whether the caller may retry
        recoverable: bool,
    },
}

impl MoviePubError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> &'static str {
        match self {
            MoviePubError::Initialization { .. } => "INITIALIZATION_FAILED",
            MoviePubError::Configuration { .. } => "INVALID_CONFIGURATION",
            MoviePubError::MediaProcessing { .. } => "MEDIA_PROCESSING_ERROR",
            MoviePubError::AudioDevice { .. } => "AUDIO_DEVICE_ERROR",
        }
    }

    /// Whether retrying the failed operation can succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            MoviePubError::AudioDevice { recoverable, .. } => *recoverable,
            _ => false,
        }
    }

    /// Shorthand for a configuration error
    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        MoviePubError::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = MoviePubError::configuration("video.margin", "negative");
        assert_eq!(err.error_code(), "INVALID_CONFIGURATION");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: video.margin - negative"
        );

        let err = MoviePubError::AudioDevice {
            reason: "unit start failed".to_string(),
            recoverable: true,
        };
        assert!(err.is_recoverable());
        assert!(!MoviePubError::MediaProcessing {
            reason: "no video track".to_string()
        }
        .is_recoverable());
        assert!(!MoviePubError::AudioDevice {
            reason: "permission denied".to_string(),
            recoverable: false,
        }
        .is_recoverable());
    }
}
