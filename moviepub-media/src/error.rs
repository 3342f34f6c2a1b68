//! Media error types and handling
//!
//! This module defines the error types used by the track reader, the pacing
//! workers and the audio device layer, with a category and a recoverability
//! hint for each failure.

use crate::session::SessionError;
use moviepub_core::{MoviePubError, StreamKind};
use thiserror::Error;

/// Main error type for media operations
#[derive(Error, Debug)]
pub enum MediaError {
    /// I/O operation failed
    #[error("I/O error: {source}")]
    Io {
        /// Underlying error
        #[from]
        source: std::io::Error,
    },

    /// Invalid configuration provided
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// The asset has no track of the requested kind
    #[error("No {kind} track in asset")]
    TrackNotFound {
        /// Requested track kind
        kind: StreamKind,
    },

    /// A read session could not be opened on the asset
    #[error("Failed to open {kind} reader: {reason}")]
    ReaderSetupFailed {
        /// Track kind being opened
        kind: StreamKind,
        /// Failure reason
        reason: String,
    },

    /// Unsupported format error
    #[error("Unsupported format: {format}")]
    UnsupportedFormat {
        /// Format description
        format: String,
    },

    /// Audio unit creation or start failed
    #[error("Audio device error: {message}")]
    Device {
        /// Error message
        message: String,
    },

    /// Audio session configuration failed
    #[error("Audio session error: {message}")]
    Session {
        /// Error message
        message: String,
    },

    /// Invalid state for operation
    #[error("Invalid state: {message}")]
    InvalidState {
        /// State error message
        message: String,
    },

    /// A worker thread could not be spawned or panicked
    #[error("Worker error: {message}")]
    Worker {
        /// Error message
        message: String,
    },
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

impl MediaError {
    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            MediaError::Io { .. } => true,
            MediaError::Device { .. } => true,
            MediaError::Session { .. } => true,
            MediaError::Worker { .. } => true,
            MediaError::TrackNotFound { .. } => false,
            MediaError::ReaderSetupFailed { .. } => false,
            MediaError::UnsupportedFormat { .. } => false,
            _ => false,
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            MediaError::Io { .. } => ErrorCategory::System,
            MediaError::InvalidConfiguration { .. } => ErrorCategory::Configuration,
            MediaError::TrackNotFound { .. } => ErrorCategory::Setup,
            MediaError::ReaderSetupFailed { .. } => ErrorCategory::Setup,
            MediaError::UnsupportedFormat { .. } => ErrorCategory::Format,
            MediaError::Device { .. } => ErrorCategory::Device,
            MediaError::Session { .. } => ErrorCategory::Device,
            MediaError::InvalidState { .. } => ErrorCategory::State,
            MediaError::Worker { .. } => ErrorCategory::System,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// System-level errors (I/O, threads)
    System,
    /// Configuration and parameter errors
    Configuration,
    /// Asset or track could not be opened
    Setup,
    /// Format and data layout errors
    Format,
    /// Audio device and session errors
    Device,
    /// State management errors
    State,
}

impl From<SessionError> for MediaError {
    fn from(err: SessionError) -> Self {
        MediaError::Session {
            message: err.to_string(),
        }
    }
}

impl From<MediaError> for MoviePubError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::InvalidConfiguration { message } => MoviePubError::Configuration {
                field: "media".to_string(),
                reason: message,
            },
            MediaError::Device { message } | MediaError::Session { message } => {
                MoviePubError::AudioDevice {
                    reason: message,
                    recoverable: true,
                }
            }
            other => MoviePubError::MediaProcessing {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let io_error = MediaError::Io {
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        };
        assert_eq!(io_error.category(), ErrorCategory::System);
        assert!(io_error.is_recoverable());

        let setup_error = MediaError::TrackNotFound {
            kind: StreamKind::Audio,
        };
        assert_eq!(setup_error.category(), ErrorCategory::Setup);
        assert!(!setup_error.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let error = MediaError::ReaderSetupFailed {
            kind: StreamKind::Audio,
            reason: "decoder refused 8 kHz".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to open audio reader: decoder refused 8 kHz"
        );
        assert_eq!(
            MediaError::TrackNotFound {
                kind: StreamKind::Video
            }
            .to_string(),
            "No video track in asset"
        );
    }

    #[test]
    fn test_conversion_to_top_level_error() {
        let err: MoviePubError = MediaError::Device {
            message: "no input device".to_string(),
        }
        .into();
        assert_eq!(err.error_code(), "AUDIO_DEVICE_ERROR");
        assert!(err.is_recoverable());

        let err: MoviePubError = MediaError::ReaderSetupFailed {
            kind: StreamKind::Video,
            reason: "corrupt".to_string(),
        }
        .into();
        assert_eq!(err.error_code(), "MEDIA_PROCESSING_ERROR");
    }

    #[test]
    fn test_session_rejection_is_a_device_error() {
        let err = MediaError::from(SessionError::Rejected {
            property: "category",
            reason: "busy".to_string(),
        });
        assert!(matches!(err, MediaError::Session { .. }));
        assert_eq!(err.category(), ErrorCategory::Device);
        assert!(err.is_recoverable());

        let err: MoviePubError = err.into();
        assert_eq!(err.error_code(), "AUDIO_DEVICE_ERROR");
        assert!(err.to_string().contains("Session rejected category"));
    }
}
