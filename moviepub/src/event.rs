//! Publisher events

use chrono::{DateTime, Utc};
use moviepub_core::StreamKind;
use moviepub_media::DeviceEvent;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Buffered events per subscriber before the oldest are dropped
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// Publishing started
    CaptureStarted {
        /// Whether the video capturer is running
        video: bool,
        /// Whether the capture unit is running
        audio: bool,
    },
    /// Publishing stopped
    CaptureStopped,
    /// A track reached its end without looping
    TrackFinished {
        /// Track that ended
        kind: StreamKind,
    },
    /// A track could not be opened
    TrackFailed {
        /// Track that failed
        kind: StreamKind,
        /// Failure reason
        reason: String,
    },
    /// The device manager reacted to an interruption or a route change
    SessionEventHandled {
        /// Outcome reported by the device manager
        event: DeviceEvent,
    },
    /// A unit started, stopped or was torn down
    AudioDevice {
        /// Lifecycle change
        event: DeviceEvent,
    },
    /// The estimated hardware delays changed
    DelayUpdated {
        /// Capture delay in milliseconds
        capture_ms: u16,
        /// Render delay in milliseconds
        render_ms: u16,
    },
}

impl Event {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::CaptureStarted { .. } => "capture_started",
            Event::CaptureStopped => "capture_stopped",
            Event::TrackFinished { .. } => "track_finished",
            Event::TrackFailed { .. } => "track_failed",
            Event::SessionEventHandled { .. } => "session_event_handled",
            Event::AudioDevice { .. } => "audio_device",
            Event::DelayUpdated { .. } => "delay_updated",
        }
    }
}

impl From<DeviceEvent> for Event {
    fn from(event: DeviceEvent) -> Self {
        match event {
            DeviceEvent::FeedFailed { reason } => Event::TrackFailed {
                kind: StreamKind::Audio,
                reason,
            },
            DeviceEvent::Interrupted { .. }
            | DeviceEvent::Resumed(_)
            | DeviceEvent::RecoveryFailed { .. }
            | DeviceEvent::RouteRestarted { .. } => Event::SessionEventHandled { event },
            DeviceEvent::Started(_) | DeviceEvent::Stopped(_) | DeviceEvent::TornDown => {
                Event::AudioDevice { event }
            }
        }
    }
}

/// A timestamped [`Event`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherEvent {
    /// When the event was published
    pub timestamp: DateTime<Utc>,
    /// The event itself
    pub event: Event,
}

impl PublisherEvent {
    /// Stamp an event with the current time
    pub fn now(event: Event) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }
}

/// Sending side of the publisher's event channel
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublisherEvent>,
}

impl EventPublisher {
    /// Create a channel with no subscribers
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: Event) {
        debug!(event = event.event_type(), "Publisher event");
        let _ = self.sender.send(PublisherEvent::now(event));
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PublisherEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moviepub_media::AudioDirection;

    #[test]
    fn test_device_events_are_classified() {
        let failed: Event = DeviceEvent::FeedFailed {
            reason: "no audio".to_string(),
        }
        .into();
        assert_eq!(
            failed,
            Event::TrackFailed {
                kind: StreamKind::Audio,
                reason: "no audio".to_string()
            }
        );

        let resumed: Event = DeviceEvent::Resumed(AudioDirection::Capture).into();
        assert_eq!(resumed.event_type(), "session_event_handled");

        let torn_down: Event = DeviceEvent::TornDown.into();
        assert_eq!(torn_down.event_type(), "audio_device");
    }

    #[test]
    fn test_publish_reaches_subscribers() {
        let events = EventPublisher::new();
        events.publish(Event::CaptureStopped);

        let mut receiver = events.subscribe();
        let before = Utc::now();
        events.publish(Event::DelayUpdated {
            capture_ms: 12,
            render_ms: 30,
        });

        let received = receiver.try_recv().unwrap();
        assert_eq!(received.event_type(), "delay_updated");
        assert!(received.timestamp >= before);
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_event_serializes_with_timestamp() {
        let event = PublisherEvent::now(Event::TrackFinished {
            kind: StreamKind::Video,
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("TrackFinished"));
        assert!(json.contains("timestamp"));
    }
}
