//! Background watcher turning device and worker state into publisher events

use crate::event::{Event, EventPublisher};
use moviepub_core::{CancellationToken, StreamKind};
use moviepub_media::{AudioDeviceManager, DeviceEvent, VideoCapturer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::Receiver;
use tracing::{debug, warn};

/// Video state shared between the publisher, the capturer observer and the
/// monitor
#[derive(Debug, Default)]
pub(crate) struct VideoFlags {
    expected: AtomicBool,
    failed: AtomicBool,
}

impl VideoFlags {
    pub fn arm(&self) {
        self.failed.store(false, Ordering::SeqCst);
        self.expected.store(true, Ordering::SeqCst);
    }

    pub fn disarm(&self) {
        self.expected.store(false, Ordering::SeqCst);
    }

    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    /// A worker that stops on its own while expected has reached the end of
    /// the track, unless it failed to open it
    fn finished_naturally(&self) -> bool {
        self.expected.load(Ordering::SeqCst) && !self.failed.load(Ordering::SeqCst)
    }
}

pub(crate) struct MonitorContext {
    pub manager: Arc<AudioDeviceManager>,
    pub capturer: Arc<VideoCapturer>,
    pub device_events: Receiver<DeviceEvent>,
    pub events: EventPublisher,
    pub video: Arc<VideoFlags>,
    pub interval: Duration,
}

impl MonitorContext {
    fn run(mut self, token: CancellationToken) {
        let mut delays = (0u16, 0u16);
        let mut video_running = false;

        loop {
            self.forward_device_events();

            let current = (
                self.manager.estimated_capture_delay(),
                self.manager.estimated_render_delay(),
            );
            if current != delays {
                delays = current;
                self.events.publish(Event::DelayUpdated {
                    capture_ms: current.0,
                    render_ms: current.1,
                });
            }

            // read the worker before the flags: a stop clears the flags first
            let running = self.capturer.is_capture_started();
            if video_running && !running && self.video.finished_naturally() {
                self.events.publish(Event::TrackFinished {
                    kind: StreamKind::Video,
                });
            }
            video_running = running;

            if token.sleep(self.interval) {
                break;
            }
        }

        self.forward_device_events();
        debug!("Publisher monitor stopped");
    }

    fn forward_device_events(&mut self) {
        loop {
            match self.device_events.try_recv() {
                Ok(event) => self.events.publish(event.into()),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Publisher monitor fell behind device events");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }
}

/// Handle to the monitor thread. Dropping it stops the thread.
pub(crate) struct Monitor {
    token: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl Monitor {
    pub fn spawn(context: MonitorContext) -> std::io::Result<Self> {
        let token = CancellationToken::new();
        let worker_token = token.clone();
        let thread = std::thread::Builder::new()
            .name("publisher-monitor".to_string())
            .spawn(move || context.run(worker_token))?;
        Ok(Self {
            token,
            thread: Some(thread),
        })
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Publisher monitor panicked");
            }
        }
    }
}
