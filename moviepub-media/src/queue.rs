//! Pending file-audio samples
//!
//! The audio track worker produces decoded samples; the record callback
//! consumes them while mixing. The two ends share a wait-free SPSC ring. Each
//! end sits behind its own lock only so that successive workers and
//! successive audio units can pick it up; the real-time side only ever
//! `try_lock`s and treats contention as "nothing pending".

use moviepub_core::CancellationToken;
use parking_lot::{Mutex, MutexGuard};
use rtrb::{Consumer, Producer, RingBuffer};
use std::time::Duration;
use tracing::trace;

/// Default number of pending samples (about 340 ms at 48 kHz)
pub const DEFAULT_QUEUE_CAPACITY: usize = 8192 * 2;

/// How long a blocked producer waits before checking for room again
const BACKPRESSURE_POLL: Duration = Duration::from_millis(2);

/// Bounded FIFO of file-sourced samples waiting to be mixed
pub struct FileAudioQueue {
    producer: Mutex<Producer<i16>>,
    consumer: Mutex<Consumer<i16>>,
    capacity: usize,
}

impl FileAudioQueue {
    /// Create an empty queue holding up to `capacity` samples
    pub fn new(capacity: usize) -> Self {
        let (producer, consumer) = RingBuffer::new(capacity);
        Self {
            producer: Mutex::new(producer),
            consumer: Mutex::new(consumer),
            capacity,
        }
    }

    /// Maximum number of pending samples
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples currently pending.
    ///
    /// Reads the producer side, so it is exact only when no producer is
    /// writing concurrently.
    pub fn len(&self) -> usize {
        self.capacity - self.producer.lock().slots()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `samples`, waiting for room while the queue is full.
    ///
    /// Returns `false` if `token` was cancelled before everything was queued.
    pub fn push_blocking(&self, samples: &[i16], token: &CancellationToken) -> bool {
        let mut remaining = samples;
        while !remaining.is_empty() {
            if token.is_cancelled() {
                return false;
            }
            let written = self.push_available(remaining);
            remaining = &remaining[written..];
            if written == 0 {
                trace!(pending = self.capacity, "File audio queue full, waiting");
                if token.sleep(BACKPRESSURE_POLL) {
                    return false;
                }
            }
        }
        true
    }

    /// Append as many of `samples` as fit without waiting; returns how many were queued
    pub fn push_available(&self, samples: &[i16]) -> usize {
        let mut producer = self.producer.lock();
        let count = producer.slots().min(samples.len());
        if count == 0 {
            return 0;
        }
        match producer.write_chunk_uninit(count) {
            Ok(chunk) => chunk.fill_from_iter(samples[..count].iter().copied()),
            Err(_) => 0,
        }
    }

    /// Drop everything pending
    pub fn clear(&self) {
        let mut consumer = self.consumer.lock();
        let pending = consumer.slots();
        if let Ok(chunk) = consumer.read_chunk(pending) {
            chunk.commit_all();
        }
    }

    /// Non-blocking access to the consumer end for the real-time path
    pub(crate) fn try_consumer(&self) -> Option<MutexGuard<'_, Consumer<i16>>> {
        self.consumer.try_lock()
    }
}

impl Default for FileAudioQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl std::fmt::Debug for FileAudioQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileAudioQueue")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
