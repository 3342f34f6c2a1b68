//! Microphone + file audio mixing
//!
//! Runs inside the record callback. Mixing is a saturating sample-wise add of
//! the pending file samples onto the captured buffer; samples past the end of
//! the pending audio pass through unchanged.

use crate::queue::FileAudioQueue;

/// Mix `file` onto `capture` into `out`.
///
/// `out[i] = capture[i] + file[i]` (saturating) for `i < file.len()`, and
/// `out[i] = capture[i]` beyond that.
///
/// # Panics
///
/// Panics if `out` and `capture` differ in length or `file` is longer than
/// `capture`.
pub fn mix_samples(capture: &[i16], file: &[i16], out: &mut [i16]) {
    assert_eq!(capture.len(), out.len(), "output must match capture length");
    assert!(file.len() <= capture.len(), "more file samples than capture samples");

    let (mixed, passthrough) = out.split_at_mut(file.len());
    for ((dst, &mic), &track) in mixed.iter_mut().zip(capture).zip(file) {
        *dst = mic.saturating_add(track);
    }
    passthrough.copy_from_slice(&capture[file.len()..]);
}

/// Result of one mixing pass
#[derive(Debug, PartialEq, Eq)]
pub struct MixOutcome<'a> {
    /// Buffer to forward to the capture bus
    pub samples: &'a [i16],
    /// File samples drained from the queue
    pub consumed: usize,
}

/// Mixer state owned by the record callback
#[derive(Debug, Default)]
pub struct AudioMixer {
    scratch: Vec<i16>,
}

impl AudioMixer {
    /// Create a mixer whose scratch buffer fits `frames` samples without reallocating
    pub fn with_capacity(frames: usize) -> Self {
        Self {
            scratch: Vec::with_capacity(frames),
        }
    }

    /// Mix up to `capture.len()` pending file samples onto `capture`.
    ///
    /// When nothing is pending, or the queue's consumer end is momentarily
    /// held elsewhere, `capture` is returned as-is without copying.
    pub fn mix<'a>(&'a mut self, capture: &'a [i16], queue: &FileAudioQueue) -> MixOutcome<'a> {
        let Some(mut consumer) = queue.try_consumer() else {
            return MixOutcome {
                samples: capture,
                consumed: 0,
            };
        };

        let count = consumer.slots().min(capture.len());
        if count == 0 {
            return MixOutcome {
                samples: capture,
                consumed: 0,
            };
        }

        let Ok(chunk) = consumer.read_chunk(count) else {
            return MixOutcome {
                samples: capture,
                consumed: 0,
            };
        };

        // grows only when the device hands us a larger buffer than before
        self.scratch.resize(capture.len(), 0);
        let out = &mut self.scratch[..];

        let (first, second) = chunk.as_slices();
        let split = first.len();
        mix_samples(&capture[..split], first, &mut out[..split]);
        mix_samples(&capture[split..], second, &mut out[split..]);
        chunk.commit_all();

        MixOutcome {
            samples: &self.scratch[..],
            consumed: count,
        }
    }
}
