//! Sequential track reading
//!
//! A [`TrackReader`] wraps one decoder read session and yields frames lazily
//! in decode order. Reading stops for good as soon as the decoder leaves the
//! `Reading` state or runs out of samples; that is the normal end of a track,
//! not an error. Only opening the session can fail.

use crate::asset::{MediaAsset, OutputSettings, ReaderStatus, TrackOutput};
use crate::error::{MediaError, MediaResult};
use crate::tracks::MediaFrame;
use moviepub_core::{PlaybackClock, StreamKind};
use std::sync::Arc;
use tracing::{debug, warn};

/// A frame together with the timing the pacer needs
#[derive(Debug, Clone)]
pub struct TimedFrame {
    /// The decoded frame
    pub frame: MediaFrame,
    /// Time of the previous frame on this track in seconds, `None` for the first
    pub previous: Option<f64>,
    /// Time of this frame in seconds
    pub current: f64,
}

/// Forward-only reader over one track of an asset
pub struct TrackReader {
    kind: StreamKind,
    settings: OutputSettings,
    output: Box<dyn TrackOutput>,
    clock: Arc<PlaybackClock>,
    status: ReaderStatus,
    frames_read: u64,
}

impl TrackReader {
    /// Open a read session for the track selected by `settings`.
    ///
    /// Fails when the asset has no such track or the decoder refuses the
    /// requested layout.
    pub fn open(
        asset: &dyn MediaAsset,
        settings: OutputSettings,
        clock: Arc<PlaybackClock>,
    ) -> MediaResult<Self> {
        let kind = settings.kind();
        let output = asset.open_track(&settings).map_err(|e| match e {
            MediaError::TrackNotFound { .. } => e,
            other => MediaError::ReaderSetupFailed {
                kind,
                reason: other.to_string(),
            },
        })?;
        debug!(%kind, ?settings, "Opened track reader");
        Ok(Self {
            kind,
            settings,
            output,
            clock,
            status: ReaderStatus::Reading,
            frames_read: 0,
        })
    }

    /// Open the video track as NV12
    pub fn video(asset: &dyn MediaAsset, clock: Arc<PlaybackClock>) -> MediaResult<Self> {
        Self::open(asset, OutputSettings::nv12(), clock)
    }

    /// Open the audio track as mono 16-bit PCM at `sample_rate`
    pub fn audio(
        asset: &dyn MediaAsset,
        sample_rate: u32,
        clock: Arc<PlaybackClock>,
    ) -> MediaResult<Self> {
        Self::open(asset, OutputSettings::mono_pcm(sample_rate), clock)
    }

    /// Track kind being read
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Frames returned so far
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Whether the reader has reached the end of the track
    pub fn is_finished(&self) -> bool {
        self.status != ReaderStatus::Reading
    }

    /// `Reading` until the track ends, then why it ended
    pub fn status(&self) -> ReaderStatus {
        self.status
    }

    fn finish(&mut self, status: ReaderStatus) {
        if !self.is_finished() {
            self.status = status;
            debug!(
                kind = %self.kind,
                ?status,
                frames = self.frames_read,
                "Track reader finished"
            );
        }
    }
}

impl Iterator for TrackReader {
    type Item = TimedFrame;

    fn next(&mut self) -> Option<TimedFrame> {
        if self.is_finished() {
            return None;
        }

        let status = self.output.status();
        if status != ReaderStatus::Reading {
            self.finish(status);
            return None;
        }

        let Some(frame) = self.output.next_sample() else {
            self.finish(ReaderStatus::Completed);
            return None;
        };

        if !self.settings.matches(&frame) {
            warn!(
                kind = %self.kind,
                settings = ?self.settings,
                "Decoder returned a sample in an unexpected layout, stopping track"
            );
            self.finish(ReaderStatus::Failed);
            return None;
        }

        let timestamp = frame.timestamp();
        let previous = self.clock.advance(self.kind, timestamp);
        let current = timestamp.seconds().or(previous).unwrap_or(0.0);
        self.frames_read += 1;

        Some(TimedFrame {
            frame,
            previous,
            current,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::MemoryAsset;
    use crate::tracks::{AudioFrame, VideoFrame, VideoResolution};
    use bytes::Bytes;
    use moviepub_core::MediaTime;
    use std::time::Duration;

    struct FailingOutput {
        remaining: usize,
    }

    impl TrackOutput for FailingOutput {
        fn status(&self) -> ReaderStatus {
            if self.remaining == 0 {
                ReaderStatus::Failed
            } else {
                ReaderStatus::Reading
            }
        }

        fn next_sample(&mut self) -> Option<MediaFrame> {
            self.remaining -= 1;
            Some(MediaFrame::Audio(AudioFrame {
                samples: vec![0; 4],
                sample_rate: 48000,
                channels: 1,
                timestamp: MediaTime::new(self.remaining as i64, 100),
            }))
        }
    }

    struct FailingAsset;

    impl MediaAsset for FailingAsset {
        fn natural_size(&self) -> Option<VideoResolution> {
            None
        }

        fn open_track(&self, _settings: &OutputSettings) -> MediaResult<Box<dyn TrackOutput>> {
            Ok(Box::new(FailingOutput { remaining: 2 }))
        }
    }

    /// Decoder that opens in NV12 and then starts returning frames whose
    /// chroma plane is cut short
    struct TruncatingOutput {
        index: i64,
    }

    impl TrackOutput for TruncatingOutput {
        fn status(&self) -> ReaderStatus {
            ReaderStatus::Reading
        }

        fn next_sample(&mut self) -> Option<MediaFrame> {
            let chroma = if self.index < 2 { 32 } else { 8 };
            let frame = VideoFrame::nv12(
                8,
                8,
                Bytes::from(vec![16u8; 64]),
                Bytes::from(vec![128u8; chroma]),
                MediaTime::new(self.index, 25),
            );
            self.index += 1;
            Some(MediaFrame::Video(frame))
        }
    }

    struct TruncatingAsset;

    impl MediaAsset for TruncatingAsset {
        fn natural_size(&self) -> Option<VideoResolution> {
            Some(VideoResolution::new(8, 8))
        }

        fn open_track(&self, _settings: &OutputSettings) -> MediaResult<Box<dyn TrackOutput>> {
            Ok(Box::new(TruncatingOutput { index: 0 }))
        }
    }

    #[test]
    fn test_reads_until_end_of_stream() {
        let asset = MemoryAsset::synthetic(VideoResolution::new(8, 8), 25, 48000, Duration::from_millis(200));
        let clock = Arc::new(PlaybackClock::new());
        let mut reader = TrackReader::video(&asset, clock.clone()).unwrap();

        let first = reader.next().unwrap();
        assert_eq!(first.previous, None);
        assert_eq!(first.current, 0.0);

        let second = reader.next().unwrap();
        assert_eq!(second.previous, Some(0.0));
        assert!((second.current - 0.04).abs() < 1e-9);

        assert_eq!(reader.by_ref().count(), 3);
        assert!(reader.is_finished());
        assert_eq!(reader.status(), ReaderStatus::Completed);
        assert_eq!(reader.frames_read(), 5);
        assert!(reader.next().is_none());
        assert!((clock.last(StreamKind::Video).unwrap() - 0.16).abs() < 1e-9);
    }

    #[test]
    fn test_mid_stream_layout_change_stops_reader() {
        let clock = Arc::new(PlaybackClock::new());
        let mut reader = TrackReader::video(&TruncatingAsset, clock.clone()).unwrap();
        assert_eq!(reader.status(), ReaderStatus::Reading);

        let frames: Vec<_> = reader.by_ref().collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].previous, Some(0.0));
        assert!(reader.is_finished());
        assert_eq!(reader.status(), ReaderStatus::Failed);
        assert_eq!(reader.frames_read(), 2);
        assert!(reader.next().is_none());

        // the rejected frame never reaches the clock
        assert!((clock.last(StreamKind::Video).unwrap() - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_decoder_failure_ends_iteration() {
        let clock = Arc::new(PlaybackClock::new());
        let mut reader = TrackReader::audio(&FailingAsset, 48000, clock).unwrap();
        assert_eq!(reader.by_ref().count(), 2);
        assert_eq!(reader.status(), ReaderStatus::Failed);
    }

    #[test]
    fn test_open_failure_is_reported() {
        let asset = MemoryAsset::new();
        let clock = Arc::new(PlaybackClock::new());
        let result = TrackReader::audio(&asset, 48000, clock);
        assert!(matches!(result, Err(MediaError::TrackNotFound { .. })));
    }

    #[test]
    fn test_wrong_layout_stops_reader() {
        let asset = MemoryAsset::new().with_audio(vec![AudioFrame {
            samples: vec![0; 8],
            sample_rate: 48000,
            channels: 2,
            timestamp: MediaTime::ZERO,
        }]);
        let clock = Arc::new(PlaybackClock::new());
        // the in-memory asset refuses the layout at open time
        let result = TrackReader::audio(&asset, 48000, clock);
        assert!(matches!(
            result,
            Err(MediaError::ReaderSetupFailed {
                kind: StreamKind::Audio,
                ..
            })
        ));
    }
}
