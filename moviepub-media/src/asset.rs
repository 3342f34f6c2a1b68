//! Media asset abstraction
//!
//! The container decoder lives outside this crate. It is consumed through
//! [`MediaAsset`], which opens one forward-only [`TrackOutput`] per track with
//! the output layout the reader asks for.

use crate::error::{MediaError, MediaResult};
use crate::tracks::{AudioFrame, MediaFrame, VideoFrame, VideoPixelFormat, VideoResolution};
use bytes::Bytes;
use moviepub_core::{MediaTime, StreamKind};
use std::collections::VecDeque;
use std::sync::Arc;

/// Decoder read status, mirroring a platform asset reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderStatus {
    /// More samples may follow
    Reading,
    /// Every sample has been returned
    Completed,
    /// The decoder hit an error
    Failed,
    /// Reading was cancelled
    Cancelled,
}

/// Output layout requested from the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSettings {
    /// Decoded images in the given pixel format
    Video {
        /// Target pixel layout
        pixel_format: VideoPixelFormat,
    },
    /// Linear PCM, signed 16-bit, interleaved
    Audio {
        /// Target sample rate in Hz
        sample_rate: u32,
        /// Target channel count
        channels: u16,
    },
}

impl OutputSettings {
    /// NV12 video
    pub fn nv12() -> Self {
        OutputSettings::Video {
            pixel_format: VideoPixelFormat::Nv12,
        }
    }

    /// Mono 16-bit PCM at `sample_rate`
    pub fn mono_pcm(sample_rate: u32) -> Self {
        OutputSettings::Audio {
            sample_rate,
            channels: 1,
        }
    }

    /// Track kind these settings apply to
    pub fn kind(&self) -> StreamKind {
        match self {
            OutputSettings::Video { .. } => StreamKind::Video,
            OutputSettings::Audio { .. } => StreamKind::Audio,
        }
    }

    /// Whether `frame` has the layout these settings ask for
    pub fn matches(&self, frame: &MediaFrame) -> bool {
        match (self, frame) {
            (OutputSettings::Video { pixel_format }, MediaFrame::Video(video)) => {
                video.format == *pixel_format && video.has_complete_planes()
            }
            (
                OutputSettings::Audio {
                    sample_rate,
                    channels,
                },
                MediaFrame::Audio(audio),
            ) => audio.sample_rate == *sample_rate && audio.channels == *channels,
            _ => false,
        }
    }
}

/// Forward-only cursor over one decoded track
pub trait TrackOutput: Send {
    /// Current decoder status
    fn status(&self) -> ReaderStatus;

    /// Next decoded sample, `None` at end of stream
    fn next_sample(&mut self) -> Option<MediaFrame>;
}

/// Decodable container with an audio and a video track
pub trait MediaAsset: Send + Sync {
    /// Natural size of the video track, if there is one
    fn natural_size(&self) -> Option<VideoResolution>;

    /// Open a fresh read session on the track selected by `settings`
    fn open_track(&self, settings: &OutputSettings) -> MediaResult<Box<dyn TrackOutput>>;
}

/// Asset held entirely in memory.
///
/// Useful on hosts without a platform decoder and as a deterministic source
/// in tests. Every `open_track` call starts again from the first sample.
#[derive(Debug, Clone, Default)]
pub struct MemoryAsset {
    video: Option<Arc<Vec<VideoFrame>>>,
    audio: Option<Arc<Vec<AudioFrame>>>,
}

impl MemoryAsset {
    /// Empty asset with no tracks
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a video track
    pub fn with_video(mut self, frames: Vec<VideoFrame>) -> Self {
        self.video = Some(Arc::new(frames));
        self
    }

    /// Attach an audio track
    pub fn with_audio(mut self, frames: Vec<AudioFrame>) -> Self {
        self.audio = Some(Arc::new(frames));
        self
    }

    /// Generate a test pattern movie: a luma ramp at `fps` and a 440 Hz tone
    /// delivered in 20 ms buffers.
    pub fn synthetic(
        resolution: VideoResolution,
        fps: u32,
        sample_rate: u32,
        duration: std::time::Duration,
    ) -> Self {
        let seconds = duration.as_secs_f64();
        let frame_total = (seconds * fps as f64).round() as i64;
        let video = (0..frame_total)
            .map(|index| {
                let w = resolution.width as usize;
                let h = resolution.height as usize;
                let shade = (index % 256) as u8;
                let luma = Bytes::from(vec![shade; w * h]);
                let chroma = Bytes::from(vec![128u8; w.div_ceil(2) * 2 * h.div_ceil(2)]);
                VideoFrame::nv12(
                    resolution.width,
                    resolution.height,
                    luma,
                    chroma,
                    MediaTime::new(index, fps as i32),
                )
            })
            .collect();

        let chunk = (sample_rate / 50) as usize;
        let total = (seconds * sample_rate as f64) as usize;
        let mut audio = Vec::new();
        let mut position = 0usize;
        while position < total {
            let len = chunk.min(total - position);
            let samples = (position..position + len)
                .map(|n| {
                    let t = n as f64 / sample_rate as f64;
                    ((t * 440.0 * std::f64::consts::TAU).sin() * 8000.0) as i16
                })
                .collect();
            audio.push(AudioFrame {
                samples,
                sample_rate,
                channels: 1,
                timestamp: MediaTime::new(position as i64, sample_rate as i32),
            });
            position += len;
        }

        Self::new().with_video(video).with_audio(audio)
    }
}

impl MediaAsset for MemoryAsset {
    fn natural_size(&self) -> Option<VideoResolution> {
        self.video
            .as_ref()
            .and_then(|frames| frames.first())
            .map(|frame| VideoResolution::new(frame.width, frame.height))
    }

    fn open_track(&self, settings: &OutputSettings) -> MediaResult<Box<dyn TrackOutput>> {
        let frames: VecDeque<MediaFrame> = match settings {
            OutputSettings::Video { .. } => self
                .video
                .as_ref()
                .ok_or(MediaError::TrackNotFound {
                    kind: StreamKind::Video,
                })?
                .iter()
                .cloned()
                .map(MediaFrame::Video)
                .collect(),
            OutputSettings::Audio { .. } => self
                .audio
                .as_ref()
                .ok_or(MediaError::TrackNotFound {
                    kind: StreamKind::Audio,
                })?
                .iter()
                .cloned()
                .map(MediaFrame::Audio)
                .collect(),
        };

        if let Some(first) = frames.front() {
            if !settings.matches(first) {
                return Err(MediaError::UnsupportedFormat {
                    format: format!("in-memory {} track does not match {:?}", settings.kind(), settings),
                });
            }
        }

        Ok(Box::new(MemoryTrackOutput { frames }))
    }
}

struct MemoryTrackOutput {
    frames: VecDeque<MediaFrame>,
}

impl TrackOutput for MemoryTrackOutput {
    fn status(&self) -> ReaderStatus {
        if self.frames.is_empty() {
            ReaderStatus::Completed
        } else {
            ReaderStatus::Reading
        }
    }

    fn next_sample(&mut self) -> Option<MediaFrame> {
        self.frames.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_synthetic_asset_layout() {
        let asset = MemoryAsset::synthetic(VideoResolution::new(16, 8), 30, 48000, Duration::from_secs(1));
        assert_eq!(asset.natural_size(), Some(VideoResolution::new(16, 8)));

        let mut video = asset.open_track(&OutputSettings::nv12()).unwrap();
        let mut count = 0;
        while let Some(frame) = video.next_sample() {
            assert_eq!(frame.kind(), StreamKind::Video);
            count += 1;
        }
        assert_eq!(count, 30);
        assert_eq!(video.status(), ReaderStatus::Completed);

        let mut audio = asset.open_track(&OutputSettings::mono_pcm(48000)).unwrap();
        let mut samples = 0;
        while let Some(MediaFrame::Audio(frame)) = audio.next_sample() {
            samples += frame.samples.len();
        }
        assert_eq!(samples, 48000);
    }

    #[test]
    fn test_missing_track() {
        let asset = MemoryAsset::new();
        assert!(matches!(
            asset.open_track(&OutputSettings::nv12()),
            Err(MediaError::TrackNotFound {
                kind: StreamKind::Video
            })
        ));
    }

    #[test]
    fn test_mismatched_settings_fail_to_open() {
        let asset = MemoryAsset::synthetic(VideoResolution::new(4, 4), 10, 44100, Duration::from_millis(100));
        assert!(matches!(
            asset.open_track(&OutputSettings::mono_pcm(48000)),
            Err(MediaError::UnsupportedFormat { .. })
        ));
    }
}
