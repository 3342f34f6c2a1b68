//! Decoded frame types

use bytes::Bytes;
use moviepub_core::{MediaTime, StreamKind};
use serde::{Deserialize, Serialize};

/// Pixel layouts a video frame can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoPixelFormat {
    /// Bi-planar 4:2:0, Y plane followed by an interleaved CbCr plane
    Nv12,
    /// Tri-planar 4:2:0
    Yuv420P,
    /// Packed 32-bit BGRA
    Bgra32,
}

impl VideoPixelFormat {
    /// Number of planes a frame of this format carries
    pub fn plane_count(&self) -> usize {
        match self {
            VideoPixelFormat::Nv12 => 2,
            VideoPixelFormat::Yuv420P => 3,
            VideoPixelFormat::Bgra32 => 1,
        }
    }
}

/// Video resolution information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoResolution {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl VideoResolution {
    /// `width` x `height` pixels
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Orientation hint passed to the capture sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VideoOrientation {
    /// Upright
    #[default]
    Up,
    /// Rotated 180 degrees
    Down,
    /// Rotated 90 degrees counterclockwise
    Left,
    /// Rotated 90 degrees clockwise
    Right,
}

/// One image plane
#[derive(Debug, Clone)]
pub struct Plane {
    /// Plane bytes
    pub data: Bytes,
    /// Bytes per row
    pub stride: usize,
}

/// Decoded video image
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel layout of `planes`
    pub format: VideoPixelFormat,
    /// Image planes in format order
    pub planes: Vec<Plane>,
    /// Orientation hint
    pub orientation: VideoOrientation,
    /// Presentation timestamp
    pub timestamp: MediaTime,
}

impl VideoFrame {
    /// Build an NV12 frame from a luma plane and an interleaved chroma plane
    pub fn nv12(width: u32, height: u32, luma: Bytes, chroma: Bytes, timestamp: MediaTime) -> Self {
        Self {
            width,
            height,
            format: VideoPixelFormat::Nv12,
            planes: vec![
                Plane {
                    data: luma,
                    stride: width as usize,
                },
                Plane {
                    data: chroma,
                    stride: width as usize,
                },
            ],
            orientation: VideoOrientation::Up,
            timestamp,
        }
    }

    /// Expected byte length of every plane for this frame's format and size
    pub fn expected_plane_sizes(&self) -> Vec<usize> {
        let w = self.width as usize;
        let h = self.height as usize;
        match self.format {
            VideoPixelFormat::Nv12 => vec![w * h, w.div_ceil(2) * 2 * h.div_ceil(2)],
            VideoPixelFormat::Yuv420P => {
                let chroma = w.div_ceil(2) * h.div_ceil(2);
                vec![w * h, chroma, chroma]
            }
            VideoPixelFormat::Bgra32 => vec![w * h * 4],
        }
    }

    /// Whether the frame carries every plane of its format, each at least
    /// as large as its size and format require
    pub fn has_complete_planes(&self) -> bool {
        let expected = self.expected_plane_sizes();
        self.planes.len() == expected.len()
            && self
                .planes
                .iter()
                .zip(expected)
                .all(|(plane, size)| plane.data.len() >= size)
    }
}

/// Decoded audio buffer
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Interleaved signed 16-bit samples
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Presentation timestamp of the first sample
    pub timestamp: MediaTime,
}

impl AudioFrame {
    /// Number of sample frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// Media frame types
#[derive(Debug, Clone)]
pub enum MediaFrame {
    /// Audio frame
    Audio(AudioFrame),
    /// Video frame
    Video(VideoFrame),
}

impl MediaFrame {
    /// Presentation timestamp
    pub fn timestamp(&self) -> MediaTime {
        match self {
            MediaFrame::Audio(frame) => frame.timestamp,
            MediaFrame::Video(frame) => frame.timestamp,
        }
    }

    /// Stream the frame belongs to
    pub fn kind(&self) -> StreamKind {
        match self {
            MediaFrame::Audio(_) => StreamKind::Audio,
            MediaFrame::Video(_) => StreamKind::Video,
        }
    }
}

/// Receives decoded video frames in presentation order.
///
/// Implementations must not hold on to the frame after returning; the plane
/// buffers may be reused by the decoder.
pub trait FrameSink: Send + Sync {
    /// Consume one frame
    fn consume_frame(&self, frame: &VideoFrame);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nv12_plane_sizes() {
        let frame = VideoFrame::nv12(
            4,
            3,
            Bytes::from(vec![0u8; 12]),
            Bytes::from(vec![128u8; 8]),
            MediaTime::ZERO,
        );
        assert_eq!(frame.format.plane_count(), 2);
        assert_eq!(frame.expected_plane_sizes(), vec![12, 8]);
        assert!(frame.has_complete_planes());
    }

    #[test]
    fn test_truncated_or_missing_planes_are_incomplete() {
        let mut frame = VideoFrame::nv12(
            4,
            4,
            Bytes::from(vec![0u8; 16]),
            Bytes::from(vec![128u8; 4]),
            MediaTime::ZERO,
        );
        assert!(!frame.has_complete_planes());

        frame.planes[1].data = Bytes::from(vec![128u8; 8]);
        assert!(frame.has_complete_planes());

        frame.planes.pop();
        assert!(!frame.has_complete_planes());
    }

    #[test]
    fn test_audio_frame_count() {
        let frame = AudioFrame {
            samples: vec![0; 960],
            sample_rate: 48000,
            channels: 2,
            timestamp: MediaTime::ZERO,
        };
        assert_eq!(frame.frame_count(), 480);
        assert_eq!(MediaFrame::Audio(frame).kind(), StreamKind::Audio);
    }
}
