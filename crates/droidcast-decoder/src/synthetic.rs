use droidcast_core::{DecoderError, FrameError, PixelFormat, Resolution, VideoFrame};
use tracing::debug;

use crate::BitstreamDecoder;

/// Test-pattern frame number `index`, BGRA32.
///
/// Pixel `(x, y)` is `B = i mod 256, G = (y + i) mod 256, R = (x + i) mod 256, A = 255`.
pub fn synthetic_frame(resolution: Resolution, index: u64) -> Result<VideoFrame, FrameError> {
    let Resolution { width, height } = resolution;
    let mut data = Vec::with_capacity(resolution.frame_len(PixelFormat::Bgra32));
    let i = index as u8;

    for y in 0..height {
        let g = (y as u8).wrapping_add(i);
        for x in 0..width {
            data.extend_from_slice(&[i, g, (x as u8).wrapping_add(i), 255]);
        }
    }
    VideoFrame::new(width, height, PixelFormat::Bgra32, data)
}

// ── SyntheticDecoder ──────────────────────────────────────────────────────────

/// Ignores the bitstream and emits one test-pattern frame per non-empty call.
#[derive(Debug, Clone)]
pub struct SyntheticDecoder {
    resolution: Resolution,
    next_index: u64,
}

impl SyntheticDecoder {
    pub fn new(resolution: Resolution) -> Self {
        Self { resolution, next_index: 0 }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Index the next produced frame will carry.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }
}

impl Default for SyntheticDecoder {
    fn default() -> Self {
        Self::new(Resolution::SYNTHETIC_DEFAULT)
    }
}

impl BitstreamDecoder for SyntheticDecoder {
    /// One frame per non-empty call whatever the bytes are; empty input yields `Ok(None)`.
    fn try_decode(&mut self, data: &[u8]) -> Result<Option<VideoFrame>, DecoderError> {
        if data.is_empty() {
            return Ok(None);
        }
        let frame = synthetic_frame(self.resolution, self.next_index)?;
        debug!("Synthetic frame #{} for {} input bytes", self.next_index, data.len());
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}
