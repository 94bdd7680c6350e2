//! droidcast-decoder: turns a raw H.264 byte stream into BGRA frames.
//!
//! Two decoders implement [`BitstreamDecoder`]:
//!
//! - [`SyntheticDecoder`] ignores its input and emits a deterministic test
//!   pattern, one frame per non-empty call.
//! - `NativeCodecDecoder` (feature `native-decoder`) stitches chunk-unaligned
//!   input into access units and decodes them with GStreamer.
//!
//! ```text
//! chunk ──► AccessUnitParser ──► appsrc → h264parse → [decoder] → videoconvert → appsink ──► pack_rows ──► VideoFrame
//! ```

pub mod annexb;
pub mod pack;
pub mod synthetic;

#[cfg(feature = "native-decoder")]
pub mod native;

use droidcast_core::{DecoderError, Resolution, VideoFrame};

pub use annexb::AccessUnitParser;
pub use pack::{pack_rows, pack_rows_into};
pub use synthetic::{synthetic_frame, SyntheticDecoder};

#[cfg(feature = "native-decoder")]
pub use native::{probe_best_decoder, NativeCodecDecoder, NativeDecoderConfig};

// ── BitstreamDecoder ──────────────────────────────────────────────────────────

/// Incremental decoder: bytes in, at most one frame out per call.
///
/// State persists across calls. `Ok(None)` means more input is needed; a
/// call that completes several pictures returns the first, and the caller
/// re-invokes with an empty slice to collect the rest.
pub trait BitstreamDecoder: Send {
    fn try_decode(&mut self, data: &[u8]) -> Result<Option<VideoFrame>, DecoderError>;

    /// End of input: flush every picture still held back.
    fn drain(&mut self) -> Result<Vec<VideoFrame>, DecoderError> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str;
}

// ── DecoderBackend ────────────────────────────────────────────────────────────

/// Which decoder a live capture session opens.
#[derive(Debug, Clone)]
pub enum DecoderBackend {
    Synthetic { resolution: Resolution },
    #[cfg(feature = "native-decoder")]
    Native(NativeDecoderConfig),
}

impl DecoderBackend {
    /// Create and initialise a fresh decoder session.
    ///
    /// Blocking for the native backend; call from `spawn_blocking` in async code.
    pub fn open(&self) -> Result<Box<dyn BitstreamDecoder>, DecoderError> {
        match self {
            Self::Synthetic { resolution } => Ok(Box::new(SyntheticDecoder::new(*resolution))),
            #[cfg(feature = "native-decoder")]
            Self::Native(config) => Ok(Box::new(NativeCodecDecoder::open(config.clone())?)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Synthetic { .. } => "synthetic",
            #[cfg(feature = "native-decoder")]
            Self::Native(_) => "native",
        }
    }
}

impl Default for DecoderBackend {
    /// The native decoder when compiled in, otherwise the synthetic one.
    fn default() -> Self {
        #[cfg(feature = "native-decoder")]
        {
            Self::Native(NativeDecoderConfig::default())
        }
        #[cfg(not(feature = "native-decoder"))]
        {
            Self::Synthetic { resolution: Resolution::SYNTHETIC_DEFAULT }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_backend_opens_independent_sessions() {
        let backend = DecoderBackend::Synthetic { resolution: Resolution::new(16, 8) };

        let mut first = backend.open().unwrap();
        let mut second = backend.open().unwrap();
        first.try_decode(&[1]).unwrap();
        let frame = first.try_decode(&[1]).unwrap().expect("frame");
        let fresh = second.try_decode(&[1]).unwrap().expect("frame");

        assert_eq!(first.name(), "synthetic");
        assert_eq!(frame.pixel(0, 0), Some(&[1, 1, 1, 255][..]));
        assert_eq!(fresh.pixel(0, 0), Some(&[0, 0, 0, 255][..]));
        assert_eq!(fresh.resolution(), Resolution::new(16, 8));
    }
}
