//! GStreamer-backed H.264 decoding.
//!
//! # Decoder priority
//! 1. `vaapih264dec`: Intel/AMD VA-API (gstreamer-vaapi)
//! 2. `vah264dec`: Intel/AMD VA-API (gst-plugins-bad `va`)
//! 3. `nvh264dec`: NVIDIA NVDEC
//! 4. `avdec_h264`: Software libavcodec, last resort
//!
//! # Pipeline
//! ```text
//! appsrc → h264parse → [decoder] → videoconvert → video/x-raw,format=BGRA → appsink
//! ```
//! No size is forced on the caps: pictures come out at the source's native
//! resolution and are re-packed to tight rows on the way out.
//!
//! All calls block on GStreamer; run them from `tokio::task::spawn_blocking`.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use droidcast_core::{DecoderError, DecoderState, PixelFormat, Resolution, VideoFrame};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::{AppSink, AppSrc};
use gstreamer_video as gst_video;
use tracing::{debug, info, warn};

use crate::annexb::AccessUnitParser;
use crate::pack::pack_rows_into;
use crate::BitstreamDecoder;

/// Decoder candidates in priority order.
static DECODER_PRIORITY: &[(&str, &str)] = &[
    ("vaapih264dec", "VA-API H.264"),
    ("vah264dec",    "VA H.264"),
    ("nvh264dec",    "NVIDIA NVDEC H.264"),
    ("avdec_h264",   "Software libavcodec (last resort)"),
];

/// Nominal spacing of submitted access units; screenrecord carries no timestamps.
const UNIT_DURATION: gst::ClockTime = gst::ClockTime::from_nseconds(33_333_333);

// ── Probe ─────────────────────────────────────────────────────────────────────

/// Returns the name of the highest-priority available GStreamer H.264 decoder.
pub fn probe_best_decoder() -> Option<&'static str> {
    if gst::init().is_err() { return None; }
    for (element, label) in DECODER_PRIORITY {
        if gst::ElementFactory::find(element).is_some() {
            info!("Selected decoder: {} ({})", element, label);
            return Some(element);
        }
        debug!("Decoder '{}' not found, trying next", element);
    }
    None
}

// ── NativeDecoderConfig ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeDecoderConfig {
    /// Force a decoder element instead of probing `DECODER_PRIORITY`.
    pub element: Option<String>,
    /// How long a decode call waits for a picture after submitting each unit.
    pub pull_timeout: Duration,
    /// How long `drain` waits for each remaining picture after end of stream.
    pub drain_timeout: Duration,
}

impl Default for NativeDecoderConfig {
    fn default() -> Self {
        Self {
            element: None,
            pull_timeout: Duration::from_millis(5),
            drain_timeout: Duration::from_secs(2),
        }
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// A playing pipeline. Dropping it stops the pipeline.
struct Session {
    pipeline: gst::Pipeline,
    appsrc:   AppSrc,
    appsink:  AppSink,
    element:  String,
}

impl Session {
    fn start(element: &str) -> Result<Self, DecoderError> {
        let pipeline_str = format!(
            "appsrc name=src format=time is-live=true \
             ! h264parse \
             ! {element} \
             ! videoconvert \
             ! video/x-raw,format=BGRA \
             ! appsink name=sink sync=false max-buffers=0 drop=false"
        );

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| DecoderError::GStreamerPipeline(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| DecoderError::GStreamerPipeline("Not a pipeline".into()))?;

        let appsrc = pipeline
            .by_name("src")
            .and_then(|element| element.downcast::<AppSrc>().ok())
            .ok_or_else(|| DecoderError::GStreamerPipeline("No appsrc".into()))?;

        let appsink = pipeline
            .by_name("sink")
            .and_then(|element| element.downcast::<AppSink>().ok())
            .ok_or_else(|| DecoderError::GStreamerPipeline("No appsink".into()))?;

        let src_caps = gst::Caps::builder("video/x-h264")
            .field("stream-format", "byte-stream")
            .field("alignment", "au")
            .build();
        appsrc.set_caps(Some(&src_caps));

        let session = Self { pipeline, appsrc, appsink, element: element.to_string() };
        session
            .pipeline
            .set_state(gst::State::Playing)
            .map_err(|_| DecoderError::GStreamerPipeline("Failed to start pipeline".into()))?;
        Ok(session)
    }

    fn push(&self, unit: Bytes, pts: gst::ClockTime) -> Result<(), DecoderError> {
        let len = unit.len();
        let mut buffer = gst::Buffer::from_slice(unit);
        if let Some(buffer) = buffer.get_mut() {
            buffer.set_pts(pts);
            buffer.set_duration(UNIT_DURATION);
        }
        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| DecoderError::DecodeFailed { reason: format!("appsrc push failed: {e:?}") })?;
        debug!("Submitted access unit ({} bytes, pts {})", len, pts);
        Ok(())
    }

    /// Next decoded sample, waiting at most `timeout`. Surfaces pipeline
    /// errors posted on the bus when nothing arrives.
    fn pull(&self, timeout: Duration) -> Result<Option<gst::Sample>, DecoderError> {
        let timeout = gst::ClockTime::from_nseconds(timeout.as_nanos() as u64);
        if let Some(sample) = self.appsink.try_pull_sample(timeout) {
            return Ok(Some(sample));
        }
        if let Some(msg) = self.pipeline.bus().and_then(|bus| bus.pop_filtered(&[gst::MessageType::Error])) {
            if let gst::MessageView::Error(err) = msg.view() {
                return Err(DecoderError::GStreamerPipeline(format!(
                    "{} ({})",
                    err.error(),
                    err.debug().map(|d| d.to_string()).unwrap_or_default()
                )));
            }
        }
        Ok(None)
    }

    fn end_of_stream(&self) -> Result<(), DecoderError> {
        self.appsrc
            .end_of_stream()
            .map_err(|e| DecoderError::DecodeFailed { reason: format!("appsrc EOS failed: {e:?}") })?;
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) { let _ = self.pipeline.set_state(gst::State::Null); }
}

// ── Conversion ────────────────────────────────────────────────────────────────

/// Output buffer tagged with the picture size it was allocated for.
struct Conversion {
    resolution: Resolution,
    buffer:     BytesMut,
}

impl Conversion {
    fn new(resolution: Resolution) -> Self {
        Self { resolution, buffer: BytesMut::with_capacity(resolution.frame_len(PixelFormat::Bgra32)) }
    }

    fn pack(&mut self, plane: &[u8], stride: usize) -> Result<VideoFrame, DecoderError> {
        let Resolution { width, height } = self.resolution;
        let len = self.resolution.frame_len(PixelFormat::Bgra32);
        // Reclaims the allocation when every earlier frame has been dropped
        self.buffer.reserve(len);
        pack_rows_into(plane, stride, len / height as usize, height as usize, &mut self.buffer)?;
        Ok(VideoFrame::new(width, height, PixelFormat::Bgra32, self.buffer.split().freeze())?)
    }
}

fn decode_failed(reason: impl Into<String>) -> DecoderError {
    DecoderError::DecodeFailed { reason: reason.into() }
}

/// Turn an appsink sample into a packed BGRA frame, reallocating the
/// conversion buffer when the picture size changes.
fn convert_sample(slot: &mut Option<Conversion>, sample: &gst::Sample) -> Result<VideoFrame, DecoderError> {
    let caps = sample.caps().ok_or_else(|| decode_failed("decoded sample without caps"))?;
    let info = gst_video::VideoInfo::from_caps(caps)
        .map_err(|e| decode_failed(format!("unreadable caps {caps}: {e}")))?;
    if info.format() != gst_video::VideoFormat::Bgra {
        return Err(decode_failed(format!("expected BGRA output, got {:?}", info.format())));
    }

    let resolution = Resolution::new(info.width(), info.height());
    if resolution.total_pixels() == 0 {
        return Err(decode_failed(format!("decoded picture has no pixels ({resolution})")));
    }
    match slot.as_ref().map(|c| c.resolution) {
        Some(current) if current == resolution => {}
        Some(current) => {
            info!("Decoded picture size changed: {} → {}", current, resolution);
            *slot = None;
        }
        None => info!("First decoded picture: {}", resolution),
    }
    let conversion = slot.get_or_insert_with(|| Conversion::new(resolution));

    let stride = info.stride().first().copied().unwrap_or_default();
    let offset = info.offset().first().copied().unwrap_or_default();
    let stride = usize::try_from(stride).map_err(|_| decode_failed(format!("negative row stride {stride}")))?;

    let buffer = sample.buffer().ok_or_else(|| decode_failed("decoded sample without buffer"))?;
    let map = buffer.map_readable().map_err(|_| decode_failed("failed to map decoded buffer"))?;
    let plane = map
        .as_slice()
        .get(offset..)
        .ok_or_else(|| decode_failed(format!("plane offset {offset} past end of buffer")))?;

    conversion.pack(plane, stride)
}

// ── NativeCodecDecoder ────────────────────────────────────────────────────────

/// H.264 decoder for a chunk-unaligned Annex-B byte stream.
///
/// `Uninitialized → Initializing → Ready → Closed`. Setup failure goes
/// straight to `Closed`; decode calls on a decoder that is not `Ready` fail.
pub struct NativeCodecDecoder {
    config:          NativeDecoderConfig,
    state:           DecoderState,
    session:         Option<Session>,
    parser:          AccessUnitParser,
    /// Parsed units not yet handed to GStreamer.
    queued:          VecDeque<Bytes>,
    conversion:      Option<Conversion>,
    units_submitted: u64,
    frames_decoded:  u64,
}

impl NativeCodecDecoder {
    pub fn new(config: NativeDecoderConfig) -> Self {
        Self {
            config,
            state: DecoderState::Uninitialized,
            session: None,
            parser: AccessUnitParser::new(),
            queued: VecDeque::new(),
            conversion: None,
            units_submitted: 0,
            frames_decoded: 0,
        }
    }

    /// Create and initialise in one step.
    pub fn open(config: NativeDecoderConfig) -> Result<Self, DecoderError> {
        let mut decoder = Self::new(config);
        decoder.initialize()?;
        Ok(decoder)
    }

    /// Build and start the GStreamer pipeline.
    pub fn initialize(&mut self) -> Result<(), DecoderError> {
        match self.state {
            DecoderState::Uninitialized => {}
            DecoderState::Ready => return Ok(()),
            DecoderState::Closed => return Err(DecoderError::Closed),
            state @ DecoderState::Initializing => return Err(DecoderError::NotReady { state }),
        }
        self.state = DecoderState::Initializing;

        match self.start_session() {
            Ok(session) => {
                info!("NativeCodecDecoder({}) ready", session.element);
                self.session = Some(session);
                self.state = DecoderState::Ready;
                Ok(())
            }
            Err(e) => {
                warn!("Decoder setup failed: {}", e);
                self.state = DecoderState::Closed;
                Err(e)
            }
        }
    }

    fn start_session(&self) -> Result<Session, DecoderError> {
        gst::init().map_err(|e| DecoderError::Initialization { reason: e.to_string() })?;

        let element = match &self.config.element {
            Some(element) => {
                if gst::ElementFactory::find(element).is_none() {
                    return Err(DecoderError::Initialization {
                        reason: format!("decoder element '{element}' is not installed"),
                    });
                }
                element.clone()
            }
            None => probe_best_decoder()
                .ok_or_else(|| DecoderError::Initialization {
                    reason: "no H.264 decoder element available".into(),
                })?
                .to_string(),
        };

        Session::start(&element).map_err(|e| DecoderError::Initialization { reason: e.to_string() })
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn element_name(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.element.as_str())
    }

    pub fn is_hardware_accelerated(&self) -> bool {
        self.element_name().is_some_and(|e| e != "avdec_h264")
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Stop the pipeline and release every resource. Idempotent.
    pub fn close(&mut self) {
        if self.state == DecoderState::Closed {
            return;
        }
        self.session = None;
        self.queued.clear();
        self.conversion = None;
        self.state = DecoderState::Closed;
        info!(
            "NativeCodecDecoder closed ({} units submitted, {} frames decoded)",
            self.units_submitted, self.frames_decoded
        );
    }

    fn ready_session(&self) -> Result<&Session, DecoderError> {
        match (self.state, self.session.as_ref()) {
            (DecoderState::Ready, Some(session)) => Ok(session),
            (DecoderState::Closed, _) => Err(DecoderError::Closed),
            (state, _) => Err(DecoderError::NotReady { state }),
        }
    }

    fn next_pts(&mut self) -> gst::ClockTime {
        let pts = UNIT_DURATION * self.units_submitted;
        self.units_submitted += 1;
        pts
    }
}

impl BitstreamDecoder for NativeCodecDecoder {
    fn try_decode(&mut self, data: &[u8]) -> Result<Option<VideoFrame>, DecoderError> {
        self.ready_session()?;
        self.parser.push(data)?;
        while let Some(unit) = self.parser.next_unit() {
            self.queued.push_back(unit);
        }

        // Pictures left over from earlier calls come first
        if let Some(sample) = self.ready_session()?.pull(Duration::ZERO)? {
            self.frames_decoded += 1;
            return convert_sample(&mut self.conversion, &sample).map(Some);
        }

        while let Some(unit) = self.queued.pop_front() {
            let pts = self.next_pts();
            let session = self.ready_session()?;
            session.push(unit, pts)?;
            if let Some(sample) = session.pull(self.config.pull_timeout)? {
                self.frames_decoded += 1;
                return convert_sample(&mut self.conversion, &sample).map(Some);
            }
        }
        Ok(None)
    }

    fn drain(&mut self) -> Result<Vec<VideoFrame>, DecoderError> {
        self.ready_session()?;
        self.parser.finish()?;
        while let Some(unit) = self.parser.next_unit() {
            self.queued.push_back(unit);
        }
        while let Some(unit) = self.queued.pop_front() {
            let pts = self.next_pts();
            self.ready_session()?.push(unit, pts)?;
        }
        self.ready_session()?.end_of_stream()?;

        let mut frames = Vec::new();
        while let Some(sample) = self.ready_session()?.pull(self.config.drain_timeout)? {
            frames.push(convert_sample(&mut self.conversion, &sample)?);
        }
        self.frames_decoded += frames.len() as u64;
        info!("Decoder drained: {} trailing frames", frames.len());

        self.close();
        Ok(frames)
    }

    fn name(&self) -> &str {
        "native"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_decoder_is_uninitialized() {
        let mut decoder = NativeCodecDecoder::new(NativeDecoderConfig::default());
        assert_eq!(decoder.state(), DecoderState::Uninitialized);
        assert!(decoder.element_name().is_none());

        let err = decoder.try_decode(&[0, 0, 0, 1, 0x65]).unwrap_err();
        assert!(matches!(err, DecoderError::NotReady { state: DecoderState::Uninitialized }));
    }

    #[test]
    fn missing_element_closes_the_decoder() {
        let config = NativeDecoderConfig {
            element: Some("droidcastnosuchdec".into()),
            ..NativeDecoderConfig::default()
        };
        let mut decoder = NativeCodecDecoder::new(config);

        let err = decoder.initialize().unwrap_err();
        assert!(matches!(err, DecoderError::Initialization { .. }), "{err:?}");
        assert_eq!(decoder.state(), DecoderState::Closed);
        assert!(matches!(decoder.try_decode(&[]), Err(DecoderError::Closed)));
        assert!(matches!(decoder.initialize(), Err(DecoderError::Closed)));
    }
}
