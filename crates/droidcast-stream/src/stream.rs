//! The lazy, single-pass frame sequence returned by
//! [`ScreenStreamPipeline::start`](crate::ScreenStreamPipeline::start).
//!
//! # Termination
//!
//! | Cause                 | Items                                  | Process           |
//! |-----------------------|----------------------------------------|-------------------|
//! | cancellation          | `None`                                 | killed and reaped |
//! | end of capture output | drained frames, then `None`            | exit status read  |
//! | failed exit / stderr  | drained frames, `Err(Process)`, `None` | exit status read  |
//! | read or decode error  | `Err(..)`, then `None`                 | killed and reaped |

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use droidcast_capture::CaptureProcess;
use droidcast_core::{DecoderError, Resolution, StreamError, VideoFrame};
use droidcast_decoder::{synthetic_frame, BitstreamDecoder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::stats::StreamStats;

type Item = Option<Result<VideoFrame, StreamError>>;

pub struct ScreenStream {
    source: Source,
    cancel: CancellationToken,
    stats: Arc<StreamStats>,
    done: bool,
}

enum Source {
    Synthetic(SyntheticSource),
    Live(LiveSource),
}

impl ScreenStream {
    pub(crate) fn synthetic(resolution: Resolution, interval: Duration, cancel: CancellationToken) -> Self {
        Self::new(Source::Synthetic(SyntheticSource { resolution, interval, index: 0 }), cancel)
    }

    pub(crate) fn live(
        process: CaptureProcess,
        decoder: Box<dyn BitstreamDecoder>,
        chunk_size: usize,
        cancel: CancellationToken,
    ) -> Self {
        let source = LiveSource {
            process: Some(process),
            decoder: Some(decoder),
            buf: vec![0u8; chunk_size],
            pending: VecDeque::new(),
            failure: None,
        };
        Self::new(Source::Live(source), cancel)
    }

    fn new(source: Source, cancel: CancellationToken) -> Self {
        Self { source, cancel, stats: Arc::new(StreamStats::default()), done: false }
    }

    /// Next frame, or `None` once the stream has ended or been cancelled.
    ///
    /// After `None` or an error every further call returns `None`.
    pub async fn next(&mut self) -> Option<Result<VideoFrame, StreamError>> {
        if self.done {
            return None;
        }
        let item = match &mut self.source {
            Source::Synthetic(source) => source.next(&self.cancel).await,
            Source::Live(source) => source.next(&self.cancel, &self.stats).await,
        };
        match &item {
            Some(Ok(_)) => self.stats.record_frame(),
            Some(Err(e)) => {
                warn!("Screen stream failed: {}", e);
                self.done = true;
            }
            None => {
                info!("Screen stream ended: {}", self.stats.snapshot());
                self.done = true;
            }
        }
        item
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        Arc::clone(&self.stats)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// OS process id of the capture process while it is running.
    pub fn process_id(&self) -> Option<u32> {
        match &self.source {
            Source::Live(source) => source.process.as_ref().and_then(CaptureProcess::id),
            Source::Synthetic(_) => None,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self.source, Source::Synthetic(_))
    }
}

// ── Synthetic ─────────────────────────────────────────────────────────────────

struct SyntheticSource {
    resolution: Resolution,
    interval: Duration,
    index: u64,
}

impl SyntheticSource {
    async fn next(&mut self, cancel: &CancellationToken) -> Item {
        // The first frame is immediate; later ones wait out the pacing interval
        if self.index > 0 {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        if cancel.is_cancelled() {
            return None;
        }

        let frame = synthetic_frame(self.resolution, self.index).map_err(DecoderError::from);
        self.index += 1;
        Some(frame.map_err(StreamError::from))
    }
}

// ── Live ──────────────────────────────────────────────────────────────────────

struct LiveSource {
    /// `None` once the process has been finished or released.
    process: Option<CaptureProcess>,
    /// Moved into the blocking pool for the duration of each decode.
    decoder: Option<Box<dyn BitstreamDecoder>>,
    buf: Vec<u8>,
    pending: VecDeque<VideoFrame>,
    /// Reported after the drained frames have been yielded.
    failure: Option<StreamError>,
}

impl LiveSource {
    async fn next(&mut self, cancel: &CancellationToken, stats: &StreamStats) -> Item {
        loop {
            if cancel.is_cancelled() {
                info!("Screen stream cancelled");
                self.release().await;
                return None;
            }
            if let Some(frame) = self.pending.pop_front() {
                return Some(Ok(frame));
            }
            if let Some(err) = self.failure.take() {
                return Some(Err(err));
            }

            let read = {
                let Some(process) = self.process.as_mut() else {
                    return None;
                };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => continue,
                    read = process.read_chunk(&mut self.buf) => read,
                }
            };

            match read {
                Ok(0) => self.end_of_stream(cancel, stats).await,
                Ok(n) => {
                    stats.record_chunk(n);
                    debug!("Read {} bytes from capture process", n);
                    if let Err(e) = self.decode(n).await {
                        self.release().await;
                        return Some(Err(e));
                    }
                }
                Err(e) => {
                    self.release().await;
                    return Some(Err(e.into()));
                }
            }
        }
    }

    /// Decode `buf[..len]` off the async runtime, collecting every frame it completes.
    async fn decode(&mut self, len: usize) -> Result<(), StreamError> {
        let Some(mut decoder) = self.decoder.take() else {
            return Err(DecoderError::Closed.into());
        };
        let buf = std::mem::take(&mut self.buf);

        let (decoder, buf, result) = tokio::task::spawn_blocking(move || {
            let result = decode_chunk(decoder.as_mut(), &buf[..len]);
            (decoder, buf, result)
        })
        .await
        .map_err(|e| DecoderError::DecodeFailed { reason: format!("decode task failed: {e}") })?;

        self.decoder = Some(decoder);
        self.buf = buf;
        self.pending.extend(result?);
        Ok(())
    }

    /// Output reached EOF: flush the decoder, then check how the process exited.
    ///
    /// A process can close its output and keep running; cancellation while
    /// waiting for it leaves the process in place for `release`.
    async fn end_of_stream(&mut self, cancel: &CancellationToken, stats: &StreamStats) {
        info!("Capture output ended after {} bytes", stats.bytes_read());

        if let Some(mut decoder) = self.decoder.take() {
            match tokio::task::spawn_blocking(move || decoder.drain()).await {
                Ok(Ok(frames)) => {
                    debug!("Decoder drained {} frames", frames.len());
                    self.pending.extend(frames);
                }
                Ok(Err(e)) => self.failure = Some(e.into()),
                Err(e) => {
                    self.failure = Some(
                        DecoderError::DecodeFailed { reason: format!("drain task failed: {e}") }.into(),
                    )
                }
            }
        }

        let Some(process) = self.process.as_mut() else {
            return;
        };
        let exit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            exit = process.finish() => exit,
        };
        self.process = None;
        if let Err(e) = exit {
            self.failure.get_or_insert(e);
        }
    }

    async fn release(&mut self) {
        if let Some(process) = self.process.take() {
            process.release().await;
        }
        self.decoder = None;
        self.pending.clear();
    }
}

fn decode_chunk(decoder: &mut dyn BitstreamDecoder, chunk: &[u8]) -> Result<Vec<VideoFrame>, DecoderError> {
    let mut frames = Vec::new();
    let mut input = chunk;
    while let Some(frame) = decoder.try_decode(input)? {
        frames.push(frame);
        input = &[];
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use droidcast_core::CaptureCommand;
    use droidcast_decoder::SyntheticDecoder;

    use super::*;

    struct RejectingDecoder;

    impl BitstreamDecoder for RejectingDecoder {
        fn try_decode(&mut self, data: &[u8]) -> Result<Option<VideoFrame>, DecoderError> {
            if data.is_empty() {
                return Ok(None);
            }
            Err(DecoderError::Parse { offset: 0, reason: "forbidden_zero_bit set".to_string() })
        }

        fn name(&self) -> &str {
            "rejecting"
        }
    }

    #[test]
    fn decode_chunk_collects_until_decoder_needs_input() {
        let mut decoder = SyntheticDecoder::new(Resolution::new(2, 2));
        let frames = decode_chunk(&mut decoder, &[1, 2, 3]).unwrap();
        assert_eq!(frames.len(), 1);

        assert!(decode_chunk(&mut decoder, &[]).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn decode_error_ends_the_stream_and_kills_the_process() {
        let process = CaptureProcess::start(&CaptureCommand::new("sh", ["-c", "printf x; sleep 30"]))
            .expect("spawn sh");
        let mut stream = ScreenStream::live(process, Box::new(RejectingDecoder), 1024, CancellationToken::new());
        assert!(stream.process_id().is_some());

        let item = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("decode error must not wait for the process");
        assert!(matches!(
            item,
            Some(Err(StreamError::Decoder(DecoderError::Parse { offset: 0, .. })))
        ));
        assert_eq!(stream.process_id(), None);
        assert!(stream.next().await.is_none());
        assert_eq!(stream.stats().frames_produced(), 0);
    }
}
