use droidcast_capture::CaptureProcess;
use droidcast_core::{CaptureCommand, DecoderError, Resolution, StreamError, StreamOptions};
use droidcast_decoder::DecoderBackend;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::stream::ScreenStream;

/// Bytes requested from the capture process per read.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Where frames come from.
#[derive(Debug, Clone)]
pub enum CaptureMode {
    /// Generated test pattern, paced by `max_fps`. No process, no decoder.
    Synthetic,
    /// Output of an external capture command, decoded chunk by chunk.
    Live {
        command: CaptureCommand,
        decoder: DecoderBackend,
        chunk_size: usize,
    },
}

/// Recipe for screen streams. Each [`start`](Self::start) opens an
/// independent session with its own process and decoder.
#[derive(Debug, Clone)]
pub struct ScreenStreamPipeline {
    mode: CaptureMode,
}

impl ScreenStreamPipeline {
    pub fn synthetic() -> Self {
        Self { mode: CaptureMode::Synthetic }
    }

    pub fn live(command: CaptureCommand, decoder: DecoderBackend) -> Self {
        Self {
            mode: CaptureMode::Live { command, decoder, chunk_size: DEFAULT_CHUNK_SIZE },
        }
    }

    /// Override the read size of live capture. Has no effect in synthetic mode.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        if let CaptureMode::Live { chunk_size, .. } = &mut self.mode {
            *chunk_size = size.max(1);
        }
        self
    }

    pub fn mode(&self) -> &CaptureMode {
        &self.mode
    }

    /// Open a stream session.
    ///
    /// Live mode initialises the decoder and spawns the capture process before
    /// returning; frames are produced lazily by [`ScreenStream::next`].
    pub async fn start(
        &self,
        options: StreamOptions,
        cancel: CancellationToken,
    ) -> Result<ScreenStream, StreamError> {
        match &self.mode {
            CaptureMode::Synthetic => {
                let resolution = options.resolution_or(Resolution::SYNTHETIC_DEFAULT);
                info!(
                    "Synthetic screen stream: {} @ {} fps",
                    resolution,
                    options.effective_fps()
                );
                Ok(ScreenStream::synthetic(resolution, options.frame_interval(), cancel))
            }
            CaptureMode::Live { command, decoder, chunk_size } => {
                let backend = decoder.clone();
                let decoder = tokio::task::spawn_blocking(move || backend.open())
                    .await
                    .map_err(|e| DecoderError::Initialization { reason: format!("decoder setup task failed: {e}") })??;
                info!("Decoder '{}' ready for live capture", decoder.name());

                let process = CaptureProcess::start(command)?;
                Ok(ScreenStream::live(process, decoder, *chunk_size, cancel))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_applies_to_live_mode_only() {
        let live = ScreenStreamPipeline::live(
            CaptureCommand::default(),
            DecoderBackend::Synthetic { resolution: Resolution::SYNTHETIC_DEFAULT },
        );
        assert!(matches!(live.mode(), CaptureMode::Live { chunk_size: DEFAULT_CHUNK_SIZE, .. }));

        let live = live.with_chunk_size(0);
        assert!(matches!(live.mode(), CaptureMode::Live { chunk_size: 1, .. }));

        let synthetic = ScreenStreamPipeline::synthetic().with_chunk_size(4096);
        assert!(matches!(synthetic.mode(), CaptureMode::Synthetic));
    }
}
