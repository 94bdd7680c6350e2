//! droidcast-stream: screen streaming pipeline.
//!
//! # Architecture
//!
//! ```text
//!                        ┌─────────────── ScreenStream ───────────────┐
//! ScreenStreamPipeline ─►│ CaptureProcess ─► chunk ─► BitstreamDecoder │─► pump ─► FrameExchange ─► consumer
//!        ::start         │      (or the synthetic pattern generator)   │            (1 slot, latest wins)
//!                        └─────────────────────────────────────────────┘
//! ```
//!
//! One producer task runs [`pump`]; one consumer reads the [`FrameExchange`].
//! Within the producer, reads and decodes are sequential. A single
//! `CancellationToken` stops everything: the stream releases the capture
//! process, the pump closes the exchange, and the consumer's read returns `None`.

pub mod exchange;
pub mod pipeline;
pub mod pump;
pub mod stats;
pub mod stream;

pub use exchange::FrameExchange;
pub use pipeline::{CaptureMode, ScreenStreamPipeline, DEFAULT_CHUNK_SIZE};
pub use pump::pump;
pub use stats::{StatsSnapshot, StreamStats};
pub use stream::ScreenStream;
