pub mod config;
pub mod errors;
pub mod types;

pub use config::{CaptureCommand, StreamOptions};
pub use errors::{DecoderError, FrameError, StreamError};
pub use types::*;
