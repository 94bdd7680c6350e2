use thiserror::Error;

use crate::types::DecoderState;

/// Failures that terminate a screen stream.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Capture process failed ({}): {stderr}", exit_label(.code))]
    Process { code: Option<i32>, stderr: String },

    #[error("Decoder error: {0}")]
    Decoder(#[from] DecoderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

#[derive(Error, Debug)]
pub enum DecoderError {
    #[error("Decoder initialization failed: {reason}")]
    Initialization { reason: String },

    #[error("Malformed bitstream at byte {offset}: {reason}")]
    Parse { offset: u64, reason: String },

    #[error("Failed to decode frame: {reason}")]
    DecodeFailed { reason: String },

    #[error("Decoder is {state}, expected ready")]
    NotReady { state: DecoderState },

    #[error("Decoder used after close")]
    Closed,

    #[error("GStreamer pipeline error: {0}")]
    GStreamerPipeline(String),

    #[error("Invalid decoded frame: {0}")]
    Frame(#[from] FrameError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame buffer holds {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Frame dimensions must be positive, got {width}×{height}")]
    EmptyDimensions { width: u32, height: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_error_reports_exit_status_and_stderr() {
        let err = StreamError::Process { code: Some(1), stderr: "error: no devices/emulators found".into() };
        assert_eq!(
            err.to_string(),
            "Capture process failed (exit code 1): error: no devices/emulators found"
        );

        let err = StreamError::Process { code: None, stderr: String::new() };
        assert!(err.to_string().contains("terminated by signal"));
    }

    #[test]
    fn decoder_errors_convert_into_stream_errors() {
        let err: StreamError = DecoderError::Parse { offset: 12, reason: "forbidden_zero_bit set".into() }.into();
        assert!(matches!(err, StreamError::Decoder(DecoderError::Parse { offset: 12, .. })));
    }
}
