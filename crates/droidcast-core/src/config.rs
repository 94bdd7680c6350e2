use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::Resolution;

/// Frame rate used whenever `max_fps` is zero.
pub const DEFAULT_FPS: u32 = 30;

/// Screen stream configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    /// Desired output width; device-native when unset.
    pub width: Option<u32>,
    /// Desired output height; device-native when unset.
    pub height: Option<u32>,
    /// Encoder bit rate hint in bits per second. Decoders ignore it.
    #[serde(alias = "bitRate")]
    pub bit_rate: u32,
    /// Caps the synthetic generation cadence.
    #[serde(alias = "maxFps", alias = "maxFPS")]
    pub max_fps: u32,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            bit_rate: 8_000_000,
            max_fps: DEFAULT_FPS,
        }
    }
}

impl StreamOptions {
    /// `max_fps`, or 30 when it is zero.
    pub fn effective_fps(&self) -> u32 {
        if self.max_fps > 0 {
            self.max_fps
        } else {
            DEFAULT_FPS
        }
    }

    /// Pause between two synthetic frames: `1000 / effective_fps` ms.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / self.effective_fps() as u64)
    }

    /// Configured size, falling back per axis to `default`.
    pub fn resolution_or(&self, default: Resolution) -> Resolution {
        Resolution::new(
            self.width.unwrap_or(default.width),
            self.height.unwrap_or(default.height),
        )
    }

    /// Configured size only when both axes are set.
    pub fn requested_resolution(&self) -> Option<Resolution> {
        match (self.width, self.height) {
            (Some(width), Some(height)) => Some(Resolution::new(width, height)),
            _ => None,
        }
    }
}

// MARK: - CaptureCommand

/// External command whose standard output carries the H.264 elementary stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl CaptureCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// `adb [-s serial] exec-out screenrecord --output-format=h264 ... -`
    ///
    /// The bit rate is forwarded to the device-side encoder; the size only
    /// when both width and height are configured.
    pub fn screenrecord(adb: impl Into<String>, serial: Option<&str>, options: &StreamOptions) -> Self {
        let mut args = Vec::new();
        if let Some(serial) = serial {
            args.push("-s".to_string());
            args.push(serial.to_string());
        }
        args.extend(["exec-out", "screenrecord", "--output-format=h264"].map(String::from));
        if options.bit_rate > 0 {
            args.push("--bit-rate".to_string());
            args.push(options.bit_rate.to_string());
        }
        if let Some(res) = options.requested_resolution() {
            args.push("--size".to_string());
            args.push(format!("{}x{}", res.width, res.height));
        }
        args.push("-".to_string());

        Self { program: adb.into(), args }
    }
}

impl Default for CaptureCommand {
    fn default() -> Self {
        Self::screenrecord("adb", None, &StreamOptions::default())
    }
}

impl std::fmt::Display for CaptureCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}
