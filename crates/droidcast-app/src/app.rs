use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use droidcast_core::{CaptureCommand, Resolution, StreamOptions};
use droidcast_decoder::DecoderBackend;
use droidcast_stream::{pump, FrameExchange, ScreenStreamPipeline};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Consumer progress is logged every this many frames unless overridden.
const DEFAULT_LOG_EVERY: u64 = 30;

const DEFAULT_LOG_FILTER: &str = "info";

/// Log filter from `RUST_LOG`-style directives. Unset or unparsable
/// directives fall back to `info`.
pub fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

// ── Configuration ──────────────────────────────────────────────────────────────

/// Settings read from the environment.
///
/// | Variable                  | Meaning                                        |
/// |---------------------------|------------------------------------------------|
/// | `DROIDCAST_CONFIG`        | JSON file with `StreamOptions`                 |
/// | `DROIDCAST_WIDTH`/`HEIGHT`| output size override                           |
/// | `DROIDCAST_BITRATE`       | encoder bit rate override (bits/s)             |
/// | `DROIDCAST_MAX_FPS`       | pacing override for synthetic mode             |
/// | `DROIDCAST_SYNTHETIC=1`   | generated test pattern, no device              |
/// | `DROIDCAST_ADB`           | bridge executable (default `adb`)              |
/// | `ANDROID_SERIAL`          | device serial                                  |
/// | `DROIDCAST_DECODER`       | force a GStreamer decoder element              |
/// | `DROIDCAST_DURATION_SECS` | stop automatically after this many seconds     |
/// | `DROIDCAST_LOG_EVERY`     | consumer progress log interval in frames       |
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub options: StreamOptions,
    pub synthetic: bool,
    pub adb: String,
    pub serial: Option<String>,
    pub decoder_element: Option<String>,
    pub duration: Option<Duration>,
    pub log_every: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; `lookup` returns `None` for unset names.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut options = match lookup("DROIDCAST_CONFIG") {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading DROIDCAST_CONFIG file {path}"))?;
                serde_json::from_str::<StreamOptions>(&text)
                    .with_context(|| format!("parsing stream options in {path}"))?
            }
            None => StreamOptions::default(),
        };

        if let Some(width) = parse_var(&lookup, "DROIDCAST_WIDTH")? {
            options.width = Some(width);
        }
        if let Some(height) = parse_var(&lookup, "DROIDCAST_HEIGHT")? {
            options.height = Some(height);
        }
        if let Some(bit_rate) = parse_var(&lookup, "DROIDCAST_BITRATE")? {
            options.bit_rate = bit_rate;
        }
        if let Some(max_fps) = parse_var(&lookup, "DROIDCAST_MAX_FPS")? {
            options.max_fps = max_fps;
        }

        let synthetic = lookup("DROIDCAST_SYNTHETIC")
            .is_some_and(|v| matches!(v.trim(), "1" | "true" | "yes"));
        let duration = parse_var::<u64>(&lookup, "DROIDCAST_DURATION_SECS")?.map(Duration::from_secs);
        let log_every = parse_var(&lookup, "DROIDCAST_LOG_EVERY")?.unwrap_or(DEFAULT_LOG_EVERY).max(1);

        Ok(Self {
            options,
            synthetic,
            adb: lookup("DROIDCAST_ADB").unwrap_or_else(|| "adb".to_string()),
            serial: lookup("ANDROID_SERIAL").filter(|s| !s.is_empty()),
            decoder_element: lookup("DROIDCAST_DECODER").filter(|s| !s.is_empty()),
            duration,
            log_every,
        })
    }

    pub fn pipeline(&self) -> ScreenStreamPipeline {
        if self.synthetic {
            return ScreenStreamPipeline::synthetic();
        }
        let command = CaptureCommand::screenrecord(&self.adb, self.serial.as_deref(), &self.options);
        ScreenStreamPipeline::live(command, self.decoder_backend())
    }

    #[cfg(feature = "native-decoder")]
    fn decoder_backend(&self) -> DecoderBackend {
        DecoderBackend::Native(droidcast_decoder::NativeDecoderConfig {
            element: self.decoder_element.clone(),
            ..Default::default()
        })
    }

    #[cfg(not(feature = "native-decoder"))]
    fn decoder_backend(&self) -> DecoderBackend {
        warn!("Built without the native-decoder feature; live frames are placeholders, one per chunk");
        if let Some(element) = &self.decoder_element {
            warn!("DROIDCAST_DECODER={} ignored", element);
        }
        DecoderBackend::Synthetic { resolution: self.options.resolution_or(Resolution::SYNTHETIC_DEFAULT) }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(name)
        .map(|raw| raw.trim().parse::<T>().with_context(|| format!("invalid {name}={raw:?}")))
        .transpose()
}

// ── Run ───────────────────────────────────────────────────────────────────────

/// Producer task pumps the screen stream into a one-slot exchange; this task
/// consumes it and reports progress until Ctrl-C, the optional duration, or
/// the end of the capture.
pub async fn run() -> Result<()> {
    let config = AppConfig::from_env()?;
    let cancel = CancellationToken::new();

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Ctrl-C received, stopping...");
                    cancel.cancel();
                }
                Err(e) => warn!("Ctrl-C handler unavailable: {}", e),
            }
        }
    });

    if let Some(duration) = config.duration {
        info!("Stopping automatically after {:?}", duration);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            cancel.cancel();
        });
    }

    let pipeline = config.pipeline();
    info!("Starting {:?} screen stream with {:?}", pipeline.mode(), config.options);
    let stream = pipeline
        .start(config.options.clone(), cancel.clone())
        .await
        .context("failed to start screen stream")?;
    let stats = stream.stats();

    let exchange = Arc::new(FrameExchange::new());
    let producer = tokio::spawn({
        let exchange = Arc::clone(&exchange);
        async move { pump(stream, &exchange).await }
    });

    let mut consumed = 0u64;
    let mut current: Option<Resolution> = None;
    while let Some(frame) = exchange.read().await {
        consumed += 1;
        if current != Some(frame.resolution()) {
            info!("Receiving {} {:?} frames", frame.resolution(), frame.format());
            current = Some(frame.resolution());
        }
        if consumed % config.log_every == 0 {
            info!(
                "Consumed {} frames ({} dropped) | {}",
                consumed,
                exchange.dropped(),
                stats.snapshot()
            );
        }
    }

    let produced = producer
        .await
        .context("producer task panicked")?
        .context("screen stream failed")?;

    info!(
        "Stream finished: {} produced, {} consumed, {} dropped",
        produced,
        consumed,
        exchange.dropped()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use droidcast_stream::CaptureMode;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_target_adb_screenrecord() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.options, StreamOptions::default());
        assert!(!config.synthetic);
        assert_eq!(config.adb, "adb");
        assert_eq!(config.log_every, DEFAULT_LOG_EVERY);

        match config.pipeline().mode() {
            CaptureMode::Live { command, .. } => assert_eq!(command, &CaptureCommand::default()),
            other => panic!("expected live mode, got {other:?}"),
        }
    }

    #[test]
    fn environment_overrides_options() {
        let config = config_from(&[
            ("DROIDCAST_WIDTH", "160"),
            ("DROIDCAST_HEIGHT", " 120 "),
            ("DROIDCAST_MAX_FPS", "10"),
            ("DROIDCAST_SYNTHETIC", "1"),
            ("DROIDCAST_DURATION_SECS", "5"),
            ("ANDROID_SERIAL", "emulator-5554"),
        ])
        .unwrap();

        assert_eq!(config.options.requested_resolution(), Some(Resolution::new(160, 120)));
        assert_eq!(config.options.max_fps, 10);
        assert_eq!(config.duration, Some(Duration::from_secs(5)));
        assert_eq!(config.serial.as_deref(), Some("emulator-5554"));
        assert!(matches!(config.pipeline().mode(), CaptureMode::Synthetic));
    }

    #[test]
    fn serial_and_size_reach_the_capture_command() {
        let config = config_from(&[
            ("DROIDCAST_ADB", "/opt/adb"),
            ("ANDROID_SERIAL", "R58M"),
            ("DROIDCAST_WIDTH", "720"),
            ("DROIDCAST_HEIGHT", "1280"),
        ])
        .unwrap();

        match config.pipeline().mode() {
            CaptureMode::Live { command, .. } => {
                assert_eq!(command.program, "/opt/adb");
                assert_eq!(command.args[..2], ["-s", "R58M"]);
                assert!(command.args.windows(2).any(|w| w == ["--size", "720x1280"]));
            }
            other => panic!("expected live mode, got {other:?}"),
        }
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = config_from(&[("DROIDCAST_MAX_FPS", "fast")]).unwrap_err();
        assert!(format!("{err:#}").contains("DROIDCAST_MAX_FPS"));
    }

    #[test]
    fn options_file_is_read_then_overridden() {
        let path = std::env::temp_dir().join(format!("droidcast-options-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "width": 640, "height": 480, "bitRate": 2000000 }"#).unwrap();

        let config = config_from(&[
            ("DROIDCAST_CONFIG", path.to_str().unwrap()),
            ("DROIDCAST_HEIGHT", "360"),
        ])
        .unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.options.width, Some(640));
        assert_eq!(config.options.height, Some(360));
        assert_eq!(config.options.bit_rate, 2_000_000);
        assert_eq!(config.options.max_fps, 30);
    }

    #[test]
    fn log_filter_falls_back_to_info() {
        assert_eq!(log_filter(None).to_string(), "info");
        assert_eq!(log_filter(Some("  ")).to_string(), "info");
        assert_eq!(log_filter(Some("droidcast_stream=notalevel")).to_string(), "info");

        let custom = log_filter(Some("droidcast_stream=debug")).to_string();
        assert!(custom.contains("droidcast_stream=debug"), "got {custom}");
    }
}
