//! `droidcast`: mirrors an Android device screen through `adb screenrecord`.
//!
//! `RUST_LOG` selects log verbosity, `GST_DEBUG` GStreamer's own output.

use std::process::ExitCode;

use droidcast_decoder::DecoderBackend;
use tracing::{error, info};

mod app;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(app::log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .with_target(true)
        .init();

    info!(
        "droidcast {} (default decoder: {})",
        env!("CARGO_PKG_VERSION"),
        DecoderBackend::default().name()
    );

    if let Err(e) = app::run().await {
        error!("droidcast stopped: {:#}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
