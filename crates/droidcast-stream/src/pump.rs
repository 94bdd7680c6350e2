use droidcast_core::StreamError;
use tracing::info;

use crate::exchange::FrameExchange;
use crate::stream::ScreenStream;

/// Closes the exchange however the pump exits, including when its task is aborted.
struct CloseGuard<'a>(&'a FrameExchange);

impl Drop for CloseGuard<'_> {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Drive `stream` to completion, writing every frame into `exchange`.
///
/// Returns the number of frames written. The exchange is closed on return,
/// so a consumer blocked in [`FrameExchange::read`] sees `None`.
pub async fn pump(mut stream: ScreenStream, exchange: &FrameExchange) -> Result<u64, StreamError> {
    let _close = CloseGuard(exchange);
    let mut written = 0u64;

    while let Some(item) = stream.next().await {
        exchange.write(item?);
        written += 1;
    }

    info!("Producer finished: {} frames written, {} dropped unread", written, exchange.dropped());
    Ok(written)
}
