//! Single-slot, most-recent-wins hand-off between producer and consumer.
//!
//! `write` never blocks: an unread frame still in the slot is discarded and
//! replaced. `read` waits for a frame, or returns `None` once the exchange is
//! closed and empty.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use droidcast_core::VideoFrame;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct Slot {
    frame: Option<VideoFrame>,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct FrameExchange {
    slot: Mutex<Slot>,
    notify: Notify,
    writes: AtomicU64,
    dropped: AtomicU64,
}

impl FrameExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frame`, discarding any unread one. Ignored after `close`.
    pub fn write(&self, frame: VideoFrame) {
        {
            let mut slot = self.lock();
            if slot.closed {
                debug!("Frame written to a closed exchange, discarding");
                return;
            }
            if slot.frame.replace(frame).is_some() {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                trace!("Unread frame replaced ({} dropped so far)", dropped);
            }
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_waiters();
    }

    /// Wait for the next frame. `None` once closed and drained.
    pub async fn read(&self) -> Option<VideoFrame> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking the slot so a concurrent write cannot be missed
            notified.as_mut().enable();

            {
                let mut slot = self.lock();
                if let Some(frame) = slot.frame.take() {
                    return Some(frame);
                }
                if slot.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Like [`read`](Self::read), but gives up with `None` when `cancel` fires.
    pub async fn read_cancellable(&self, cancel: &CancellationToken) -> Option<VideoFrame> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            frame = self.read() => frame,
        }
    }

    /// Take the current frame without waiting.
    pub fn try_read(&self) -> Option<VideoFrame> {
        self.lock().frame.take()
    }

    /// Stop accepting frames and wake every waiting reader. A frame already
    /// in the slot can still be read.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Frames accepted by `write`.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Frames replaced before anyone read them.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        // Slot contents are valid even if a holder panicked
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use droidcast_core::Resolution;
    use droidcast_decoder::synthetic_frame;

    use super::*;

    fn frame(index: u64) -> VideoFrame {
        synthetic_frame(Resolution::new(4, 4), index).unwrap()
    }

    fn index_of(frame: &VideoFrame) -> u8 {
        frame.pixel(0, 0).unwrap()[0]
    }

    #[tokio::test]
    async fn latest_write_wins() {
        let exchange = FrameExchange::new();
        exchange.write(frame(1));
        exchange.write(frame(2));

        let got = exchange.read().await.expect("frame");
        assert_eq!(index_of(&got), 2);
        assert_eq!(exchange.writes(), 2);
        assert_eq!(exchange.dropped(), 1);
        assert!(exchange.try_read().is_none());
    }

    #[tokio::test]
    async fn alternating_write_and_read_loses_nothing() {
        let exchange = FrameExchange::new();
        for i in 0..5 {
            exchange.write(frame(i));
            assert_eq!(index_of(&exchange.read().await.expect("frame")), i as u8);
        }
        assert_eq!(exchange.dropped(), 0);
    }

    #[tokio::test]
    async fn blocked_reader_wakes_on_write() {
        let exchange = Arc::new(FrameExchange::new());
        let reader = tokio::spawn({
            let exchange = Arc::clone(&exchange);
            async move { exchange.read().await }
        });

        tokio::task::yield_now().await;
        exchange.write(frame(9));

        let got = tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .expect("reader woke")
            .expect("reader task");
        assert_eq!(got.map(|f| index_of(&f)), Some(9));
    }

    #[tokio::test]
    async fn close_unblocks_a_waiting_reader() {
        let exchange = Arc::new(FrameExchange::new());
        let reader = tokio::spawn({
            let exchange = Arc::clone(&exchange);
            async move { exchange.read().await }
        });

        tokio::task::yield_now().await;
        exchange.close();

        let got = tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .expect("reader woke")
            .expect("reader task");
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn pending_frame_survives_close() {
        let exchange = FrameExchange::new();
        exchange.write(frame(3));
        exchange.close();
        exchange.write(frame(4));

        assert!(exchange.is_closed());
        assert_eq!(exchange.read().await.map(|f| index_of(&f)), Some(3));
        assert!(exchange.read().await.is_none());
        assert_eq!(exchange.writes(), 1);
    }

    #[tokio::test]
    async fn cancelled_read_returns_none() {
        let exchange = FrameExchange::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(exchange.read_cancellable(&cancel).await.is_none());
    }
}
