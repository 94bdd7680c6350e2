use std::sync::atomic::{AtomicU64, Ordering};

/// Per-stream counters, shared between the stream and any observer.
#[derive(Debug, Default)]
pub struct StreamStats {
    chunks_read: AtomicU64,
    bytes_read: AtomicU64,
    frames_produced: AtomicU64,
}

impl StreamStats {
    pub fn record_chunk(&self, len: usize) {
        self.chunks_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn record_frame(&self) {
        self.frames_produced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chunks_read(&self) -> u64 {
        self.chunks_read.load(Ordering::Relaxed)
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn frames_produced(&self) -> u64 {
        self.frames_produced.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            chunks_read: self.chunks_read(),
            bytes_read: self.bytes_read(),
            frames_produced: self.frames_produced(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub chunks_read: u64,
    pub bytes_read: u64,
    pub frames_produced: u64,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} frames from {} chunks ({} bytes)",
            self.frames_produced, self.chunks_read, self.bytes_read
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = StreamStats::default();
        stats.record_chunk(65_536);
        stats.record_chunk(100);
        stats.record_frame();

        let snap = stats.snapshot();
        assert_eq!(snap, StatsSnapshot { chunks_read: 2, bytes_read: 65_636, frames_produced: 1 });
        assert_eq!(snap.to_string(), "1 frames from 2 chunks (65636 bytes)");
    }
}
