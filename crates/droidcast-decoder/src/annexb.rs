//! Incremental Annex-B parser that stitches a chunk-unaligned H.264
//! elementary stream back into complete access units.
//!
//! Bytes arrive on arbitrary boundaries. The parser keeps the unfinished tail
//! of the stream between calls and only releases an access unit once the
//! first NAL of the *next* unit has been seen, so the newest unit is always
//! held back until more data arrives or [`AccessUnitParser::finish`] is called.
//!
//! Access-unit boundaries follow H.264 §7.4.1.2.3: once the current unit
//! holds a slice, an AUD/SPS/PPS/SEI (or types 14–18) or a slice with
//! `first_mb_in_slice == 0` opens a new unit.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use droidcast_core::DecoderError;
use tracing::trace;

/// Splits an Annex-B byte stream into access units (start codes included).
#[derive(Debug, Default)]
pub struct AccessUnitParser {
    /// Unconsumed stream bytes. Once synced, always begins at a start code.
    pending: BytesMut,
    /// Absolute stream offset of `pending[0]`.
    pending_offset: u64,
    /// Position in `pending` where the next start-code search resumes.
    scan_from: usize,
    synced: bool,
    unit: BytesMut,
    unit_has_slice: bool,
    ready: VecDeque<Bytes>,
}

impl AccessUnitParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk of the stream.
    ///
    /// Fails with [`DecoderError::Parse`] on non-zero bytes before the first
    /// start code or a NAL header with `forbidden_zero_bit` set.
    pub fn push(&mut self, data: &[u8]) -> Result<(), DecoderError> {
        self.pending.extend_from_slice(data);

        if !self.synced && !self.sync()? {
            return Ok(());
        }

        loop {
            let Some(payload) = payload_start(&self.pending) else {
                // Start code not complete yet
                return Ok(());
            };
            let from = self.scan_from.max(payload);
            match find_next_nal(&self.pending, from, payload) {
                Some(end) => {
                    let nal = self.pending.split_to(end).freeze();
                    let offset = self.pending_offset;
                    self.pending_offset += end as u64;
                    self.scan_from = 0;
                    self.accept_nal(nal, offset)?;
                }
                None => {
                    // A start code may straddle the chunk boundary
                    self.scan_from = self.pending.len().saturating_sub(2).max(payload);
                    return Ok(());
                }
            }
        }
    }

    /// Next complete access unit, in stream order.
    pub fn next_unit(&mut self) -> Option<Bytes> {
        self.ready.pop_front()
    }

    /// End of stream: complete the trailing NAL and release the last unit.
    pub fn finish(&mut self) -> Result<(), DecoderError> {
        if self.synced && !self.pending.is_empty() {
            let mut tail = self.pending.split();
            while tail.last() == Some(&0) && payload_start(&tail).is_some_and(|p| tail.len() > p) {
                tail.truncate(tail.len() - 1);
            }
            let offset = self.pending_offset;
            self.pending_offset += tail.len() as u64;
            if payload_start(&tail).is_some() {
                self.accept_nal(tail.freeze(), offset)?;
            }
        }
        self.emit_unit();
        self.scan_from = 0;
        Ok(())
    }

    /// Bytes held back that do not yet belong to a released unit.
    pub fn buffered_len(&self) -> usize {
        self.pending.len() + self.unit.len()
    }

    /// Drop everything before the first start code. Only zero bytes
    /// (`leading_zero_8bits`) may precede it.
    fn sync(&mut self) -> Result<bool, DecoderError> {
        if let Some(pos) = self.pending.iter().position(|&b| b != 0) {
            if self.pending[pos] != 1 || pos < 2 {
                return Err(DecoderError::Parse {
                    offset: self.pending_offset + pos as u64,
                    reason: format!("byte 0x{:02x} before the first start code", self.pending[pos]),
                });
            }
            // Keep at most a four-byte start code
            let skip = pos.saturating_sub(3);
            let _ = self.pending.split_to(skip);
            self.pending_offset += skip as u64;
            self.synced = true;
            trace!("Annex-B stream synced at byte {}", self.pending_offset);
        }
        Ok(self.synced)
    }

    fn accept_nal(&mut self, nal: Bytes, offset: u64) -> Result<(), DecoderError> {
        let Some(start) = payload_start(&nal) else {
            return Ok(());
        };
        let Some(&header) = nal.get(start) else {
            trace!("Empty NAL at byte {}", offset);
            return Ok(());
        };
        if header & 0x80 != 0 {
            return Err(DecoderError::Parse {
                offset: offset + start as u64,
                reason: format!("forbidden_zero_bit set in NAL header 0x{header:02x}"),
            });
        }

        let nal_type = header & 0x1f;
        let is_slice = matches!(nal_type, 1..=5);
        // first_mb_in_slice is ue(v); a value of 0 encodes as a single '1' bit
        let first_slice = matches!(nal_type, 1 | 2 | 5)
            && nal.get(start + 1).is_some_and(|b| b & 0x80 != 0);
        let opens_unit = first_slice || matches!(nal_type, 6..=9 | 14..=18);

        if opens_unit && self.unit_has_slice {
            self.emit_unit();
        }
        self.unit.extend_from_slice(&nal);
        self.unit_has_slice |= is_slice;

        trace!("NAL type {} ({} bytes) at byte {}", nal_type, nal.len(), offset);
        Ok(())
    }

    fn emit_unit(&mut self) {
        if !self.unit.is_empty() {
            self.ready.push_back(self.unit.split().freeze());
        }
        self.unit_has_slice = false;
    }
}

/// Index just past the start code at the head of `buf`
/// (any run of two or more zeros followed by 0x01).
fn payload_start(buf: &[u8]) -> Option<usize> {
    let zeros = buf.iter().take_while(|&&b| b == 0).count();
    (zeros >= 2 && buf.get(zeros) == Some(&1)).then_some(zeros + 1)
}

/// Start of the next NAL's start code at or after `from`, with trailing
/// zero bytes of the current NAL attached to the next start code.
/// `floor` keeps at least the current NAL header.
fn find_next_nal(buf: &[u8], from: usize, floor: usize) -> Option<usize> {
    let hit = buf
        .get(from..)?
        .windows(3)
        .position(|w| w == [0, 0, 1])
        .map(|p| p + from)?;
    let mut end = hit;
    while end > floor + 1 && buf[end - 1] == 0 {
        end -= 1;
    }
    Some(end)
}
