//! DMX universe run-length codec.
//!
//! The wire format is a sequence of segments:
//!
//! ```text
//! segment := run_segment | literal_segment
//! run_segment     := (0x80 | count:7bits) value             ; count in [3,127]
//! literal_segment := count:7bits (top bit clear) count*byte ; count in [1,127]
//! ```
//!
//! Two-byte runs are never encoded as a run segment (the 2-byte segment
//! would save nothing); they are folded into the surrounding literal.
//!
//! # Overflow contract
//!
//! [`encode`] never writes past the destination slice. When the destination
//! is too small it writes as many whole segments as fit, then a final
//! literal truncated to the remaining capacity, and reports
//! `complete = false` together with the number of bytes written. Callers
//! that transmit into fixed-size packets depend on this exact behavior.
//!
//! # Decode hardening
//!
//! Unlike the trusting reference decoder, [`decode`] validates every
//! segment against the end of the encoded slice and returns
//! [`DecodeError::Truncated`] for malformed input instead of reading out
//! of bounds.

use std::fmt;

use crate::DMX_UNIVERSE_SIZE;

/// Top bit of a segment's count byte: set for run segments.
pub const REPEAT_FLAG: u8 = 0x80;

/// Maximum per-segment count (7 usable bits).
const MAX_SEGMENT: usize = 0x7f;

/// Minimum run length worth a run segment.
const MIN_RUN: usize = 3;

/// Result of [`encode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOutcome {
    /// Bytes written into the destination slice.
    pub written: usize,
    /// True iff all of the source was consumed.
    pub complete: bool,
}

/// Length of the run of identical bytes starting at `pos`, capped at 127.
#[inline]
fn run_len(src: &[u8], pos: usize) -> usize {
    let value = src[pos];
    let mut len = 1;
    while pos + len < src.len() && src[pos + len] == value && len < MAX_SEGMENT {
        len += 1;
    }
    len
}

/// Run-length encode `src` into `dst`.
///
/// Returns the number of bytes written and whether the whole source fit.
/// See the module docs for the exact truncation behavior when `dst` is
/// too small.
pub fn encode(src: &[u8], dst: &mut [u8]) -> EncodeOutcome {
    let mut ip = 0; // next unread source byte
    let mut op = 0; // next unwritten destination byte

    while ip < src.len() {
        let run = run_len(src, ip);
        if run >= MIN_RUN {
            if dst.len() - op < 2 {
                break; // run segment cannot be split
            }
            dst[op] = REPEAT_FLAG | run as u8;
            dst[op + 1] = src[ip];
            op += 2;
            ip += run;
        } else {
            // Collect literal bytes until a run of >= 3 starts, the source
            // ends, or the segment is full.
            let start = ip;
            while ip < src.len() && ip - start < MAX_SEGMENT {
                if run_len(src, ip) >= MIN_RUN {
                    break;
                }
                ip += 1;
            }
            let want = ip - start;

            // count byte + at least one data byte must fit
            if dst.len() - op < 2 {
                ip = start;
                break;
            }
            let take = want.min(dst.len() - op - 1);
            dst[op] = take as u8;
            dst[op + 1..op + 1 + take].copy_from_slice(&src[start..start + take]);
            op += 1 + take;
            if take < want {
                ip = start + take;
                break; // truncated literal — destination exhausted
            }
        }
    }

    EncodeOutcome {
        written: op,
        complete: ip >= src.len(),
    }
}

/// Error from [`decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// A segment header promised more bytes than the encoded slice holds.
    /// The payload carried is the offset of the offending segment.
    Truncated(usize),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated(at) => write!(f, "encoded data truncated at byte {}", at),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Destination for [`decode`]: a slot buffer that accepts verbatim ranges
/// and value fills.
pub trait SlotSink {
    /// Copy `data` to slots starting at `offset`.
    fn set_range(&mut self, offset: usize, data: &[u8]);
    /// Set `count` slots starting at `offset` to `value`.
    fn fill_range(&mut self, offset: usize, value: u8, count: usize);
}

impl SlotSink for Vec<u8> {
    fn set_range(&mut self, offset: usize, data: &[u8]) {
        if self.len() < offset + data.len() {
            self.resize(offset + data.len(), 0);
        }
        self[offset..offset + data.len()].copy_from_slice(data);
    }

    fn fill_range(&mut self, offset: usize, value: u8, count: usize) {
        if self.len() < offset + count {
            self.resize(offset + count, 0);
        }
        self[offset..offset + count].fill(value);
    }
}

/// One DMX512 universe: 512 slots, writes past slot 511 are dropped.
#[derive(Clone)]
pub struct DmxBuffer {
    slots: [u8; DMX_UNIVERSE_SIZE],
}

impl DmxBuffer {
    pub fn new() -> Self {
        Self {
            slots: [0; DMX_UNIVERSE_SIZE],
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.slots
    }

    /// Reset every slot to zero.
    pub fn blackout(&mut self) {
        self.slots.fill(0);
    }
}

impl Default for DmxBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// Dumping 512 slots is useless in logs; summarize.
impl fmt::Debug for DmxBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lit = self.slots.iter().filter(|&&v| v != 0).count();
        write!(f, "DmxBuffer({} of {} slots lit)", lit, DMX_UNIVERSE_SIZE)
    }
}

impl SlotSink for DmxBuffer {
    fn set_range(&mut self, offset: usize, data: &[u8]) {
        if offset >= DMX_UNIVERSE_SIZE {
            return;
        }
        let n = data.len().min(DMX_UNIVERSE_SIZE - offset);
        self.slots[offset..offset + n].copy_from_slice(&data[..n]);
    }

    fn fill_range(&mut self, offset: usize, value: u8, count: usize) {
        if offset >= DMX_UNIVERSE_SIZE {
            return;
        }
        let n = count.min(DMX_UNIVERSE_SIZE - offset);
        self.slots[offset..offset + n].fill(value);
    }
}

/// Decode `encoded` into `dst`, the first slot landing at `start_offset`.
///
/// Returns the offset one past the last slot written.
pub fn decode<S: SlotSink>(
    start_offset: usize,
    encoded: &[u8],
    dst: &mut S,
) -> Result<usize, DecodeError> {
    let mut ip = 0;
    let mut offset = start_offset;

    while ip < encoded.len() {
        let count = (encoded[ip] & !REPEAT_FLAG) as usize;
        if encoded[ip] & REPEAT_FLAG != 0 {
            // run: one value byte follows
            if ip + 1 >= encoded.len() {
                return Err(DecodeError::Truncated(ip));
            }
            dst.fill_range(offset, encoded[ip + 1], count);
            ip += 2;
        } else {
            // literal: `count` raw bytes follow
            if ip + 1 + count > encoded.len() {
                return Err(DecodeError::Truncated(ip));
            }
            dst.set_range(offset, &encoded[ip + 1..ip + 1 + count]);
            ip += 1 + count;
        }
        offset += count;
    }

    Ok(offset)
}
