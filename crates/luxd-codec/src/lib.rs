//! # luxd-codec
//!
//! Pure byte-level codecs shared by the luxd daemon and its clients:
//!
//! - [`rle`] — the DMX universe run-length codec, including the exact
//!   partial-write-on-overflow contract truncated-buffer callers rely on.
//! - [`header`] — the 4-byte streaming RPC frame header (4-bit version,
//!   28-bit payload length).
//!
//! No I/O and no external dependencies live here; the reactor and RPC
//! crates layer the transport on top.

pub mod header;
pub mod rle;

pub use header::{decode_header, encode_header, PROTOCOL_VERSION};
pub use rle::{decode, encode, DecodeError, DmxBuffer, EncodeOutcome, SlotSink};

/// Number of slots in one DMX512 universe.
pub const DMX_UNIVERSE_SIZE: usize = 512;
