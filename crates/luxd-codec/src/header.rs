//! Streaming RPC frame header.
//!
//! Every frame on the wire starts with a packed 32-bit header:
//!
//! ```text
//! bits 31-28: protocol version (0-15)
//! bits 27-0 : payload length in bytes (0 .. 2^28-1)
//! ```
//!
//! The packed word travels big-endian. Pack/unpack here is pure bit
//! masking with no error path — out-of-range inputs are masked, and the
//! frame parser above this layer rejects versions it does not recognize.

/// Version spoken by this implementation.
pub const PROTOCOL_VERSION: u8 = 1;

/// Mask selecting the version bits of a packed header.
pub const VERSION_MASK: u32 = 0xf000_0000;

/// Mask selecting the payload-length bits of a packed header.
pub const SIZE_MASK: u32 = 0x0fff_ffff;

/// Pack `version` and payload `size` into a header word.
#[inline]
pub fn encode_header(version: u8, size: u32) -> u32 {
    ((u32::from(version) << 28) & VERSION_MASK) | (size & SIZE_MASK)
}

/// Unpack a header word into `(version, size)`.
#[inline]
pub fn decode_header(header: u32) -> (u8, u32) {
    (((header & VERSION_MASK) >> 28) as u8, header & SIZE_MASK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_versions() {
        for version in 0..=15u8 {
            for size in [0u32, 1, 42, SIZE_MASK - 1, SIZE_MASK] {
                let packed = encode_header(version, size);
                assert_eq!(decode_header(packed), (version, size));
            }
        }
    }

    #[test]
    fn test_out_of_range_inputs_masked() {
        // Version keeps only 4 bits, size only 28.
        let packed = encode_header(0xFF, 0xffff_ffff);
        assert_eq!(decode_header(packed), (0x0F, SIZE_MASK));
    }

    #[test]
    fn test_known_packing() {
        assert_eq!(encode_header(1, 6), 0x1000_0006);
        assert_eq!(decode_header(0x1000_0006), (1, 6));
    }
}
