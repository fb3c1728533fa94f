//! Shared hard limits to prevent unbounded allocations.
//!
//! Headers arrive from files and live streams, so every size derived from them
//! goes through checked arithmetic and these caps before anything is allocated.

use crate::error::{DataError, DataResult};

/// Maximum pipe capacity in bytes (1 GiB).
pub const MAX_PIPE_BYTES: u64 = 1024 * 1024 * 1024;

/// Size of one BLUE header control block and of an extended-header block unit.
pub const BLOCK_BYTES: usize = 512;

/// Maximum extended header size accepted when parsing (16 MiB).
pub const MAX_EXTENDED_HEADER_BYTES: usize = 16 * 1024 * 1024;

/// Multiply an element count by a per-element bit width without overflow.
pub fn checked_bits(count: u64, bits_per_unit: u64, sub_element_count: u64) -> DataResult<u64> {
    count.checked_mul(bits_per_unit).ok_or_else(|| {
        DataError::invalid_geometry(count, sub_element_count, "bit size overflows 64 bits")
    })
}

/// Round a bit count up to whole bytes.
pub const fn bits_to_bytes_ceil(bits: u64) -> u64 {
    bits.div_ceil(8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_bits_overflow() {
        assert_eq!(checked_bits(4, 32, 1).unwrap(), 128);
        assert!(matches!(
            checked_bits(u64::MAX, 2, 1),
            Err(DataError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn test_round_up() {
        assert_eq!(bits_to_bytes_ceil(0), 0);
        assert_eq!(bits_to_bytes_ceil(1), 1);
        assert_eq!(bits_to_bytes_ceil(8), 1);
        assert_eq!(bits_to_bytes_ceil(9), 2);
    }
}
