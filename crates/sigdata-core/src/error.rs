//! Error types for the sigdata data engine.
//!
//! This module defines [`DataError`], the single error type returned by the format
//! table, the header model, typed views and the pipe. Using the `thiserror` crate,
//! each failure carries the values that caused it so callers can report or recover
//! without string matching.
//!
//! ## Error Categories
//!
//! - **`UnknownFormat`**: A two-letter format code is not part of the vocabulary.
//!   Fatal to the request that supplied it, never to the process.
//! - **`InvalidGeometry`**: A header declares an element/sub-element relationship
//!   that cannot exist (zero sub-elements, a matrix remainder, overflow).
//! - **`OutOfRange`**: An index outside a view. This is a contract violation by the
//!   caller.
//! - **`PipeFull`**: A fill would overwrite unread data. The only recoverable error:
//!   drain and retry, or drop the frame.
//! - **`MisalignedCapacity`**: A pipe was configured with a capacity that cannot
//!   hold whole elements.
//! - **`MalformedHeader`**: Header bytes could not be decoded.

use thiserror::Error;

/// Convenience alias for results using [`DataError`].
pub type DataResult<T> = std::result::Result<T, DataError>;

/// Primary error type for format, geometry, view and pipe operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    /// The format code is not in the format table.
    ///
    /// **Error Type**: Permanent for this input. The caller supplied a code such as
    /// `"ZZ"` or `"CP"` (complex packed bits are not a format).
    #[error("Unknown format code '{code}'")]
    UnknownFormat {
        /// The code exactly as supplied.
        code: String,
    },

    /// The declared geometry is impossible.
    ///
    /// **Error Type**: Permanent. Surfaced to whoever asked for the geometry; no
    /// silent truncation of a matrix remainder takes place.
    #[error("Invalid geometry ({element_count} elements, {sub_element_count} per row): {reason}")]
    InvalidGeometry {
        /// Declared element count along the primary axis.
        element_count: u64,
        /// Declared atoms per row.
        sub_element_count: u64,
        /// What is wrong with the combination.
        reason: String,
    },

    /// A scalar or atom index outside the view.
    ///
    /// **Error Type**: Programmer error. Callers should treat it as a contract
    /// violation rather than retry.
    #[error("Index {index} out of range for view of {len} scalars")]
    OutOfRange {
        /// Requested scalar index.
        index: usize,
        /// Number of addressable scalars.
        len: usize,
    },

    /// A fill needs more free space than the pipe currently has.
    ///
    /// **Error Type**: Transient. State is unchanged; drain and retry, or drop the
    /// incoming frame.
    #[error("Pipe full: fill needs {needed_bytes} bytes but only {available_bytes} bytes are free")]
    PipeFull {
        /// Bytes the rejected fill required (rounded up for packed formats).
        needed_bytes: u64,
        /// Bytes free at the time of the call.
        available_bytes: u64,
    },

    /// The pipe capacity is not a whole number of elements.
    ///
    /// **Error Type**: Configuration error at construction time.
    #[error("Pipe capacity {capacity_bytes} bytes does not hold whole {element_bits}-bit elements")]
    MisalignedCapacity {
        /// Requested capacity in bytes.
        capacity_bytes: u64,
        /// Size of one element in bits.
        element_bits: u64,
    },

    /// Header bytes could not be decoded.
    #[error("Malformed header: {0}")]
    MalformedHeader(String),
}

impl DataError {
    /// Shorthand for an [`DataError::InvalidGeometry`] error.
    pub fn invalid_geometry(
        element_count: u64,
        sub_element_count: u64,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidGeometry {
            element_count,
            sub_element_count,
            reason: reason.into(),
        }
    }

    /// Whether the caller can recover by retrying later without reconfiguring.
    ///
    /// Only [`DataError::PipeFull`] qualifies.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DataError::PipeFull { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_pipe_full_is_recoverable() {
        let full = DataError::PipeFull {
            needed_bytes: 8,
            available_bytes: 0,
        };
        assert!(full.is_recoverable());
        assert!(!DataError::MalformedHeader("x".into()).is_recoverable());
        assert!(!DataError::OutOfRange { index: 3, len: 2 }.is_recoverable());
    }

    #[test]
    fn test_messages_carry_values() {
        let err = DataError::invalid_geometry(10, 4, "10 is not a multiple of 4");
        let msg = err.to_string();
        assert!(msg.contains("10 elements"));
        assert!(msg.contains("4 per row"));
    }
}
