//! Two-letter data format codes.
//!
//! A format code names the shape of one atom followed by the type of its scalars:
//! `SF` is a real 32-bit float, `CI` a complex pair of 16-bit integers, `SP` a single
//! packed bit. The table is closed and versioned, so it lives in a lazily built
//! static map and is never mutated.

use crate::error::{DataError, DataResult};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Number of scalars in one atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shape {
    /// One real scalar (`S`).
    Scalar,
    /// Real and imaginary scalars (`C`).
    Complex,
}

impl Shape {
    /// Scalars per atom.
    pub const fn scalars(self) -> u32 {
        match self {
            Shape::Scalar => 1,
            Shape::Complex => 2,
        }
    }

    /// Code letter.
    pub const fn letter(self) -> char {
        match self {
            Shape::Scalar => 'S',
            Shape::Complex => 'C',
        }
    }
}

/// Broad numeric category of a scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    /// Two's complement integer.
    SignedInt,
    /// Unsigned integer.
    UnsignedInt,
    /// IEEE 754 float.
    Float,
    /// Single bit, packed eight to a byte.
    Bit,
}

/// Storage type of a single scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    /// `P`
    Bit,
    /// `B`
    Int8,
    /// `O`
    UInt8,
    /// `I`
    Int16,
    /// `U`
    UInt16,
    /// `L`
    Int32,
    /// `V`
    UInt32,
    /// `X`
    Int64,
    /// `F`
    Float32,
    /// `D`
    Float64,
}

impl ScalarType {
    /// Every scalar type in code-table order.
    pub const ALL: [ScalarType; 10] = [
        ScalarType::Bit,
        ScalarType::Int8,
        ScalarType::UInt8,
        ScalarType::Int16,
        ScalarType::UInt16,
        ScalarType::Int32,
        ScalarType::UInt32,
        ScalarType::Int64,
        ScalarType::Float32,
        ScalarType::Float64,
    ];

    /// Width of one scalar in bits.
    pub const fn bits(self) -> u32 {
        match self {
            ScalarType::Bit => 1,
            ScalarType::Int8 | ScalarType::UInt8 => 8,
            ScalarType::Int16 | ScalarType::UInt16 => 16,
            ScalarType::Int32 | ScalarType::UInt32 | ScalarType::Float32 => 32,
            ScalarType::Int64 | ScalarType::Float64 => 64,
        }
    }

    /// Width of one scalar in whole bytes; 0 for packed bits.
    pub const fn byte_width(self) -> usize {
        (self.bits() / 8) as usize
    }

    /// Numeric category.
    pub const fn kind(self) -> ScalarKind {
        match self {
            ScalarType::Bit => ScalarKind::Bit,
            ScalarType::Int8 | ScalarType::Int16 | ScalarType::Int32 | ScalarType::Int64 => {
                ScalarKind::SignedInt
            }
            ScalarType::UInt8 | ScalarType::UInt16 | ScalarType::UInt32 => ScalarKind::UnsignedInt,
            ScalarType::Float32 | ScalarType::Float64 => ScalarKind::Float,
        }
    }

    /// Code letter.
    pub const fn letter(self) -> char {
        match self {
            ScalarType::Bit => 'P',
            ScalarType::Int8 => 'B',
            ScalarType::UInt8 => 'O',
            ScalarType::Int16 => 'I',
            ScalarType::UInt16 => 'U',
            ScalarType::Int32 => 'L',
            ScalarType::UInt32 => 'V',
            ScalarType::Int64 => 'X',
            ScalarType::Float32 => 'F',
            ScalarType::Float64 => 'D',
        }
    }
}

/// Resolved layout of one atom.
///
/// Obtain instances through [`FormatDescriptor::resolve`]; every descriptor handed
/// out is a `'static` entry of the process-wide table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormatDescriptor {
    shape: Shape,
    scalar: ScalarType,
}

static FORMATS: Lazy<HashMap<[u8; 2], FormatDescriptor>> = Lazy::new(|| {
    let mut table = HashMap::new();
    for shape in [Shape::Scalar, Shape::Complex] {
        for scalar in ScalarType::ALL {
            // Bits only pack as real scalars.
            if shape == Shape::Complex && scalar == ScalarType::Bit {
                continue;
            }
            let code = [shape.letter() as u8, scalar.letter() as u8];
            table.insert(code, FormatDescriptor { shape, scalar });
        }
    }
    table
});

impl FormatDescriptor {
    /// Look up a two-letter format code such as `"SF"` or `"CI"`.
    ///
    /// Codes are matched exactly; lowercase codes are not part of the vocabulary.
    pub fn resolve(code: &str) -> DataResult<&'static FormatDescriptor> {
        let unknown = || DataError::UnknownFormat {
            code: code.to_string(),
        };
        let key: [u8; 2] = code.as_bytes().try_into().map_err(|_| unknown())?;
        FORMATS.get(&key).ok_or_else(unknown)
    }

    /// Atom shape.
    pub const fn shape(&self) -> Shape {
        self.shape
    }

    /// Scalar storage type.
    pub const fn scalar_type(&self) -> ScalarType {
        self.scalar
    }

    /// Numeric category of the scalars.
    pub const fn scalar_kind(&self) -> ScalarKind {
        self.scalar.kind()
    }

    /// Scalars per atom (1 real, 2 complex).
    pub const fn scalars_per_atom(&self) -> u32 {
        self.shape.scalars()
    }

    /// Bits per scalar (1 for packed formats).
    pub const fn bits_per_scalar(&self) -> u32 {
        self.scalar.bits()
    }

    /// Bits per atom.
    pub const fn bits_per_atom(&self) -> u32 {
        self.bits_per_scalar() * self.scalars_per_atom()
    }

    /// Bytes per scalar; `0.125` for packed bits.
    pub fn bytes_per_scalar(&self) -> f64 {
        f64::from(self.bits_per_scalar()) / 8.0
    }

    /// Bytes per atom; below one for packed bits.
    pub fn bytes_per_atom(&self) -> f64 {
        f64::from(self.bits_per_atom()) / 8.0
    }

    /// Whether atoms are smaller than a byte.
    pub const fn is_packed(&self) -> bool {
        matches!(self.scalar, ScalarType::Bit)
    }

    /// Whether atoms carry a real/imaginary pair.
    pub const fn is_complex(&self) -> bool {
        matches!(self.shape, Shape::Complex)
    }

    /// The two-letter code.
    pub fn code(&self) -> String {
        format!("{}{}", self.shape.letter(), self.scalar.letter())
    }
}

/// Real 32-bit float (`SF`), the format of a view built without one.
impl Default for FormatDescriptor {
    fn default() -> Self {
        Self {
            shape: Shape::Scalar,
            scalar: ScalarType::Float32,
        }
    }
}

impl fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.shape.letter(), self.scalar.letter())
    }
}

impl FromStr for FormatDescriptor {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FormatDescriptor::resolve(s).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_real_float() {
        let sf = FormatDescriptor::resolve("SF").unwrap();
        assert_eq!(sf.scalars_per_atom(), 1);
        assert_eq!(sf.bits_per_scalar(), 32);
        assert_eq!(sf.bytes_per_atom(), 4.0);
        assert_eq!(sf.scalar_kind(), ScalarKind::Float);
        assert!(!sf.is_packed());
    }

    #[test]
    fn test_resolve_complex_widths() {
        for (code, bytes) in [("CB", 2.0), ("CI", 4.0), ("CL", 8.0), ("CF", 8.0), ("CD", 16.0), ("CX", 16.0)] {
            let fmt = FormatDescriptor::resolve(code).unwrap();
            assert!(fmt.is_complex(), "{code}");
            assert_eq!(fmt.bytes_per_atom(), bytes, "{code}");
        }
    }

    #[test]
    fn test_packed_bit_is_an_eighth_of_a_byte() {
        let sp = FormatDescriptor::resolve("SP").unwrap();
        assert!(sp.is_packed());
        assert_eq!(sp.bits_per_atom(), 1);
        assert_eq!(sp.bytes_per_atom(), 0.125);
    }

    #[test]
    fn test_unsigned_kinds() {
        assert_eq!(FormatDescriptor::resolve("SO").unwrap().scalar_kind(), ScalarKind::UnsignedInt);
        assert_eq!(FormatDescriptor::resolve("SU").unwrap().bits_per_scalar(), 16);
        assert_eq!(FormatDescriptor::resolve("SV").unwrap().bits_per_scalar(), 32);
        assert_eq!(FormatDescriptor::resolve("SB").unwrap().scalar_kind(), ScalarKind::SignedInt);
    }

    #[test]
    fn test_unknown_codes() {
        for code in ["", "S", "SFX", "CP", "ZF", "sf", "SA"] {
            let err = FormatDescriptor::resolve(code).unwrap_err();
            assert_eq!(
                err,
                DataError::UnknownFormat {
                    code: code.to_string()
                }
            );
        }
    }

    #[test]
    fn test_display_and_from_str_agree() {
        let fmt: FormatDescriptor = "CD".parse().unwrap();
        assert_eq!(fmt.to_string(), "CD");
        assert_eq!(fmt.code(), "CD");
    }

    #[test]
    fn test_default_is_real_float() {
        assert_eq!(FormatDescriptor::default(), *FormatDescriptor::resolve("SF").unwrap());
    }

    #[test]
    fn test_table_is_shared() {
        let a = FormatDescriptor::resolve("SI").unwrap();
        let b = FormatDescriptor::resolve("SI").unwrap();
        assert!(std::ptr::eq(a, b));
    }
}
