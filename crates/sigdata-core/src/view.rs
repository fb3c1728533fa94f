//! Scalar-indexed access to raw data bytes.
//!
//! A [`TypedView`] interprets a byte region through a [`FormatDescriptor`] and a
//! [`ByteOrder`]. It is generic over the borrow: `TypedView<&[u8]>` reads,
//! `TypedView<&mut [u8]>` (or any `AsMut<[u8]>`) also writes.
//!
//! Two addressing modes exist:
//!
//! - [`TypedView::new`] covers a whole slice; scalar 0 starts at byte 0.
//! - [`TypedView::ring`] starts at an arbitrary bit of the slice and wraps to byte 0
//!   at the end. A scalar may then straddle the physical end, its first bytes at the
//!   tail and the rest at the head. Reads and writes reassemble it transparently.
//!
//! Packed bits are addressed most-significant-bit first: logical bit 0 is the
//! highest-order bit of the first byte.

use crate::error::{DataError, DataResult};
use crate::format::{FormatDescriptor, ScalarType};
use crate::header::ByteOrder;

/// One atom read through a view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Atom {
    /// Value of a real format.
    Real(f64),
    /// Pair of a complex format.
    Complex {
        /// Real part.
        re: f64,
        /// Imaginary part.
        im: f64,
    },
}

/// Format-aware window over a byte region.
#[derive(Debug, Clone)]
pub struct TypedView<B> {
    bytes: B,
    format: FormatDescriptor,
    order: ByteOrder,
    origin_bit: u64,
    len_scalars: usize,
}

impl<B: AsRef<[u8]>> TypedView<B> {
    /// View the whole of `bytes`. Trailing bytes that cannot hold a full scalar are
    /// not addressable.
    pub fn new(bytes: B, format: FormatDescriptor, order: ByteOrder) -> Self {
        let cap_bits = bytes.as_ref().len() as u64 * 8;
        let len_scalars = (cap_bits / u64::from(format.bits_per_scalar())) as usize;
        Self {
            bytes,
            format,
            order,
            origin_bit: 0,
            len_scalars,
        }
    }

    /// View the whole of `bytes` as real 32-bit floats in native byte order.
    pub fn float32(bytes: B) -> Self {
        Self::new(bytes, FormatDescriptor::default(), ByteOrder::NATIVE)
    }

    /// View `len_scalars` scalars starting at `start_bit`, wrapping at the end of
    /// `bytes`.
    ///
    /// Fails with [`DataError::OutOfRange`] when the start lies outside the region or
    /// the window is longer than the region.
    pub fn ring(
        bytes: B,
        format: FormatDescriptor,
        order: ByteOrder,
        start_bit: u64,
        len_scalars: usize,
    ) -> DataResult<Self> {
        let cap_bits = bytes.as_ref().len() as u64 * 8;
        let capacity_scalars = (cap_bits / u64::from(format.bits_per_scalar())) as usize;
        let window_bits = len_scalars as u64 * u64::from(format.bits_per_scalar());

        if window_bits > cap_bits {
            return Err(DataError::OutOfRange {
                index: len_scalars,
                len: capacity_scalars,
            });
        }
        if cap_bits > 0 && start_bit >= cap_bits {
            return Err(DataError::OutOfRange {
                index: (start_bit / 8) as usize,
                len: bytes.as_ref().len(),
            });
        }

        Ok(Self {
            bytes,
            format,
            order,
            origin_bit: start_bit,
            len_scalars,
        })
    }

    /// Format the bytes are interpreted with.
    pub fn format(&self) -> &FormatDescriptor {
        &self.format
    }

    /// Byte order of multi-byte scalars.
    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Addressable scalars.
    pub fn len_scalars(&self) -> usize {
        self.len_scalars
    }

    /// Addressable whole atoms.
    pub fn len_atoms(&self) -> usize {
        self.len_scalars / self.format.scalars_per_atom() as usize
    }

    /// Whether no scalar is addressable.
    pub fn is_empty(&self) -> bool {
        self.len_scalars == 0
    }

    /// Read scalar `index` as `f64`.
    pub fn read_scalar(&self, index: usize) -> DataResult<f64> {
        let bit = self.physical_bit(index)?;
        let bytes = self.bytes.as_ref();

        if self.format.is_packed() {
            let byte = bytes[(bit / 8) as usize];
            let shift = 7 - (bit % 8) as u32;
            return Ok(f64::from((byte >> shift) & 1));
        }

        let width = self.format.scalar_type().byte_width();
        let first = (bit / 8) as usize;
        let mut raw = [0u8; 8];
        for (k, slot) in raw.iter_mut().take(width).enumerate() {
            *slot = bytes[(first + k) % bytes.len()];
        }
        Ok(decode(self.format.scalar_type(), self.order, &raw))
    }

    /// Read atom `index`: one scalar for real formats, two consecutive scalars for
    /// complex formats.
    pub fn read_atom(&self, index: usize) -> DataResult<Atom> {
        if self.format.is_complex() {
            let re = self.read_scalar(index * 2)?;
            let im = self.read_scalar(index * 2 + 1)?;
            Ok(Atom::Complex { re, im })
        } else {
            Ok(Atom::Real(self.read_scalar(index)?))
        }
    }

    /// Read `dest.len()` scalars starting at scalar `first`.
    pub fn read_scalars_into(&self, first: usize, dest: &mut [f64]) -> DataResult<()> {
        let end = first.saturating_add(dest.len());
        if end > self.len_scalars {
            return Err(DataError::OutOfRange {
                index: end.saturating_sub(1),
                len: self.len_scalars,
            });
        }
        for (offset, slot) in dest.iter_mut().enumerate() {
            *slot = self.read_scalar(first + offset)?;
        }
        Ok(())
    }

    /// Every scalar in order.
    pub fn to_vec(&self) -> Vec<f64> {
        (0..self.len_scalars)
            .filter_map(|i| self.read_scalar(i).ok())
            .collect()
    }

    fn physical_bit(&self, index: usize) -> DataResult<u64> {
        if index >= self.len_scalars {
            return Err(DataError::OutOfRange {
                index,
                len: self.len_scalars,
            });
        }
        let cap_bits = self.bytes.as_ref().len() as u64 * 8;
        let logical = index as u64 * u64::from(self.format.bits_per_scalar());
        Ok((self.origin_bit + logical) % cap_bits)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> TypedView<B> {
    /// Write `value` to scalar `index`.
    ///
    /// Integers saturate at their range. For packed formats only the target bit is
    /// modified: any nonzero value sets it, zero clears it.
    pub fn write_scalar(&mut self, index: usize, value: f64) -> DataResult<()> {
        let bit = self.physical_bit(index)?;
        let order = self.order;
        let scalar = self.format.scalar_type();
        let bytes = self.bytes.as_mut();

        if scalar == ScalarType::Bit {
            let byte = &mut bytes[(bit / 8) as usize];
            let mask = 1u8 << (7 - (bit % 8) as u32);
            if value != 0.0 {
                *byte |= mask;
            } else {
                *byte &= !mask;
            }
            return Ok(());
        }

        let width = scalar.byte_width();
        let raw = encode(scalar, order, value);
        let first = (bit / 8) as usize;
        let len = bytes.len();
        for (k, &b) in raw.iter().take(width).enumerate() {
            bytes[(first + k) % len] = b;
        }
        Ok(())
    }

    /// Write atom `index`. The atom's shape must match the format.
    pub fn write_atom(&mut self, index: usize, atom: Atom) -> DataResult<()> {
        match (atom, self.format.is_complex()) {
            (Atom::Real(v), false) => self.write_scalar(index, v),
            (Atom::Complex { re, im }, true) => {
                // Check the whole atom first so a failure cannot leave half of it written.
                self.physical_bit(index * 2 + 1)?;
                self.write_scalar(index * 2, re)?;
                self.write_scalar(index * 2 + 1, im)
            }
            _ => Err(DataError::OutOfRange {
                index,
                len: self.len_atoms(),
            }),
        }
    }
}

macro_rules! decode_as {
    ($ty:ty, $n:literal, $order:expr, $raw:expr) => {{
        let mut buf = [0u8; $n];
        buf.copy_from_slice(&$raw[..$n]);
        match $order {
            ByteOrder::Little => <$ty>::from_le_bytes(buf),
            ByteOrder::Big => <$ty>::from_be_bytes(buf),
        }
    }};
}

macro_rules! encode_as {
    ($value:expr, $order:expr) => {{
        let bytes = match $order {
            ByteOrder::Little => $value.to_le_bytes(),
            ByteOrder::Big => $value.to_be_bytes(),
        };
        let mut raw = [0u8; 8];
        raw[..bytes.len()].copy_from_slice(&bytes);
        raw
    }};
}

fn decode(scalar: ScalarType, order: ByteOrder, raw: &[u8; 8]) -> f64 {
    match scalar {
        ScalarType::Bit => f64::from(raw[0] & 1),
        ScalarType::Int8 => f64::from(raw[0] as i8),
        ScalarType::UInt8 => f64::from(raw[0]),
        ScalarType::Int16 => f64::from(decode_as!(i16, 2, order, raw)),
        ScalarType::UInt16 => f64::from(decode_as!(u16, 2, order, raw)),
        ScalarType::Int32 => f64::from(decode_as!(i32, 4, order, raw)),
        ScalarType::UInt32 => f64::from(decode_as!(u32, 4, order, raw)),
        ScalarType::Int64 => decode_as!(i64, 8, order, raw) as f64,
        ScalarType::Float32 => f64::from(decode_as!(f32, 4, order, raw)),
        ScalarType::Float64 => decode_as!(f64, 8, order, raw),
    }
}

fn encode(scalar: ScalarType, order: ByteOrder, value: f64) -> [u8; 8] {
    match scalar {
        ScalarType::Bit => [u8::from(value != 0.0), 0, 0, 0, 0, 0, 0, 0],
        ScalarType::Int8 => encode_as!(value as i8, order),
        ScalarType::UInt8 => encode_as!(value as u8, order),
        ScalarType::Int16 => encode_as!(value as i16, order),
        ScalarType::UInt16 => encode_as!(value as u16, order),
        ScalarType::Int32 => encode_as!(value as i32, order),
        ScalarType::UInt32 => encode_as!(value as u32, order),
        ScalarType::Int64 => encode_as!(value as i64, order),
        ScalarType::Float32 => encode_as!(value as f32, order),
        ScalarType::Float64 => encode_as!(value, order),
    }
}

/// Append the encoding of `scalars` to `out`.
///
/// Packed formats are encoded most-significant-bit first, zero-padding the final
/// byte.
pub fn encode_scalars(
    format: &FormatDescriptor,
    order: ByteOrder,
    scalars: &[f64],
    out: &mut Vec<u8>,
) {
    let scalar = format.scalar_type();
    if format.is_packed() {
        for chunk in scalars.chunks(8) {
            let mut byte = 0u8;
            for (i, &v) in chunk.iter().enumerate() {
                if v != 0.0 {
                    byte |= 0x80 >> i;
                }
            }
            out.push(byte);
        }
        return;
    }

    let width = scalar.byte_width();
    out.reserve(scalars.len() * width);
    for &v in scalars {
        out.extend_from_slice(&encode(scalar, order, v)[..width]);
    }
}

/// Decode every whole scalar in `bytes`.
pub fn decode_scalars(format: &FormatDescriptor, order: ByteOrder, bytes: &[u8]) -> Vec<f64> {
    TypedView::new(bytes, *format, order).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(code: &str) -> FormatDescriptor {
        *FormatDescriptor::resolve(code).unwrap()
    }

    #[test]
    fn test_float32_view_defaults() {
        let mut store = [0u8; 10];
        let mut view = TypedView::float32(&mut store[..]);
        assert_eq!(view.format(), &fmt("SF"));
        assert_eq!(view.len_atoms(), 2);

        view.write_scalar(1, -0.5).unwrap();
        assert_eq!(&store[4..8], &(-0.5f32).to_ne_bytes());
    }

    #[test]
    fn test_packed_bits_msb_first() {
        let mut store = [0u8; 1];
        let pattern = [1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0];
        let mut view = TypedView::new(&mut store[..], fmt("SP"), ByteOrder::Little);
        for (i, &bit) in pattern.iter().enumerate() {
            view.write_scalar(i, bit).unwrap();
        }
        assert_eq!(store[0], 0b1010_0011);

        let view = TypedView::new(&store[..], fmt("SP"), ByteOrder::Little);
        for (i, &bit) in pattern.iter().enumerate() {
            assert_eq!(view.read_scalar(i).unwrap(), bit, "bit {i}");
        }
    }

    #[test]
    fn test_packed_write_touches_one_bit() {
        let mut store = [0b0101_0101u8, 0xFF];
        let mut view = TypedView::new(&mut store[..], fmt("SP"), ByteOrder::Little);
        view.write_scalar(0, 1.0).unwrap();
        view.write_scalar(15, 0.0).unwrap();
        assert_eq!(store, [0b1101_0101, 0b1111_1110]);
    }

    #[test]
    fn test_big_endian_is_swapped() {
        let store = [0x01u8, 0x02, 0x03, 0x04];
        let be = TypedView::new(&store[..], fmt("SI"), ByteOrder::Big);
        let le = TypedView::new(&store[..], fmt("SI"), ByteOrder::Little);
        assert_eq!(be.read_scalar(0).unwrap(), f64::from(0x0102u16));
        assert_eq!(le.read_scalar(0).unwrap(), f64::from(0x0201u16));
        assert_eq!(be.read_scalar(1).unwrap(), f64::from(0x0304u16));
    }

    #[test]
    fn test_float_roundtrip_both_orders() {
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let mut store = vec![0u8; 16];
            let mut view = TypedView::new(&mut store[..], fmt("SD"), order);
            view.write_scalar(1, -2.5e10).unwrap();
            assert_eq!(view.read_scalar(1).unwrap(), -2.5e10);
        }
    }

    #[test]
    fn test_complex_atoms_pair_consecutive_scalars() {
        let mut bytes = Vec::new();
        encode_scalars(&fmt("CF"), ByteOrder::Little, &[1.0, 2.0, 3.0, 4.0], &mut bytes);
        let view = TypedView::new(&bytes[..], fmt("CF"), ByteOrder::Little);
        assert_eq!(view.len_atoms(), 2);
        assert_eq!(view.read_atom(1).unwrap(), Atom::Complex { re: 3.0, im: 4.0 });
    }

    #[test]
    fn test_out_of_range() {
        let store = [0u8; 8];
        let view = TypedView::new(&store[..], fmt("SF"), ByteOrder::Little);
        assert_eq!(
            view.read_scalar(2),
            Err(DataError::OutOfRange { index: 2, len: 2 })
        );
        let packed = TypedView::new(&store[..], fmt("SP"), ByteOrder::Little);
        assert_eq!(packed.len_scalars(), 64);
        assert!(packed.read_scalar(64).is_err());
    }

    #[test]
    fn test_ring_view_reads_straddling_scalar() {
        // A 4-byte float whose first two bytes sit at the tail of the region.
        let value = 1234.5f32.to_le_bytes();
        let store = [value[2], value[3], 0, 0, 0, 0, value[0], value[1]];
        let view = TypedView::ring(&store[..], fmt("SF"), ByteOrder::Little, 6 * 8, 1).unwrap();
        assert_eq!(view.read_scalar(0).unwrap(), 1234.5);
    }

    #[test]
    fn test_ring_view_writes_wrap() {
        let mut store = [0u8; 12];
        let mut view =
            TypedView::ring(&mut store[..], fmt("CF"), ByteOrder::Little, 8 * 8, 2).unwrap();
        view.write_atom(0, Atom::Complex { re: 5.0, im: 6.0 }).unwrap();
        let view = TypedView::ring(&store[..], fmt("CF"), ByteOrder::Little, 8 * 8, 2).unwrap();
        assert_eq!(view.read_atom(0).unwrap(), Atom::Complex { re: 5.0, im: 6.0 });
        assert_eq!(&store[0..4], &6.0f32.to_le_bytes());
    }

    #[test]
    fn test_ring_window_too_long() {
        let store = [0u8; 8];
        assert!(TypedView::ring(&store[..], fmt("SF"), ByteOrder::Little, 0, 3).is_err());
        assert!(TypedView::ring(&store[..], fmt("SF"), ByteOrder::Little, 64, 1).is_err());
    }

    #[test]
    fn test_integers_saturate() {
        let mut store = [0u8; 2];
        let mut view = TypedView::new(&mut store[..], fmt("SB"), ByteOrder::Little);
        view.write_scalar(0, 1000.0).unwrap();
        view.write_scalar(1, -1000.0).unwrap();
        assert_eq!(view.read_scalar(0).unwrap(), 127.0);
        assert_eq!(view.read_scalar(1).unwrap(), -128.0);
    }

    #[test]
    fn test_write_atom_shape_mismatch() {
        let mut store = [0u8; 8];
        let mut view = TypedView::new(&mut store[..], fmt("SF"), ByteOrder::Little);
        assert!(view.write_atom(0, Atom::Complex { re: 1.0, im: 2.0 }).is_err());
    }

    #[test]
    fn test_encode_packed_pads_final_byte() {
        let mut out = Vec::new();
        encode_scalars(&fmt("SP"), ByteOrder::Little, &[1.0, 1.0, 0.0, 1.0], &mut out);
        assert_eq!(out, vec![0b1101_0000]);
        let bits = decode_scalars(&fmt("SP"), ByteOrder::Little, &out);
        assert_eq!(&bits[..4], &[1.0, 1.0, 0.0, 1.0]);
        assert_eq!(bits.len(), 8);
    }
}
