//! Header model: geometry, axes and ordered keyword metadata.
//!
//! A [`HeaderModel`] is created when a data source is opened or declared. Its
//! geometry is validated once and cached as a [`Geometry`] snapshot; callers that
//! hold a snapshot can ask [`HeaderModel::is_current`] whether it is still valid after
//! a [`HeaderModel::reload`]. The model never pushes change notifications.
//!
//! # Example
//! ```
//! use sigdata_core::format::FormatDescriptor;
//! use sigdata_core::header::{HeaderModel, KeywordValue};
//!
//! let cf = FormatDescriptor::resolve("CF")?;
//! let header = HeaderModel::builder(*cf)
//!     .matrix(32, 4)
//!     .x_axis(0.0, 0.5, 1)
//!     .extended("COMMENT", "first")
//!     .extended("COMMENT", "second")
//!     .build()?;
//!
//! let geometry = header.geometry();
//! assert_eq!(geometry.rows(), 8);
//! assert_eq!(geometry.bytes_per_row(), 32.0);
//! assert_eq!(header.extended_metadata().get_all("COMMENT").len(), 2);
//! assert_eq!(
//!     header.extended_metadata().get("COMMENT"),
//!     Some(&KeywordValue::Ascii("first".into()))
//! );
//! # Ok::<(), sigdata_core::error::DataError>(())
//! ```

use crate::error::{DataError, DataResult};
use crate::format::FormatDescriptor;
use crate::limits::{bits_to_bytes_ceil, checked_bits};
use serde::{Deserialize, Serialize};

/// How elements are arranged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layout {
    /// One-dimensional series (BLUE type 1000). One atom per element.
    Flat,
    /// Raster of rows (BLUE type 2000). One row of `sub_element_count` atoms per element.
    Matrix,
}

impl Layout {
    /// BLUE file type number.
    pub const fn type_code(self) -> i32 {
        match self {
            Layout::Flat => 1000,
            Layout::Matrix => 2000,
        }
    }

    /// Layout for a BLUE file type number (the class is the thousands digit).
    pub fn from_type_code(code: i32) -> Option<Self> {
        match code / 1000 {
            1 => Some(Layout::Flat),
            2 => Some(Layout::Matrix),
            _ => None,
        }
    }
}

/// Byte order of multi-byte scalars in the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ByteOrder {
    /// `EEEI`
    #[default]
    Little,
    /// `IEEE`
    Big,
}

impl ByteOrder {
    /// Byte order of the running platform.
    #[cfg(target_endian = "little")]
    pub const NATIVE: ByteOrder = ByteOrder::Little;
    /// Byte order of the running platform.
    #[cfg(target_endian = "big")]
    pub const NATIVE: ByteOrder = ByteOrder::Big;

    /// Four-character representation tag used in BLUE headers.
    pub const fn rep(self) -> &'static [u8; 4] {
        match self {
            ByteOrder::Little => b"EEEI",
            ByteOrder::Big => b"IEEE",
        }
    }

    /// Parse a representation tag.
    pub fn from_rep(rep: &[u8]) -> Option<Self> {
        match rep {
            b"EEEI" => Some(ByteOrder::Little),
            b"IEEE" => Some(ByteOrder::Big),
            _ => None,
        }
    }
}

/// Start, spacing and units of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    /// Coordinate of index 0.
    pub start: f64,
    /// Spacing between consecutive indices.
    pub delta: f64,
    /// Units code.
    pub units: i32,
}

impl Default for Axis {
    fn default() -> Self {
        Self {
            start: 0.0,
            delta: 1.0,
            units: 0,
        }
    }
}

impl Axis {
    /// Create an axis.
    pub fn new(start: f64, delta: f64, units: i32) -> Self {
        Self {
            start,
            delta,
            units,
        }
    }

    /// Coordinate of the given index.
    pub fn value_at(&self, index: u64) -> f64 {
        self.start + self.delta * index as f64
    }
}

// =============================================================================
// Keywords
// =============================================================================

/// Value of a keyword. ASCII and binary-typed values are both representable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KeywordValue {
    /// `A`
    Ascii(String),
    /// `B`
    Int8(Vec<i8>),
    /// `O`
    UInt8(Vec<u8>),
    /// `I`
    Int16(Vec<i16>),
    /// `U`
    UInt16(Vec<u16>),
    /// `L`
    Int32(Vec<i32>),
    /// `V`
    UInt32(Vec<u32>),
    /// `X`
    Int64(Vec<i64>),
    /// `F`
    Float32(Vec<f32>),
    /// `D`
    Float64(Vec<f64>),
}

impl KeywordValue {
    /// Single-letter type code used in extended headers.
    pub fn type_code(&self) -> char {
        match self {
            KeywordValue::Ascii(_) => 'A',
            KeywordValue::Int8(_) => 'B',
            KeywordValue::UInt8(_) => 'O',
            KeywordValue::Int16(_) => 'I',
            KeywordValue::UInt16(_) => 'U',
            KeywordValue::Int32(_) => 'L',
            KeywordValue::UInt32(_) => 'V',
            KeywordValue::Int64(_) => 'X',
            KeywordValue::Float32(_) => 'F',
            KeywordValue::Float64(_) => 'D',
        }
    }

    /// The text of an ASCII value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            KeywordValue::Ascii(s) => Some(s),
            _ => None,
        }
    }

    /// All numeric values widened to `f64`. ASCII values parse as one number.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            KeywordValue::Ascii(s) => s.trim().parse::<f64>().into_iter().collect(),
            KeywordValue::Int8(v) => v.iter().map(|&x| f64::from(x)).collect(),
            KeywordValue::UInt8(v) => v.iter().map(|&x| f64::from(x)).collect(),
            KeywordValue::Int16(v) => v.iter().map(|&x| f64::from(x)).collect(),
            KeywordValue::UInt16(v) => v.iter().map(|&x| f64::from(x)).collect(),
            KeywordValue::Int32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            KeywordValue::UInt32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            KeywordValue::Int64(v) => v.iter().map(|&x| x as f64).collect(),
            KeywordValue::Float32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            KeywordValue::Float64(v) => v.clone(),
        }
    }

    /// First numeric value, if any.
    pub fn as_f64(&self) -> Option<f64> {
        self.to_f64_vec().first().copied()
    }
}

impl From<&str> for KeywordValue {
    fn from(value: &str) -> Self {
        KeywordValue::Ascii(value.to_string())
    }
}

impl From<String> for KeywordValue {
    fn from(value: String) -> Self {
        KeywordValue::Ascii(value)
    }
}

impl From<f64> for KeywordValue {
    fn from(value: f64) -> Self {
        KeywordValue::Float64(vec![value])
    }
}

impl From<f32> for KeywordValue {
    fn from(value: f32) -> Self {
        KeywordValue::Float32(vec![value])
    }
}

impl From<i32> for KeywordValue {
    fn from(value: i32) -> Self {
        KeywordValue::Int32(vec![value])
    }
}

impl From<i64> for KeywordValue {
    fn from(value: i64) -> Self {
        KeywordValue::Int64(vec![value])
    }
}

/// One key/value pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    /// Key as declared.
    pub key: String,
    /// Value as declared.
    pub value: KeywordValue,
}

/// Ordered key/value sequence. Insertion order is kept and duplicate keys are legal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtendedMetadata {
    entries: Vec<Keyword>,
}

impl ExtendedMetadata {
    /// Empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pair, keeping any earlier pairs with the same key.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<KeywordValue>) {
        self.entries.push(Keyword {
            key: key.into(),
            value: value.into(),
        });
    }

    /// First value declared for `key`.
    pub fn get(&self, key: &str) -> Option<&KeywordValue> {
        self.entries.iter().find(|k| k.key == key).map(|k| &k.value)
    }

    /// Every value declared for `key`, in declaration order.
    pub fn get_all(&self, key: &str) -> Vec<&KeywordValue> {
        self.entries
            .iter()
            .filter(|k| k.key == key)
            .map(|k| &k.value)
            .collect()
    }

    /// Remove every pair with `key`, returning how many were removed.
    pub fn remove_all(&mut self, key: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k| k.key != key);
        before - self.entries.len()
    }

    /// Pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Keyword> {
        self.entries.iter()
    }

    /// Number of pairs, duplicates included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no pairs.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<KeywordValue>> FromIterator<(K, V)> for ExtendedMetadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut meta = ExtendedMetadata::new();
        for (key, value) in iter {
            meta.push(key, value);
        }
        meta
    }
}

// =============================================================================
// Geometry
// =============================================================================

/// Validated snapshot of a header's element layout.
///
/// Byte quantities are exposed as `f64` where packed formats make them fractional;
/// the exact values are kept in bits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    format: FormatDescriptor,
    layout: Layout,
    element_count: u64,
    sub_element_count: u64,
    bits_per_element: u64,
    total_bits: u64,
    generation: u64,
}

/// Derive and validate geometry for a format and element counts.
///
/// `element_count` is the total number of atoms along the primary axis. For
/// [`Layout::Matrix`] it must divide evenly into rows of `sub_element_count` atoms;
/// a remainder is reported, never truncated. [`Layout::Flat`] requires
/// `sub_element_count == 1`.
pub fn derive_geometry(
    format: &FormatDescriptor,
    layout: Layout,
    element_count: u64,
    sub_element_count: u64,
) -> DataResult<Geometry> {
    if sub_element_count < 1 {
        return Err(DataError::invalid_geometry(
            element_count,
            sub_element_count,
            "sub-element count must be at least 1",
        ));
    }

    match layout {
        Layout::Flat if sub_element_count != 1 => {
            return Err(DataError::invalid_geometry(
                element_count,
                sub_element_count,
                "flat layouts have exactly one atom per element",
            ));
        }
        Layout::Matrix if element_count % sub_element_count != 0 => {
            return Err(DataError::invalid_geometry(
                element_count,
                sub_element_count,
                format!(
                    "{} atoms leave a remainder of {} in rows of {}",
                    element_count,
                    element_count % sub_element_count,
                    sub_element_count
                ),
            ));
        }
        _ => {}
    }

    let bits_per_atom = u64::from(format.bits_per_atom());
    let bits_per_element = checked_bits(sub_element_count, bits_per_atom, sub_element_count)?;
    let total_bits = checked_bits(element_count, bits_per_atom, sub_element_count)?;

    Ok(Geometry {
        format: *format,
        layout,
        element_count,
        sub_element_count,
        bits_per_element,
        total_bits,
        generation: 0,
    })
}

impl Geometry {
    /// Atom format.
    pub fn format(&self) -> &FormatDescriptor {
        &self.format
    }

    /// Element arrangement.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Total atoms along the primary axis.
    pub fn element_count(&self) -> u64 {
        self.element_count
    }

    /// Atoms per row (1 for flat layouts).
    pub fn sub_element_count(&self) -> u64 {
        self.sub_element_count
    }

    /// Generation of the header this snapshot was taken from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of rows; equals the element count for flat layouts.
    pub fn rows(&self) -> u64 {
        self.element_count / self.sub_element_count
    }

    /// Number of transferable elements: atoms for flat, rows for matrix.
    pub fn elements(&self) -> u64 {
        self.rows()
    }

    /// Atoms in one element.
    pub fn atoms_per_element(&self) -> u64 {
        self.sub_element_count
    }

    /// Scalars in one element.
    pub fn scalars_per_element(&self) -> usize {
        self.sub_element_count as usize * self.format.scalars_per_atom() as usize
    }

    /// Bits in one atom.
    pub fn bits_per_atom(&self) -> u64 {
        u64::from(self.format.bits_per_atom())
    }

    /// Bits in one element.
    pub fn bits_per_element(&self) -> u64 {
        self.bits_per_element
    }

    /// Bytes per scalar; fractional for packed formats.
    pub fn bytes_per_scalar(&self) -> f64 {
        self.format.bytes_per_scalar()
    }

    /// Bytes per atom; fractional for packed formats.
    pub fn bytes_per_atom(&self) -> f64 {
        self.format.bytes_per_atom()
    }

    /// Bytes per element.
    pub fn bytes_per_element(&self) -> f64 {
        self.bits_per_element as f64 / 8.0
    }

    /// `sub_element_count * bytes_per_scalar * scalars_per_atom`.
    pub fn bytes_per_row(&self) -> f64 {
        self.bytes_per_element()
    }

    /// Size of all data in bits.
    pub fn total_bits(&self) -> u64 {
        self.total_bits
    }

    /// Size of all data in bytes, rounded up to a whole byte for packed formats.
    pub fn total_bytes(&self) -> u64 {
        bits_to_bytes_ceil(self.total_bits)
    }
}

// =============================================================================
// Header model
// =============================================================================

/// Inputs of a geometry derivation, used for [`HeaderModel::reload`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryUpdate {
    /// Atom format.
    pub format: FormatDescriptor,
    /// Element arrangement.
    pub layout: Layout,
    /// Total atoms along the primary axis.
    pub element_count: u64,
    /// Atoms per row.
    pub sub_element_count: u64,
}

/// Self-describing header of a data source.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderModel {
    geometry: Geometry,
    x_axis: Axis,
    y_axis: Axis,
    byte_order: ByteOrder,
    timecode: f64,
    keywords: ExtendedMetadata,
    extended: ExtendedMetadata,
}

impl HeaderModel {
    /// Start building a header for `format`. Defaults to an empty flat layout.
    pub fn builder(format: FormatDescriptor) -> HeaderBuilder {
        HeaderBuilder {
            format,
            layout: Layout::Flat,
            element_count: 0,
            sub_element_count: 1,
            x_axis: Axis::default(),
            y_axis: Axis::default(),
            byte_order: ByteOrder::default(),
            timecode: 0.0,
            keywords: ExtendedMetadata::new(),
            extended: ExtendedMetadata::new(),
        }
    }

    /// Current geometry snapshot.
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Atom format.
    pub fn format(&self) -> &FormatDescriptor {
        &self.geometry.format
    }

    /// Element arrangement.
    pub fn layout(&self) -> Layout {
        self.geometry.layout
    }

    /// Total atoms along the primary axis.
    pub fn element_count(&self) -> u64 {
        self.geometry.element_count
    }

    /// Atoms per row.
    pub fn sub_element_count(&self) -> u64 {
        self.geometry.sub_element_count
    }

    /// Primary (x) axis.
    pub fn x_axis(&self) -> &Axis {
        &self.x_axis
    }

    /// Secondary (y) axis; meaningful for matrix layouts.
    pub fn y_axis(&self) -> &Axis {
        &self.y_axis
    }

    /// Byte order of the data.
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Start time of the data.
    pub fn timecode(&self) -> f64 {
        self.timecode
    }

    /// Main-header keywords.
    pub fn keywords(&self) -> &ExtendedMetadata {
        &self.keywords
    }

    /// Mutable main-header keywords.
    pub fn keywords_mut(&mut self) -> &mut ExtendedMetadata {
        &mut self.keywords
    }

    /// Extended metadata.
    pub fn extended_metadata(&self) -> &ExtendedMetadata {
        &self.extended
    }

    /// Mutable extended metadata.
    pub fn extended_metadata_mut(&mut self) -> &mut ExtendedMetadata {
        &mut self.extended
    }

    /// Replace the primary axis.
    pub fn set_x_axis(&mut self, axis: Axis) {
        self.x_axis = axis;
    }

    /// Replace the secondary axis.
    pub fn set_y_axis(&mut self, axis: Axis) {
        self.y_axis = axis;
    }

    /// Set the data byte order.
    pub fn set_byte_order(&mut self, order: ByteOrder) {
        self.byte_order = order;
    }

    /// Set the start time.
    pub fn set_timecode(&mut self, timecode: f64) {
        self.timecode = timecode;
    }

    /// Inputs of the current geometry, ready to be modified and passed to `reload`.
    pub fn update(&self) -> GeometryUpdate {
        GeometryUpdate {
            format: self.geometry.format,
            layout: self.geometry.layout,
            element_count: self.geometry.element_count,
            sub_element_count: self.geometry.sub_element_count,
        }
    }

    /// Replace the geometry and return the fresh snapshot.
    ///
    /// The update is validated first; on error the header is unchanged. On success the
    /// generation advances so earlier snapshots report stale through
    /// [`HeaderModel::is_current`].
    pub fn reload(&mut self, update: GeometryUpdate) -> DataResult<Geometry> {
        let mut geometry = derive_geometry(
            &update.format,
            update.layout,
            update.element_count,
            update.sub_element_count,
        )?;
        geometry.generation = self.geometry.generation + 1;

        tracing::debug!(
            format = %geometry.format,
            elements = geometry.element_count,
            subsize = geometry.sub_element_count,
            generation = geometry.generation,
            "Header geometry reloaded"
        );

        self.geometry = geometry;
        Ok(geometry)
    }

    /// Whether `snapshot` was taken from the current generation of this header.
    pub fn is_current(&self, snapshot: &Geometry) -> bool {
        snapshot.generation == self.geometry.generation
    }
}

/// Fluent constructor for [`HeaderModel`].
#[derive(Debug, Clone)]
pub struct HeaderBuilder {
    format: FormatDescriptor,
    layout: Layout,
    element_count: u64,
    sub_element_count: u64,
    x_axis: Axis,
    y_axis: Axis,
    byte_order: ByteOrder,
    timecode: f64,
    keywords: ExtendedMetadata,
    extended: ExtendedMetadata,
}

impl HeaderBuilder {
    /// One-dimensional layout of `element_count` atoms.
    pub fn flat(mut self, element_count: u64) -> Self {
        self.layout = Layout::Flat;
        self.element_count = element_count;
        self.sub_element_count = 1;
        self
    }

    /// Raster layout of `element_count` atoms in rows of `sub_element_count`.
    pub fn matrix(mut self, element_count: u64, sub_element_count: u64) -> Self {
        self.layout = Layout::Matrix;
        self.element_count = element_count;
        self.sub_element_count = sub_element_count;
        self
    }

    /// Primary axis.
    pub fn x_axis(mut self, start: f64, delta: f64, units: i32) -> Self {
        self.x_axis = Axis::new(start, delta, units);
        self
    }

    /// Secondary axis.
    pub fn y_axis(mut self, start: f64, delta: f64, units: i32) -> Self {
        self.y_axis = Axis::new(start, delta, units);
        self
    }

    /// Data byte order.
    pub fn byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }

    /// Start time.
    pub fn timecode(mut self, timecode: f64) -> Self {
        self.timecode = timecode;
        self
    }

    /// Append a main-header keyword.
    pub fn keyword(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.keywords.push(key.into(), value.into());
        self
    }

    /// Append an extended-metadata pair.
    pub fn extended(mut self, key: impl Into<String>, value: impl Into<KeywordValue>) -> Self {
        self.extended.push(key, value);
        self
    }

    /// Replace the whole extended metadata sequence.
    pub fn extended_metadata(mut self, meta: ExtendedMetadata) -> Self {
        self.extended = meta;
        self
    }

    /// Replace the whole main keyword sequence.
    pub fn keywords(mut self, meta: ExtendedMetadata) -> Self {
        self.keywords = meta;
        self
    }

    /// Validate the geometry and build the header.
    pub fn build(self) -> DataResult<HeaderModel> {
        let geometry = derive_geometry(
            &self.format,
            self.layout,
            self.element_count,
            self.sub_element_count,
        )?;
        Ok(HeaderModel {
            geometry,
            x_axis: self.x_axis,
            y_axis: self.y_axis,
            byte_order: self.byte_order,
            timecode: self.timecode,
            keywords: self.keywords,
            extended: self.extended,
        })
    }
}
