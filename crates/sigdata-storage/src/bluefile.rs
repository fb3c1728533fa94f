//! BLUE file reader and writer.
//!
//! A BLUE file starts with a 512-byte header control block (HCB) describing the
//! data format, layout and axes, followed by the data bytes and an optional
//! extended header of typed keyword records.
//!
//! # Layout
//!
//! ```text
//! 0        512                       ext_start * 512
//! | HCB    | data (data_size bytes)  | pad | extended header (ext_size bytes) |
//! ```
//!
//! The HCB's numeric fields use the byte order named by `head_rep`; the data uses
//! `data_rep`. Both are `EEEI` (little-endian) or `IEEE` (big-endian). Files written
//! here use the header's data byte order for both.
//!
//! `data_size` may be fractional for packed bit data: a 12-bit `SP` file declares
//! 1.5 bytes. The HCB also carries pipe-mode fields (see [`PipeHeader`]).
//!
//! # Example
//!
//! ```no_run
//! use sigdata_storage::bluefile::BlueFile;
//! use std::path::Path;
//!
//! let file = BlueFile::open(Path::new("capture.tmp"))?;
//! println!("{} elements of {}", file.header().element_count(), file.header().format());
//! let first = file.view().read_scalar(0)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::pipe::{Pipe, PipeConfig};
use anyhow::{Context, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use sigdata_core::limits::{BLOCK_BYTES, MAX_EXTENDED_HEADER_BYTES};
use sigdata_core::view::encode_scalars;
use sigdata_core::{
    ByteOrder, DataError, DataResult, ExtendedMetadata, FormatDescriptor, GeometryUpdate,
    HeaderModel, KeywordValue, Layout, TypedView,
};
use std::path::Path;

const MAGIC: &[u8; 4] = b"BLUE";

mod offset {
    pub const VERSION: usize = 0;
    pub const HEAD_REP: usize = 4;
    pub const DATA_REP: usize = 8;
    pub const DETACHED: usize = 12;
    pub const PROTECTED: usize = 16;
    pub const PIPE: usize = 20;
    pub const EXT_START: usize = 24;
    pub const EXT_SIZE: usize = 28;
    pub const DATA_START: usize = 32;
    pub const DATA_SIZE: usize = 40;
    pub const TYPE: usize = 48;
    pub const FORMAT: usize = 52;
    pub const FLAGMASK: usize = 54;
    pub const TIMECODE: usize = 56;
    pub const PIPESIZE: usize = 76;
    pub const IN_BYTE: usize = 80;
    pub const OUT_BYTE: usize = 88;
    pub const KEYLENGTH: usize = 160;
    pub const KEYWORDS: usize = 164;
    pub const XSTART: usize = 256;
    pub const XDELTA: usize = 264;
    pub const XUNITS: usize = 272;
    pub const SUBSIZE: usize = 276;
    pub const YSTART: usize = 280;
    pub const YDELTA: usize = 288;
    pub const YUNITS: usize = 296;
}

/// Space reserved for main keywords in the HCB.
pub const MAIN_KEYWORD_BYTES: usize = 92;

const RECORD_PREAMBLE: usize = 8;

fn malformed(reason: impl Into<String>) -> DataError {
    DataError::MalformedHeader(reason.into())
}

// =============================================================================
// HCB field access
// =============================================================================

struct HcbReader<'a> {
    hcb: &'a [u8],
    order: ByteOrder,
}

impl HcbReader<'_> {
    fn i16_at(&self, at: usize) -> i16 {
        let mut b = &self.hcb[at..];
        match self.order {
            ByteOrder::Little => b.get_i16_le(),
            ByteOrder::Big => b.get_i16(),
        }
    }

    fn i32_at(&self, at: usize) -> i32 {
        let mut b = &self.hcb[at..];
        match self.order {
            ByteOrder::Little => b.get_i32_le(),
            ByteOrder::Big => b.get_i32(),
        }
    }

    fn f64_at(&self, at: usize) -> f64 {
        let mut b = &self.hcb[at..];
        match self.order {
            ByteOrder::Little => b.get_f64_le(),
            ByteOrder::Big => b.get_f64(),
        }
    }

    // data_start is a double but must hold a whole byte count
    fn byte_count_at(&self, at: usize, name: &str) -> DataResult<usize> {
        let value = self.f64_at(at);
        if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value > usize::MAX as f64
        {
            return Err(malformed(format!("{} is not a byte count: {}", name, value)));
        }
        Ok(value as usize)
    }

    // data_size may end mid-byte, but only on a bit boundary
    fn bit_count_at(&self, at: usize, name: &str) -> DataResult<u64> {
        let value = self.f64_at(at);
        let bits = value * 8.0;
        if !bits.is_finite() || bits < 0.0 || bits.fract() != 0.0 || bits > u64::MAX as f64 {
            return Err(malformed(format!("{} is not a bit count: {}", name, value)));
        }
        Ok(bits as u64)
    }
}

struct HcbWriter {
    hcb: [u8; BLOCK_BYTES],
    order: ByteOrder,
}

impl HcbWriter {
    fn put_bytes(&mut self, at: usize, bytes: &[u8]) {
        self.hcb[at..at + bytes.len()].copy_from_slice(bytes);
    }

    fn put_i16(&mut self, at: usize, value: i16) {
        let mut b = &mut self.hcb[at..];
        match self.order {
            ByteOrder::Little => b.put_i16_le(value),
            ByteOrder::Big => b.put_i16(value),
        }
    }

    fn put_i32(&mut self, at: usize, value: i32) {
        let mut b = &mut self.hcb[at..];
        match self.order {
            ByteOrder::Little => b.put_i32_le(value),
            ByteOrder::Big => b.put_i32(value),
        }
    }

    fn put_f64(&mut self, at: usize, value: f64) {
        let mut b = &mut self.hcb[at..];
        match self.order {
            ByteOrder::Little => b.put_f64_le(value),
            ByteOrder::Big => b.put_f64(value),
        }
    }
}

// =============================================================================
// Keywords
// =============================================================================

fn parse_main_keywords(raw: &[u8]) -> ExtendedMetadata {
    let mut keywords = ExtendedMetadata::new();
    for entry in raw.split(|&b| b == 0).filter(|e| !e.is_empty()) {
        let text = String::from_utf8_lossy(entry);
        match text.split_once('=') {
            Some((key, value)) => keywords.push(key.trim(), value),
            None => tracing::warn!(entry = %text, "Skipping main keyword without '='"),
        }
    }
    keywords
}

fn render_main_keywords(keywords: &ExtendedMetadata) -> DataResult<Vec<u8>> {
    let mut raw = Vec::new();
    for keyword in keywords.iter() {
        let value = match keyword.value.as_str() {
            Some(s) => s.to_string(),
            None => keyword
                .value
                .to_f64_vec()
                .iter()
                .map(f64::to_string)
                .collect::<Vec<_>>()
                .join(","),
        };
        raw.extend_from_slice(keyword.key.as_bytes());
        raw.push(b'=');
        raw.extend_from_slice(value.as_bytes());
        raw.push(0);
    }
    if raw.len() > MAIN_KEYWORD_BYTES {
        return Err(malformed(format!(
            "main keywords need {} bytes, only {} available",
            raw.len(),
            MAIN_KEYWORD_BYTES
        )));
    }
    Ok(raw)
}

macro_rules! get_all {
    ($bytes:expr, $width:expr, $order:expr, $le:ident, $be:ident) => {{
        let mut b: &[u8] = $bytes;
        let mut values = Vec::with_capacity(b.len() / $width);
        while b.remaining() >= $width {
            values.push(match $order {
                ByteOrder::Little => b.$le(),
                ByteOrder::Big => b.$be(),
            });
        }
        values
    }};
}

macro_rules! put_all {
    ($out:expr, $values:expr, $order:expr, $le:ident, $be:ident) => {
        for &v in $values {
            match $order {
                ByteOrder::Little => $out.$le(v),
                ByteOrder::Big => $out.$be(v),
            }
        }
    };
}

fn type_width(code: u8) -> Option<usize> {
    match code {
        b'A' | b'B' | b'O' => Some(1),
        b'I' | b'U' => Some(2),
        b'L' | b'V' | b'F' => Some(4),
        b'X' | b'D' => Some(8),
        _ => None,
    }
}

fn decode_value(code: u8, raw: &[u8], order: ByteOrder) -> DataResult<KeywordValue> {
    let width = type_width(code)
        .ok_or_else(|| malformed(format!("unknown keyword type '{}'", code as char)))?;
    if raw.len() % width != 0 {
        return Err(malformed(format!(
            "keyword value of {} bytes is not a whole number of '{}' values",
            raw.len(),
            code as char
        )));
    }

    Ok(match code {
        b'A' => KeywordValue::Ascii(
            String::from_utf8_lossy(raw)
                .trim_end_matches('\0')
                .to_string(),
        ),
        b'B' => KeywordValue::Int8(raw.iter().map(|&b| b as i8).collect()),
        b'O' => KeywordValue::UInt8(raw.to_vec()),
        b'I' => KeywordValue::Int16(get_all!(raw, 2, order, get_i16_le, get_i16)),
        b'U' => KeywordValue::UInt16(get_all!(raw, 2, order, get_u16_le, get_u16)),
        b'L' => KeywordValue::Int32(get_all!(raw, 4, order, get_i32_le, get_i32)),
        b'V' => KeywordValue::UInt32(get_all!(raw, 4, order, get_u32_le, get_u32)),
        b'X' => KeywordValue::Int64(get_all!(raw, 8, order, get_i64_le, get_i64)),
        b'F' => KeywordValue::Float32(get_all!(raw, 4, order, get_f32_le, get_f32)),
        _ => KeywordValue::Float64(get_all!(raw, 8, order, get_f64_le, get_f64)),
    })
}

fn encode_value(value: &KeywordValue, order: ByteOrder, out: &mut BytesMut) {
    match value {
        KeywordValue::Ascii(s) => out.put_slice(s.as_bytes()),
        KeywordValue::Int8(v) => v.iter().for_each(|&b| out.put_i8(b)),
        KeywordValue::UInt8(v) => out.put_slice(v),
        KeywordValue::Int16(v) => put_all!(out, v, order, put_i16_le, put_i16),
        KeywordValue::UInt16(v) => put_all!(out, v, order, put_u16_le, put_u16),
        KeywordValue::Int32(v) => put_all!(out, v, order, put_i32_le, put_i32),
        KeywordValue::UInt32(v) => put_all!(out, v, order, put_u32_le, put_u32),
        KeywordValue::Int64(v) => put_all!(out, v, order, put_i64_le, put_i64),
        KeywordValue::Float32(v) => put_all!(out, v, order, put_f32_le, put_f32),
        KeywordValue::Float64(v) => put_all!(out, v, order, put_f64_le, put_f64),
    }
}

/// Parse extended header records. Record order and duplicate keys are preserved.
pub fn parse_extended_header(raw: &[u8], order: ByteOrder) -> DataResult<ExtendedMetadata> {
    let mut meta = ExtendedMetadata::new();
    let mut rest = raw;

    while rest.len() >= RECORD_PREAMBLE {
        let mut preamble = &rest[..RECORD_PREAMBLE];
        let (lkey, lext) = match order {
            ByteOrder::Little => (preamble.get_i32_le(), preamble.get_i16_le()),
            ByteOrder::Big => (preamble.get_i32(), preamble.get_i16()),
        };
        let ltag = preamble.get_u8() as usize;
        let code = preamble.get_u8();

        if lkey == 0 {
            break;
        }
        let (lkey, lext) = match (usize::try_from(lkey), usize::try_from(lext)) {
            (Ok(k), Ok(e)) => (k, e),
            _ => return Err(malformed(format!("negative record length {}/{}", lkey, lext))),
        };
        if lkey > rest.len() || lext > lkey || lext < RECORD_PREAMBLE + ltag {
            return Err(malformed(format!(
                "bad extended record: lkey={} lext={} ltag={} with {} bytes left",
                lkey,
                lext,
                ltag,
                rest.len()
            )));
        }

        let value_len = lkey - lext;
        let value_end = RECORD_PREAMBLE + value_len;
        let value = decode_value(code, &rest[RECORD_PREAMBLE..value_end], order)?;
        let tag = String::from_utf8_lossy(&rest[value_end..value_end + ltag]).into_owned();

        meta.push(tag, value);
        rest = &rest[lkey..];
    }

    Ok(meta)
}

/// Encode extended metadata as extended header records.
pub fn encode_extended_header(meta: &ExtendedMetadata, order: ByteOrder) -> DataResult<Bytes> {
    let mut out = BytesMut::new();
    let mut value = BytesMut::new();

    for keyword in meta.iter() {
        let tag = keyword.key.as_bytes();
        if tag.len() > u8::MAX as usize {
            return Err(malformed(format!("keyword '{}' is too long", keyword.key)));
        }

        value.clear();
        encode_value(&keyword.value, order, &mut value);

        let used = RECORD_PREAMBLE + value.len() + tag.len();
        let lkey = used.div_ceil(8) * 8;
        let lext = lkey - value.len();
        let (Ok(lkey_i32), Ok(lext_i16)) = (i32::try_from(lkey), i16::try_from(lext)) else {
            return Err(malformed(format!(
                "keyword '{}' value is too large",
                keyword.key
            )));
        };

        match order {
            ByteOrder::Little => {
                out.put_i32_le(lkey_i32);
                out.put_i16_le(lext_i16);
            }
            ByteOrder::Big => {
                out.put_i32(lkey_i32);
                out.put_i16(lext_i16);
            }
        }
        out.put_u8(tag.len() as u8);
        out.put_u8(keyword.value.type_code() as u8);
        out.put_slice(&value);
        out.put_slice(tag);
        out.put_bytes(0, lkey - used);
    }

    Ok(out.freeze())
}

// =============================================================================
// Pipe-mode fields
// =============================================================================

/// Pipe-mode fields of the HCB.
///
/// A file in pipe mode describes a live circular buffer rather than a finished
/// capture: `pipe_size` is the buffer capacity in bytes and `in_byte`/`out_byte`
/// count the bytes written and consumed so far. Byte counts are fractional for
/// packed bit data.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PipeHeader {
    /// Nonzero when the file is write-protected.
    pub protected: i32,
    /// Whether the file describes a pipe.
    pub pipe: bool,
    /// Application flag bits.
    pub flagmask: i16,
    /// Pipe capacity in bytes.
    pub pipe_size: i32,
    /// Bytes filled into the pipe.
    pub in_byte: f64,
    /// Bytes drained from the pipe.
    pub out_byte: f64,
}

impl PipeHeader {
    /// Snapshot the capacity and cursors of `pipe`.
    pub fn from_pipe(pipe: &Pipe) -> DataResult<Self> {
        let pipe_size = i32::try_from(pipe.capacity())
            .map_err(|_| malformed(format!("pipe of {} bytes exceeds pipesize", pipe.capacity())))?;
        Ok(Self {
            pipe: true,
            pipe_size,
            in_byte: pipe.bits_written() as f64 / 8.0,
            out_byte: pipe.bits_read() as f64 / 8.0,
            ..Self::default()
        })
    }

    /// Capacity declared by a pipe-mode header, if any.
    pub fn capacity_bytes(&self) -> Option<u64> {
        match u64::try_from(self.pipe_size) {
            Ok(size) if self.pipe && size > 0 => Some(size),
            _ => None,
        }
    }

    /// `config` with its capacity taken from this header when one is declared.
    pub fn apply_to(&self, mut config: PipeConfig) -> PipeConfig {
        if let Some(capacity) = self.capacity_bytes() {
            config.capacity_bytes = capacity;
        }
        config
    }

    fn read(reader: &HcbReader<'_>) -> Self {
        Self {
            protected: reader.i32_at(offset::PROTECTED),
            pipe: reader.i32_at(offset::PIPE) != 0,
            flagmask: reader.i16_at(offset::FLAGMASK),
            pipe_size: reader.i32_at(offset::PIPESIZE),
            in_byte: reader.f64_at(offset::IN_BYTE),
            out_byte: reader.f64_at(offset::OUT_BYTE),
        }
    }

    fn write(&self, w: &mut HcbWriter) {
        w.put_i32(offset::PROTECTED, self.protected);
        w.put_i32(offset::PIPE, i32::from(self.pipe));
        w.put_i16(offset::FLAGMASK, self.flagmask);
        w.put_i32(offset::PIPESIZE, self.pipe_size);
        w.put_f64(offset::IN_BYTE, self.in_byte);
        w.put_f64(offset::OUT_BYTE, self.out_byte);
    }
}

// =============================================================================
// BlueFile
// =============================================================================

/// A parsed BLUE file: header plus attached data bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct BlueFile {
    header: HeaderModel,
    pipe_header: PipeHeader,
    data: Bytes,
}

/// Parse a complete BLUE file image.
pub fn parse(bytes: &[u8]) -> DataResult<BlueFile> {
    if bytes.len() < BLOCK_BYTES {
        return Err(malformed(format!(
            "file is {} bytes, header control block needs {}",
            bytes.len(),
            BLOCK_BYTES
        )));
    }
    let hcb = &bytes[..BLOCK_BYTES];

    if &hcb[offset::VERSION..offset::VERSION + 4] != MAGIC {
        return Err(malformed(format!(
            "bad magic {:?}",
            String::from_utf8_lossy(&hcb[..4])
        )));
    }
    let head_order = rep_at(hcb, offset::HEAD_REP, "head_rep")?;
    let data_order = rep_at(hcb, offset::DATA_REP, "data_rep")?;
    let reader = HcbReader {
        hcb,
        order: head_order,
    };

    if reader.i32_at(offset::DETACHED) != 0 {
        return Err(malformed("detached data is not supported"));
    }

    let code = String::from_utf8_lossy(&hcb[offset::FORMAT..offset::FORMAT + 2]).into_owned();
    let format = *FormatDescriptor::resolve(&code)?;

    let type_code = reader.i32_at(offset::TYPE);
    let layout = Layout::from_type_code(type_code)
        .ok_or_else(|| malformed(format!("unsupported file type {}", type_code)))?;

    let data_start = reader.byte_count_at(offset::DATA_START, "data_start")?;
    let data_bits = reader.bit_count_at(offset::DATA_SIZE, "data_size")?;
    let data_size = usize::try_from(data_bits.div_ceil(8))
        .map_err(|_| malformed(format!("data_size of {} bits is too large", data_bits)))?;
    let data_end = data_start
        .checked_add(data_size)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| {
            malformed(format!(
                "data {}..{} extends past end of file ({} bytes)",
                data_start,
                data_start.saturating_add(data_size),
                bytes.len()
            ))
        })?;

    let keylength = usize::try_from(reader.i32_at(offset::KEYLENGTH))
        .unwrap_or(0)
        .min(MAIN_KEYWORD_BYTES);
    let keywords = parse_main_keywords(&hcb[offset::KEYWORDS..offset::KEYWORDS + keylength]);

    let extended = parse_extended_region(bytes, &reader)?;

    let atoms = data_bits / u64::from(format.bits_per_atom());
    let mut builder = HeaderModel::builder(format)
        .byte_order(data_order)
        .timecode(reader.f64_at(offset::TIMECODE))
        .x_axis(
            reader.f64_at(offset::XSTART),
            reader.f64_at(offset::XDELTA),
            reader.i32_at(offset::XUNITS),
        )
        .keywords(keywords)
        .extended_metadata(extended);

    builder = match layout {
        Layout::Flat => builder.flat(atoms),
        Layout::Matrix => {
            let subsize = reader.i32_at(offset::SUBSIZE);
            if subsize < 1 {
                return Err(malformed(format!("type 2000 file with subsize {}", subsize)));
            }
            let subsize = subsize as u64;
            let whole = atoms - atoms % subsize;
            if whole != atoms {
                tracing::warn!(
                    atoms,
                    subsize,
                    "Ignoring trailing partial row"
                );
            }
            builder.matrix(whole, subsize).y_axis(
                reader.f64_at(offset::YSTART),
                reader.f64_at(offset::YDELTA),
                reader.i32_at(offset::YUNITS),
            )
        }
    };
    let header = builder.build()?;

    tracing::debug!(
        format = %format,
        layout = ?layout,
        elements = header.element_count(),
        extended = header.extended_metadata().len(),
        "Parsed BLUE header"
    );

    // Drop any bytes past the last whole atom, such as a partial row.
    let kept = usize::try_from(header.geometry().total_bytes())
        .map_or(data_size, |total| total.min(data_size));
    Ok(BlueFile {
        header,
        pipe_header: PipeHeader::read(&reader),
        data: Bytes::copy_from_slice(&bytes[data_start..data_start + kept]),
    })
}

fn rep_at(hcb: &[u8], at: usize, name: &str) -> DataResult<ByteOrder> {
    let rep = &hcb[at..at + 4];
    ByteOrder::from_rep(rep).ok_or_else(|| {
        malformed(format!(
            "unknown {} {:?}",
            name,
            String::from_utf8_lossy(rep)
        ))
    })
}

fn parse_extended_region(bytes: &[u8], reader: &HcbReader<'_>) -> DataResult<ExtendedMetadata> {
    let ext_start = reader.i32_at(offset::EXT_START);
    let ext_size = reader.i32_at(offset::EXT_SIZE);
    if ext_size == 0 {
        return Ok(ExtendedMetadata::new());
    }

    let (Ok(ext_start), Ok(ext_size)) = (usize::try_from(ext_start), usize::try_from(ext_size))
    else {
        return Err(malformed(format!(
            "negative extended header position {}/{}",
            ext_start, ext_size
        )));
    };
    if ext_size > MAX_EXTENDED_HEADER_BYTES {
        return Err(malformed(format!(
            "extended header of {} bytes exceeds limit of {}",
            ext_size, MAX_EXTENDED_HEADER_BYTES
        )));
    }

    let start = ext_start.saturating_mul(BLOCK_BYTES);
    let end = start.saturating_add(ext_size);
    if end > bytes.len() {
        return Err(malformed(format!(
            "extended header {}..{} extends past end of file ({} bytes)",
            start,
            end,
            bytes.len()
        )));
    }
    parse_extended_header(&bytes[start..end], reader.order)
}

impl BlueFile {
    /// Pair a header with its data bytes.
    ///
    /// The data must be exactly as long as the header's geometry.
    pub fn new(header: HeaderModel, data: Bytes) -> DataResult<Self> {
        let expected = header.geometry().total_bytes();
        if data.len() as u64 != expected {
            return Err(DataError::invalid_geometry(
                header.element_count(),
                header.sub_element_count(),
                format!("{} data bytes, header describes {}", data.len(), expected),
            ));
        }
        Ok(Self {
            header,
            pipe_header: PipeHeader::default(),
            data,
        })
    }

    /// Encode `scalars` with the header's format and byte order.
    ///
    /// The header's element count is replaced with the number of atoms in `scalars`.
    pub fn encode(mut header: HeaderModel, scalars: &[f64]) -> DataResult<Self> {
        let per_atom = header.format().scalars_per_atom() as usize;
        let atoms = (scalars.len() / per_atom) as u64;
        header.reload(GeometryUpdate {
            element_count: atoms,
            ..header.update()
        })?;

        let mut data = Vec::new();
        encode_scalars(
            header.format(),
            header.byte_order(),
            &scalars[..atoms as usize * per_atom],
            &mut data,
        );
        Ok(Self {
            header,
            pipe_header: PipeHeader::default(),
            data: Bytes::from(data),
        })
    }

    /// Read and parse the file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read BLUE file: {:?}", path))?;
        let file =
            parse(&bytes).with_context(|| format!("Failed to parse BLUE file: {:?}", path))?;
        tracing::info!(
            path = %path.display(),
            format = %file.header.format(),
            elements = file.header.element_count(),
            "Opened BLUE file"
        );
        Ok(file)
    }

    /// Write the file to `path`, replacing any existing file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, &bytes)
            .with_context(|| format!("Failed to write BLUE file: {:?}", path))?;
        Ok(())
    }

    /// Serialise to a complete file image.
    pub fn to_bytes(&self) -> DataResult<Bytes> {
        let header = &self.header;
        let order = header.byte_order();
        let geometry = header.geometry();

        let keywords = render_main_keywords(header.keywords())?;
        let extended = encode_extended_header(header.extended_metadata(), order)?;

        let data_end = BLOCK_BYTES + self.data.len();
        let ext_start = data_end.div_ceil(BLOCK_BYTES);
        let too_large = || malformed("file too large for a 32-bit extended header position");
        let ext_start_i32 = i32::try_from(ext_start).map_err(|_| too_large())?;
        let ext_size_i32 = i32::try_from(extended.len()).map_err(|_| too_large())?;

        let mut w = HcbWriter {
            hcb: [0u8; BLOCK_BYTES],
            order,
        };
        w.put_bytes(offset::VERSION, MAGIC);
        w.put_bytes(offset::HEAD_REP, order.rep());
        w.put_bytes(offset::DATA_REP, order.rep());
        w.put_i32(offset::EXT_START, if extended.is_empty() { 0 } else { ext_start_i32 });
        w.put_i32(offset::EXT_SIZE, ext_size_i32);
        w.put_f64(offset::DATA_START, BLOCK_BYTES as f64);
        w.put_f64(offset::DATA_SIZE, geometry.total_bits() as f64 / 8.0);
        w.put_i32(offset::TYPE, geometry.layout().type_code());
        w.put_bytes(offset::FORMAT, header.format().code().as_bytes());
        w.put_f64(offset::TIMECODE, header.timecode());
        self.pipe_header.write(&mut w);
        w.put_i32(offset::KEYLENGTH, keywords.len() as i32);
        w.put_bytes(offset::KEYWORDS, &keywords);
        w.put_f64(offset::XSTART, header.x_axis().start);
        w.put_f64(offset::XDELTA, header.x_axis().delta);
        w.put_i32(offset::XUNITS, header.x_axis().units);
        if geometry.layout() == Layout::Matrix {
            let subsize = i32::try_from(geometry.sub_element_count())
                .map_err(|_| malformed("subsize does not fit in 32 bits"))?;
            w.put_i32(offset::SUBSIZE, subsize);
            w.put_f64(offset::YSTART, header.y_axis().start);
            w.put_f64(offset::YDELTA, header.y_axis().delta);
            w.put_i32(offset::YUNITS, header.y_axis().units);
        }

        let mut out = BytesMut::with_capacity(ext_start * BLOCK_BYTES + extended.len());
        out.put_slice(&w.hcb);
        out.put_slice(&self.data);
        if !extended.is_empty() {
            out.put_bytes(0, ext_start * BLOCK_BYTES - data_end);
            out.put_slice(&extended);
        }
        Ok(out.freeze())
    }

    /// Header of the file.
    pub fn header(&self) -> &HeaderModel {
        &self.header
    }

    /// Mutable header, for editing keywords and axes before saving.
    pub fn header_mut(&mut self) -> &mut HeaderModel {
        &mut self.header
    }

    /// Pipe-mode fields of the HCB.
    pub fn pipe_header(&self) -> &PipeHeader {
        &self.pipe_header
    }

    /// Replace the pipe-mode fields written by [`to_bytes`](Self::to_bytes).
    pub fn set_pipe_header(&mut self, pipe_header: PipeHeader) {
        self.pipe_header = pipe_header;
    }

    /// Raw data bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Typed view over the data bytes.
    pub fn view(&self) -> TypedView<&[u8]> {
        TypedView::new(&self.data[..], *self.header.format(), self.header.byte_order())
    }

    /// Every scalar of the data, in file order.
    pub fn scalars(&self) -> Vec<f64> {
        let mut scalars = self.view().to_vec();
        let per_atom = self.header.format().scalars_per_atom() as usize;
        scalars.truncate(self.header.element_count() as usize * per_atom);
        scalars
    }

    /// Fill `pipe` with as many leading elements of the data as fit.
    ///
    /// Returns the number of elements written. The pipe's format must match the
    /// file's.
    pub fn load_into(&self, pipe: &mut Pipe) -> DataResult<usize> {
        let file_format = self.header.format();
        let pipe_format = pipe.geometry().format();
        if pipe_format != file_format {
            return Err(DataError::invalid_geometry(
                self.header.element_count(),
                pipe.geometry().sub_element_count(),
                format!(
                    "pipe carries {} but file holds {}",
                    pipe_format, file_format
                ),
            ));
        }

        let scalars = self.scalars();
        let available = scalars.len() / pipe.geometry().scalars_per_element();
        let count = available.min(pipe.writable_elements());
        pipe.fill(&scalars, count)?;
        Ok(count)
    }
}
