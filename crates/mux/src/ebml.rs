//! Low-level EBML writing primitives.
//!
//! Every EBML element is `[ID] [size: vint] [payload]`:
//! - IDs are 1-4 bytes and keep their length-marker bit.
//! - Sizes are variable-length integers with a leading-1 marker:
//!   `1xxx xxxx` (7 data bits), `01xx xxxx xxxx xxxx` (14 bits), ... up to 8 bytes.
//!   The all-ones pattern of each width means "unknown size".
//!
//! Fields whose value is only known later are written as fixed-width
//! placeholders and handed back as handle types. Each handle is consumed by
//! exactly one patch call.

use byteorder::{BigEndian, WriteBytesExt};
use std::io::Write;

use webm_common::elements::VOID;

use crate::error::{MuxError, MuxResult};
use crate::sink::{ByteSink, MemorySink};

/// Widest size field EBML allows (and the EBML header advertises).
pub const MAX_VINT_WIDTH: usize = 8;

/// How the size field of a master element is written.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SizeMode {
    /// Size known up front; minimal encoding.
    Known(u64),
    /// Fixed-width "unknown size" placeholder, patched by [`end_element`].
    Reserved(usize),
}

/// An open master element whose size field still has to be written.
#[must_use = "an element handle must be closed with end_element"]
#[derive(Debug, PartialEq, Eq)]
pub struct ElementHandle {
    id: u32,
    start: u64,
    size_offset: u64,
    width: usize,
    data_start: u64,
}

impl ElementHandle {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Offset of the element's first ID byte.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Offset of the first payload byte.
    pub fn data_start(&self) -> u64 {
        self.data_start
    }

    pub fn size_width(&self) -> usize {
        self.width
    }
}

/// Reserved 8-byte float payload (Segment Info Duration).
#[must_use = "a reserved float must be patched"]
#[derive(Debug, PartialEq, Eq)]
pub struct ReservedFloat {
    offset: u64,
}

impl ReservedFloat {
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

/// A run of bytes written as a Void element, to be replaced in place later.
#[derive(Debug, PartialEq, Eq)]
pub struct VoidRegion {
    offset: u64,
    len: usize,
}

impl VoidRegion {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// ─── Encoding ────────────────────────────────────────────────────────

/// Number of bytes an element ID occupies.
pub fn id_width(id: u32) -> usize {
    match id {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}

/// Write an element ID as its raw big-endian bytes.
pub fn write_id<W: Write>(writer: &mut W, id: u32) -> MuxResult<()> {
    let bytes = id.to_be_bytes();
    writer.write_all(&bytes[4 - id_width(id)..])?;
    Ok(())
}

/// Largest value a vint of `width` bytes can carry (all-ones is reserved).
fn vint_max(width: usize) -> u64 {
    (1u64 << (7 * width)) - 2
}

/// Minimal vint width for `value`.
pub fn vint_width(value: u64) -> MuxResult<usize> {
    (1..=MAX_VINT_WIDTH)
        .find(|&w| value <= vint_max(w))
        .ok_or_else(|| MuxError::SizeOverflow(format!("{value} does not fit an EBML vint")))
}

/// Write `value` as a vint of exactly `width` bytes.
pub fn write_vint<W: Write>(writer: &mut W, value: u64, width: usize) -> MuxResult<()> {
    if !(1..=MAX_VINT_WIDTH).contains(&width) {
        return Err(MuxError::SizeOverflow(format!("invalid vint width {width}")));
    }
    if value > vint_max(width) {
        return Err(MuxError::SizeOverflow(format!(
            "{value} does not fit a {width}-byte vint"
        )));
    }
    let marked = (1u64 << (7 * width)) | value;
    writer.write_all(&marked.to_be_bytes()[8 - width..])?;
    Ok(())
}

/// Write the all-ones "unknown size" vint of `width` bytes.
pub fn write_unknown_size<W: Write>(writer: &mut W, width: usize) -> MuxResult<()> {
    if !(1..=MAX_VINT_WIDTH).contains(&width) {
        return Err(MuxError::SizeOverflow(format!("invalid vint width {width}")));
    }
    writer.write_u8(0xFF >> (width - 1))?;
    for _ in 1..width {
        writer.write_u8(0xFF)?;
    }
    Ok(())
}

/// Minimal number of bytes for an unsigned integer payload (0 uses one byte).
pub fn uint_width(value: u64) -> usize {
    if value == 0 {
        1
    } else {
        (64 - value.leading_zeros() as usize).div_ceil(8)
    }
}

/// Minimal number of bytes for a two's-complement signed payload.
pub fn sint_width(value: i64) -> usize {
    (1..8)
        .find(|&w| {
            let bits = 8 * w as u32;
            let min = -(1i64 << (bits - 1));
            let max = (1i64 << (bits - 1)) - 1;
            (min..=max).contains(&value)
        })
        .unwrap_or(8)
}

/// `[ID][minimal size][payload]` as a byte vector.
pub fn encode_element(id: u32, payload: &[u8]) -> MuxResult<Vec<u8>> {
    let size = payload.len() as u64;
    let mut out = Vec::with_capacity(id_width(id) + MAX_VINT_WIDTH + payload.len());
    write_id(&mut out, id)?;
    write_vint(&mut out, size, vint_width(size)?)?;
    out.extend_from_slice(payload);
    Ok(out)
}

pub fn encode_uint(id: u32, value: u64) -> MuxResult<Vec<u8>> {
    let width = uint_width(value);
    encode_element(id, &value.to_be_bytes()[8 - width..])
}

pub fn encode_sint(id: u32, value: i64) -> MuxResult<Vec<u8>> {
    let width = sint_width(value);
    encode_element(id, &value.to_be_bytes()[8 - width..])
}

pub fn encode_float(id: u32, value: f64) -> MuxResult<Vec<u8>> {
    let mut payload = Vec::with_capacity(8);
    payload.write_f64::<BigEndian>(value)?;
    encode_element(id, &payload)
}

pub fn encode_float32(id: u32, value: f32) -> MuxResult<Vec<u8>> {
    let mut payload = Vec::with_capacity(4);
    payload.write_f32::<BigEndian>(value)?;
    encode_element(id, &payload)
}

/// A Void element occupying exactly `len` bytes (`len >= 2`).
pub fn encode_void(len: usize) -> MuxResult<Vec<u8>> {
    let body = len
        .checked_sub(id_width(VOID))
        .ok_or_else(|| MuxError::SizeOverflow(format!("Void of {len} bytes is too small")))?;
    let width = (1..=MAX_VINT_WIDTH)
        .find(|&w| w <= body && (body - w) as u64 <= vint_max(w))
        .ok_or_else(|| MuxError::SizeOverflow(format!("Void of {len} bytes is too small")))?;

    let content = body - width;
    let mut out = Vec::with_capacity(len);
    write_id(&mut out, VOID)?;
    write_vint(&mut out, content as u64, width)?;
    out.resize(len, 0);
    Ok(out)
}

/// Build a master element with a known size from children written into a
/// scratch sink.
pub fn encode_master<F>(id: u32, build: F) -> MuxResult<Vec<u8>>
where
    F: FnOnce(&mut MemorySink) -> MuxResult<()>,
{
    let mut scratch = MemorySink::new();
    build(&mut scratch)?;
    encode_element(id, scratch.bytes())
}

// ─── Sink-level writers ──────────────────────────────────────────────

pub fn write_uint<S: ByteSink + ?Sized>(sink: &mut S, id: u32, value: u64) -> MuxResult<()> {
    sink.append(&encode_uint(id, value)?)
}

pub fn write_float<S: ByteSink + ?Sized>(sink: &mut S, id: u32, value: f64) -> MuxResult<()> {
    sink.append(&encode_float(id, value)?)
}

pub fn write_string<S: ByteSink + ?Sized>(sink: &mut S, id: u32, value: &str) -> MuxResult<()> {
    sink.append(&encode_element(id, value.as_bytes())?)
}

pub fn write_binary<S: ByteSink + ?Sized>(sink: &mut S, id: u32, value: &[u8]) -> MuxResult<()> {
    sink.append(&encode_element(id, value)?)
}

/// Append a known-size master element built by `build`.
pub fn write_master<S, F>(sink: &mut S, id: u32, build: F) -> MuxResult<()>
where
    S: ByteSink + ?Sized,
    F: FnOnce(&mut MemorySink) -> MuxResult<()>,
{
    sink.append(&encode_master(id, build)?)
}

/// Write an element header and return the handle that closes it.
pub fn begin_element<S: ByteSink + ?Sized>(
    sink: &mut S,
    id: u32,
    mode: SizeMode,
) -> MuxResult<ElementHandle> {
    let start = sink.position();
    let mut header = Vec::with_capacity(4 + MAX_VINT_WIDTH);
    write_id(&mut header, id)?;

    let width = match mode {
        SizeMode::Known(size) => {
            let width = vint_width(size)?;
            write_vint(&mut header, size, width)?;
            width
        }
        SizeMode::Reserved(width) => {
            write_unknown_size(&mut header, width)?;
            width
        }
    };

    let size_offset = start + id_width(id) as u64;
    sink.append(&header)?;

    Ok(ElementHandle {
        id,
        start,
        size_offset,
        width,
        data_start: sink.position(),
    })
}

/// Close an element: write the bytes appended since its header into the
/// size field, keeping the field's width. Returns the payload size.
pub fn end_element<S: ByteSink + ?Sized>(sink: &mut S, handle: ElementHandle) -> MuxResult<u64> {
    let size = sink.position() - handle.data_start;
    let mut field = Vec::with_capacity(handle.width);
    write_vint(&mut field, size, handle.width).map_err(|_| {
        MuxError::SizeOverflow(format!(
            "element 0x{:X} payload of {size} bytes exceeds its {}-byte size field",
            handle.id, handle.width
        ))
    })?;
    sink.write_at(handle.size_offset, &field)?;
    Ok(size)
}

/// Write `[id][0x88][0.0 as f64]` and return the payload slot.
pub fn reserve_float<S: ByteSink + ?Sized>(sink: &mut S, id: u32) -> MuxResult<ReservedFloat> {
    let bytes = encode_float(id, 0.0)?;
    let offset = sink.position() + (bytes.len() - 8) as u64;
    sink.append(&bytes)?;
    Ok(ReservedFloat { offset })
}

pub fn patch_float<S: ByteSink + ?Sized>(
    sink: &mut S,
    slot: ReservedFloat,
    value: f64,
) -> MuxResult<()> {
    sink.write_at(slot.offset, &value.to_be_bytes())
}

/// Append a Void element of exactly `len` bytes.
pub fn reserve_void<S: ByteSink + ?Sized>(sink: &mut S, len: usize) -> MuxResult<VoidRegion> {
    let offset = sink.position();
    sink.append(&encode_void(len)?)?;
    Ok(VoidRegion { offset, len })
}

/// Replace a Void region with `[id][size][payload]` followed by Void padding.
///
/// A single leftover byte cannot hold a Void, so the size field is widened
/// by one byte instead.
pub fn fill_void<S: ByteSink + ?Sized>(
    sink: &mut S,
    region: VoidRegion,
    id: u32,
    payload: &[u8],
) -> MuxResult<()> {
    let size = payload.len() as u64;
    let mut width = vint_width(size)?;
    let used = id_width(id) + width + payload.len();
    if used > region.len {
        return Err(MuxError::SizeOverflow(format!(
            "element 0x{id:X} needs {used} bytes, reserved region has {}",
            region.len
        )));
    }

    let mut leftover = region.len - used;
    if leftover == 1 {
        width += 1;
        leftover = 0;
    }

    let mut bytes = Vec::with_capacity(region.len);
    write_id(&mut bytes, id)?;
    write_vint(&mut bytes, size, width)?;
    bytes.extend_from_slice(payload);
    if leftover > 0 {
        bytes.extend_from_slice(&encode_void(leftover)?);
    }
    debug_assert_eq!(bytes.len(), region.len);

    sink.write_at(region.offset, &bytes)
}
