//! SimpleBlock parsing.
//!
//! ```text
//! [track_number: vint] [timecode: int16, relative to cluster] [flags: u8] [frame_data...]
//! ```
//!
//! Flag bits:
//! - bit 7 (0x80): keyframe
//! - bit 3 (0x08): invisible
//! - bits 1-2 (0x06): lacing type (00 = none)
//!
//! WebM writers in this workspace never lace, so laced blocks are reported
//! as unsupported rather than split into frames.

use webm_common::elements::SIMPLE_BLOCK_KEYFRAME;
use webm_common::{DemuxError, DemuxResult};

/// One parsed SimpleBlock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimpleBlock {
    pub track_number: u64,
    /// Offset from the cluster Timecode, in timecode-scale ticks.
    pub relative_timecode: i16,
    pub keyframe: bool,
    pub invisible: bool,
    pub data: Vec<u8>,
}

/// Parse a SimpleBlock payload. `offset` is only used in error reports.
pub fn parse_simple_block(data: &[u8], offset: u64) -> DemuxResult<SimpleBlock> {
    let (track_number, vint_len) = read_block_vint(data, offset)?;

    let header_len = vint_len + 3;
    if data.len() < header_len {
        return Err(DemuxError::TruncatedData {
            expected: header_len,
            got: data.len(),
        });
    }

    let relative_timecode = i16::from_be_bytes([data[vint_len], data[vint_len + 1]]);
    let flags = data[vint_len + 2];

    if (flags >> 1) & 0x03 != 0 {
        return Err(DemuxError::InvalidStructure {
            offset,
            reason: format!("Laced SimpleBlock (flags 0x{flags:02X}) is not supported"),
        });
    }

    Ok(SimpleBlock {
        track_number,
        relative_timecode,
        keyframe: flags & SIMPLE_BLOCK_KEYFRAME != 0,
        invisible: flags & 0x08 != 0,
        data: data[header_len..].to_vec(),
    })
}

/// Track number vint: marker stripped, like a size. Returns `(value, bytes_consumed)`.
fn read_block_vint(data: &[u8], offset: u64) -> DemuxResult<(u64, usize)> {
    let first = *data.first().ok_or(DemuxError::TruncatedData {
        expected: 1,
        got: 0,
    })?;

    let width = first.leading_zeros() as usize + 1;
    if width > 8 {
        return Err(DemuxError::InvalidStructure {
            offset,
            reason: "Invalid track number VINT".into(),
        });
    }
    if data.len() < width {
        return Err(DemuxError::TruncatedData {
            expected: width,
            got: data.len(),
        });
    }

    let mut value = u64::from(first) & (0xFF >> width);
    for &b in &data[1..width] {
        value = (value << 8) | u64::from(b);
    }
    Ok((value, width))
}
