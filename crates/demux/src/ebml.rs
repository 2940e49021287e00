//! EBML element reading.
//!
//! EBML uses a leading-1 encoding for variable-size integers:
//! - 1 byte:  `1xxx xxxx`                (7 data bits)
//! - 2 bytes: `01xx xxxx xxxx xxxx`       (14 data bits)
//! - ...
//! - 8 bytes: `0000 0001 xxxx ...`        (56 data bits)
//!
//! IDs keep the marker bit; sizes strip it. An all-ones size means
//! "unknown", which only an unfinished file contains, so it is rejected here.

use std::io::{Read, Seek, SeekFrom};

use webm_common::elements::element_name;
use webm_common::{DemuxError, DemuxResult};

/// An element header with its absolute position.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EbmlElement {
    pub id: u32,
    /// Payload size in bytes.
    pub size: u64,
    /// ID + size field length.
    pub header_size: u64,
    /// Absolute offset of the first ID byte.
    pub position: u64,
}

impl EbmlElement {
    pub fn data_offset(&self) -> u64 {
        self.position + self.header_size
    }

    pub fn end_offset(&self) -> u64 {
        self.data_offset() + self.size
    }

    /// Header plus payload.
    pub fn total_size(&self) -> u64 {
        self.header_size + self.size
    }

    pub fn name(&self) -> &'static str {
        element_name(self.id)
    }
}

/// Width of a vint from its first byte, up to `max_width`.
fn vint_width(first: u8, max_width: u32, offset: u64) -> DemuxResult<u32> {
    let width = first.leading_zeros() + 1;
    if width > max_width {
        return Err(DemuxError::InvalidStructure {
            offset,
            reason: format!("Invalid VINT leading byte 0x{first:02X}"),
        });
    }
    Ok(width)
}

/// Read an element ID (1-4 bytes, marker bit kept).
pub fn read_id<R: Read>(reader: &mut R, offset: u64) -> DemuxResult<(u32, u32)> {
    let first = read_u8(reader)?;
    let width = vint_width(first, 4, offset)?;
    let mut id = u32::from(first);
    for _ in 1..width {
        id = (id << 8) | u32::from(read_u8(reader)?);
    }
    Ok((id, width))
}

/// Read a size vint (1-8 bytes, marker stripped). `None` means unknown size.
pub fn read_size<R: Read>(reader: &mut R, offset: u64) -> DemuxResult<(Option<u64>, u32)> {
    let first = read_u8(reader)?;
    let width = vint_width(first, 8, offset)?;
    let mut value = u64::from(first) & (0xFF >> width);
    for _ in 1..width {
        value = (value << 8) | u64::from(read_u8(reader)?);
    }
    let all_ones = (1u64 << (7 * width)) - 1;
    Ok((if value == all_ones { None } else { Some(value) }, width))
}

/// Read the element header at the current position.
pub fn read_element<R: Read + Seek>(reader: &mut R) -> DemuxResult<EbmlElement> {
    let position = reader.stream_position()?;
    let (id, id_width) = read_id(reader, position)?;
    let (size, size_width) = read_size(reader, position)?;
    let size = size.ok_or(DemuxError::UnknownSize {
        id,
        offset: position,
    })?;
    Ok(EbmlElement {
        id,
        size,
        header_size: u64::from(id_width + size_width),
        position,
    })
}

/// Read the headers of all children of `parent`, skipping their payloads.
///
/// Fails when a child extends past the end of its parent.
pub fn read_children<R: Read + Seek>(
    reader: &mut R,
    parent: &EbmlElement,
) -> DemuxResult<Vec<EbmlElement>> {
    let end = parent.end_offset();
    let mut children = Vec::new();
    let mut pos = reader.seek(SeekFrom::Start(parent.data_offset()))?;

    while pos < end {
        let child = read_element(reader)?;
        if child.end_offset() > end {
            return Err(DemuxError::InvalidStructure {
                offset: child.position,
                reason: format!(
                    "{} (0x{:X}) of {} bytes overruns its parent {}",
                    child.name(),
                    child.id,
                    child.size,
                    parent.name()
                ),
            });
        }
        pos = reader.seek(SeekFrom::Start(child.end_offset()))?;
        children.push(child);
    }
    Ok(children)
}

/// Read an unsigned integer payload (0-8 bytes, big-endian).
pub fn read_uint<R: Read + Seek>(reader: &mut R, elem: &EbmlElement) -> DemuxResult<u64> {
    if elem.size > 8 {
        return Err(DemuxError::InvalidStructure {
            offset: elem.position,
            reason: format!("Invalid uint size: {}", elem.size),
        });
    }
    reader.seek(SeekFrom::Start(elem.data_offset()))?;
    let mut value = 0u64;
    for _ in 0..elem.size {
        value = (value << 8) | u64::from(read_u8(reader)?);
    }
    Ok(value)
}

/// Read a float payload (0, 4 or 8 bytes).
pub fn read_float<R: Read + Seek>(reader: &mut R, elem: &EbmlElement) -> DemuxResult<f64> {
    reader.seek(SeekFrom::Start(elem.data_offset()))?;
    match elem.size {
        0 => Ok(0.0),
        4 => {
            let mut buf = [0u8; 4];
            reader.read_exact(&mut buf)?;
            Ok(f64::from(f32::from_be_bytes(buf)))
        }
        8 => {
            let mut buf = [0u8; 8];
            reader.read_exact(&mut buf)?;
            Ok(f64::from_be_bytes(buf))
        }
        other => Err(DemuxError::InvalidStructure {
            offset: elem.position,
            reason: format!("Invalid float size: {other} (must be 0, 4, or 8)"),
        }),
    }
}

/// Read a string payload. Trailing NULs are tolerated.
pub fn read_string<R: Read + Seek>(reader: &mut R, elem: &EbmlElement) -> DemuxResult<String> {
    let data = read_binary(reader, elem)?;
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8(data[..end].to_vec()).map_err(|e| DemuxError::InvalidStructure {
        offset: elem.position,
        reason: format!("Invalid UTF-8 string: {e}"),
    })
}

pub fn read_binary<R: Read + Seek>(reader: &mut R, elem: &EbmlElement) -> DemuxResult<Vec<u8>> {
    reader.seek(SeekFrom::Start(elem.data_offset()))?;
    let mut buf = vec![0u8; elem.size as usize];
    reader.read_exact(&mut buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => DemuxError::TruncatedData {
            expected: elem.size as usize,
            got: 0,
        },
        _ => DemuxError::Io(e),
    })?;
    Ok(buf)
}

fn read_u8<R: Read>(reader: &mut R) -> DemuxResult<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_id_widths() {
        let mut cursor = Cursor::new(vec![0xA3]);
        assert_eq!(read_id(&mut cursor, 0).unwrap(), (0xA3, 1));

        let mut cursor = Cursor::new(vec![0x42, 0x86]);
        assert_eq!(read_id(&mut cursor, 0).unwrap(), (0x4286, 2));

        let mut cursor = Cursor::new(vec![0x1A, 0x45, 0xDF, 0xA3]);
        assert_eq!(read_id(&mut cursor, 0).unwrap(), (0x1A45DFA3, 4));

        // 5-byte IDs are not valid in WebM
        let mut cursor = Cursor::new(vec![0x08, 0, 0, 0, 0]);
        assert!(read_id(&mut cursor, 0).is_err());
    }

    #[test]
    fn test_read_size() {
        let mut cursor = Cursor::new(vec![0x85]);
        assert_eq!(read_size(&mut cursor, 0).unwrap(), (Some(5), 1));

        let mut cursor = Cursor::new(vec![0x40, 0x03]);
        assert_eq!(read_size(&mut cursor, 0).unwrap(), (Some(3), 2));

        let mut cursor = Cursor::new(vec![0x01, 0, 0, 0, 0, 0, 0x10, 0x00]);
        assert_eq!(read_size(&mut cursor, 0).unwrap(), (Some(4096), 8));

        let mut cursor = Cursor::new(vec![0x08, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(read_size(&mut cursor, 0).unwrap(), (None, 5));
    }

    #[test]
    fn test_unknown_size_rejected() {
        let mut cursor = Cursor::new(vec![0x1F, 0x43, 0xB6, 0x75, 0xFF]);
        assert!(matches!(
            read_element(&mut cursor),
            Err(DemuxError::UnknownSize {
                id: 0x1F43B675,
                offset: 0
            })
        ));
    }

    #[test]
    fn test_read_element_header() {
        let mut cursor = Cursor::new(vec![0x00, 0x42, 0x86, 0x81, 0x01]);
        cursor.set_position(1);
        let elem = read_element(&mut cursor).unwrap();
        assert_eq!(elem.id, 0x4286);
        assert_eq!(elem.size, 1);
        assert_eq!(elem.header_size, 3);
        assert_eq!(elem.data_offset(), 4);
        assert_eq!(read_uint(&mut cursor, &elem).unwrap(), 1);
    }

    #[test]
    fn test_children_and_overrun() {
        // Video { PixelWidth 640, PixelHeight 480 }
        let data = vec![0xE0, 0x88, 0xB0, 0x82, 0x02, 0x80, 0xBA, 0x82, 0x01, 0xE0];
        let mut cursor = Cursor::new(data);
        let parent = read_element(&mut cursor).unwrap();
        let children = read_children(&mut cursor, &parent).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(read_uint(&mut cursor, &children[0]).unwrap(), 640);
        assert_eq!(read_uint(&mut cursor, &children[1]).unwrap(), 480);

        // Parent claims 8 bytes, second child claims 3
        let data = vec![0xE0, 0x88, 0xB0, 0x82, 0x02, 0x80, 0xBA, 0x83, 0x01, 0xE0, 0x00];
        let mut cursor = Cursor::new(data);
        let parent = read_element(&mut cursor).unwrap();
        assert!(matches!(
            read_children(&mut cursor, &parent),
            Err(DemuxError::InvalidStructure { offset: 6, .. })
        ));
    }

    #[test]
    fn test_typed_values() {
        let mut data = vec![0x44, 0x89, 0x88];
        data.extend_from_slice(&1234.5f64.to_be_bytes());
        data.extend_from_slice(&[0x4D, 0x80, 0x85, b'h', b'e', b'l', b'l', b'o']);
        let mut cursor = Cursor::new(data);

        let duration = read_element(&mut cursor).unwrap();
        assert_eq!(read_float(&mut cursor, &duration).unwrap(), 1234.5);

        cursor.set_position(duration.end_offset());
        let app = read_element(&mut cursor).unwrap();
        assert_eq!(read_string(&mut cursor, &app).unwrap(), "hello");
    }

    #[test]
    fn test_zero_length_uint() {
        let mut cursor = Cursor::new(vec![0xE7, 0x80]);
        let elem = read_element(&mut cursor).unwrap();
        assert_eq!(read_uint(&mut cursor, &elem).unwrap(), 0);
    }

    #[test]
    fn test_truncated_binary() {
        let mut cursor = Cursor::new(vec![0x63, 0xA2, 0x85, 1, 2]);
        let elem = read_element(&mut cursor).unwrap();
        assert!(matches!(
            read_binary(&mut cursor, &elem),
            Err(DemuxError::TruncatedData { expected: 5, .. })
        ));
    }
}
