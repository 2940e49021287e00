//! Whole-file WebM reader.
//!
//! Parses every element the muxer writes and keeps positions and sizes, so
//! a test or tool can check that each reserved field was patched correctly.

use std::io::{Cursor, Read, Seek, SeekFrom};

use tracing::{debug, trace, warn};
use webm_common::elements::*;
use webm_common::{DemuxError, DemuxResult, TimecodeScale, TrackKind};

use crate::block::{parse_simple_block, SimpleBlock};
use crate::ebml::{
    read_binary, read_children, read_element, read_float, read_string, read_uint, EbmlElement,
};

/// EBML header fields.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EbmlHeader {
    pub doc_type: String,
    pub doc_type_version: u64,
    pub doc_type_read_version: u64,
}

/// Segment Information.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentInfo {
    /// Nanoseconds per tick.
    pub timecode_scale: u64,
    /// In ticks.
    pub duration: Option<f64>,
    pub muxing_app: String,
    pub writing_app: String,
}

impl Default for SegmentInfo {
    fn default() -> Self {
        Self {
            timecode_scale: TimecodeScale::MILLISECOND.nanos_per_tick(),
            duration: None,
            muxing_app: String::new(),
            writing_app: String::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoInfo {
    pub pixel_width: u64,
    pub pixel_height: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AudioInfo {
    pub sampling_frequency: f64,
    pub channels: u64,
    pub bit_depth: Option<u64>,
}

/// One TrackEntry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackInfo {
    pub number: u64,
    pub uid: u64,
    /// Matroska TrackType (1 = video, 2 = audio).
    pub track_type: u64,
    pub codec_id: String,
    pub codec_private: Option<Vec<u8>>,
    /// How many CodecPrivate elements the entry holds.
    pub codec_private_count: usize,
    pub default_duration_ns: Option<u64>,
    pub video: Option<VideoInfo>,
    pub audio: Option<AudioInfo>,
}

impl TrackInfo {
    pub fn kind(&self) -> Option<TrackKind> {
        TrackKind::ALL
            .into_iter()
            .find(|k| k.matroska_type() == self.track_type)
    }
}

/// A SimpleBlock with its absolute time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    pub track_number: u64,
    /// Cluster Timecode + relative timecode, in ticks.
    pub timecode: i64,
    pub relative_timecode: i16,
    pub keyframe: bool,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterInfo {
    /// Offset from the Segment data start.
    pub position: u64,
    /// Payload size as stored in the size field.
    pub size: u64,
    /// Cluster Timecode in ticks.
    pub timecode: u64,
    pub blocks: Vec<BlockInfo>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CueInfo {
    pub time: u64,
    pub track: u64,
    pub cluster_position: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SeekInfo {
    pub id: u32,
    pub position: u64,
}

/// A direct child of the Segment.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TopLevelElement {
    pub id: u32,
    /// Offset from the Segment data start.
    pub position: u64,
    pub size: u64,
}

/// Everything read from a WebM file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedWebm {
    pub header: EbmlHeader,
    /// Absolute offset of the Segment payload.
    pub segment_data_offset: u64,
    pub segment_size: u64,
    pub elements: Vec<TopLevelElement>,
    pub seek_entries: Vec<SeekInfo>,
    pub info: SegmentInfo,
    pub tracks: Vec<TrackInfo>,
    pub clusters: Vec<ClusterInfo>,
    pub cues: Vec<CueInfo>,
    /// Total bytes (headers included) of all Void elements.
    pub void_bytes: u64,
}

impl ParsedWebm {
    pub fn track(&self, number: u64) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.number == number)
    }

    pub fn track_of_kind(&self, kind: TrackKind) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.kind() == Some(kind))
    }

    /// All blocks in file order.
    pub fn blocks(&self) -> impl Iterator<Item = &BlockInfo> {
        self.clusters.iter().flat_map(|c| c.blocks.iter())
    }

    /// Block timestamps of one track in microseconds, in file order.
    pub fn timestamps_us(&self, track_number: u64) -> Vec<u64> {
        let scale = TimecodeScale(self.info.timecode_scale);
        self.blocks()
            .filter(|b| b.track_number == track_number)
            .map(|b| scale.micros_from_ticks(b.timecode.max(0) as u64))
            .collect()
    }

    /// Segment-relative position of the first top-level element with `id`.
    pub fn position_of(&self, id: u32) -> Option<u64> {
        self.elements.iter().find(|e| e.id == id).map(|e| e.position)
    }
}

/// Reads a complete, finalized WebM file.
pub struct WebmReader;

impl WebmReader {
    pub fn parse_bytes(data: &[u8]) -> DemuxResult<ParsedWebm> {
        Self::read(Cursor::new(data))
    }

    pub fn read<R: Read + Seek>(mut reader: R) -> DemuxResult<ParsedWebm> {
        let file_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut parsed = ParsedWebm {
            header: parse_ebml_header(&mut reader)?,
            ..ParsedWebm::default()
        };

        let segment = read_element(&mut reader)?;
        if segment.id != SEGMENT {
            return Err(DemuxError::InvalidStructure {
                offset: segment.position,
                reason: format!("Expected Segment (0x18538067), got 0x{:08X}", segment.id),
            });
        }
        if segment.end_offset() != file_len {
            return Err(DemuxError::InvalidStructure {
                offset: segment.position,
                reason: format!(
                    "Segment ends at {} but the file is {} bytes",
                    segment.end_offset(),
                    file_len
                ),
            });
        }
        parsed.segment_data_offset = segment.data_offset();
        parsed.segment_size = segment.size;

        for child in read_children(&mut reader, &segment)? {
            let position = child.position - segment.data_offset();
            parsed.elements.push(TopLevelElement {
                id: child.id,
                position,
                size: child.size,
            });

            match child.id {
                SEEK_HEAD => parsed.seek_entries = parse_seek_head(&mut reader, &child)?,
                INFO => parsed.info = parse_info(&mut reader, &child)?,
                TRACKS => {
                    for entry in read_children(&mut reader, &child)? {
                        match entry.id {
                            TRACK_ENTRY => {
                                let (track, voids) = parse_track_entry(&mut reader, &entry)?;
                                parsed.void_bytes += voids;
                                parsed.tracks.push(track);
                            }
                            VOID => parsed.void_bytes += entry.total_size(),
                            other => trace!(id = other, "Skipping Tracks child"),
                        }
                    }
                }
                CLUSTER => {
                    let cluster = parse_cluster(&mut reader, &child, position)?;
                    parsed.clusters.push(cluster);
                }
                CUES => parsed.cues = parse_cues(&mut reader, &child)?,
                VOID => parsed.void_bytes += child.total_size(),
                other => warn!(id = other, position, "Skipping unknown top-level element"),
            }
        }

        debug!(
            tracks = parsed.tracks.len(),
            clusters = parsed.clusters.len(),
            cues = parsed.cues.len(),
            "Parsed WebM file"
        );
        Ok(parsed)
    }
}

fn parse_ebml_header<R: Read + Seek>(reader: &mut R) -> DemuxResult<EbmlHeader> {
    let elem = read_element(reader).map_err(|_| DemuxError::NotWebm)?;
    if elem.id != EBML_HEADER {
        return Err(DemuxError::NotWebm);
    }

    let mut header = EbmlHeader::default();
    for child in read_children(reader, &elem)? {
        match child.id {
            DOC_TYPE => header.doc_type = read_string(reader, &child)?,
            DOC_TYPE_VERSION => header.doc_type_version = read_uint(reader, &child)?,
            DOC_TYPE_READ_VERSION => header.doc_type_read_version = read_uint(reader, &child)?,
            _ => {}
        }
    }

    if header.doc_type != "webm" {
        return Err(DemuxError::UnsupportedDocType(header.doc_type));
    }
    reader.seek(SeekFrom::Start(elem.end_offset()))?;
    Ok(header)
}

fn parse_seek_head<R: Read + Seek>(
    reader: &mut R,
    elem: &EbmlElement,
) -> DemuxResult<Vec<SeekInfo>> {
    let mut entries = Vec::new();
    for seek in read_children(reader, elem)? {
        if seek.id != SEEK {
            continue;
        }
        let mut id = None;
        let mut position = None;
        for child in read_children(reader, &seek)? {
            match child.id {
                SEEK_ID => {
                    let bytes = read_binary(reader, &child)?;
                    id = Some(bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b)));
                }
                SEEK_POSITION => position = Some(read_uint(reader, &child)?),
                _ => {}
            }
        }
        match (id, position) {
            (Some(id), Some(position)) => entries.push(SeekInfo { id, position }),
            _ => {
                return Err(DemuxError::InvalidStructure {
                    offset: seek.position,
                    reason: "Seek entry without SeekID or SeekPosition".into(),
                })
            }
        }
    }
    Ok(entries)
}

fn parse_info<R: Read + Seek>(reader: &mut R, elem: &EbmlElement) -> DemuxResult<SegmentInfo> {
    let mut info = SegmentInfo::default();
    for child in read_children(reader, elem)? {
        match child.id {
            TIMECODE_SCALE => info.timecode_scale = read_uint(reader, &child)?,
            DURATION => info.duration = Some(read_float(reader, &child)?),
            MUXING_APP => info.muxing_app = read_string(reader, &child)?,
            WRITING_APP => info.writing_app = read_string(reader, &child)?,
            _ => {}
        }
    }
    Ok(info)
}

/// Returns the track and the Void bytes found inside the entry.
fn parse_track_entry<R: Read + Seek>(
    reader: &mut R,
    elem: &EbmlElement,
) -> DemuxResult<(TrackInfo, u64)> {
    let mut track = TrackInfo::default();
    let mut voids = 0;

    for child in read_children(reader, elem)? {
        match child.id {
            TRACK_NUMBER => track.number = read_uint(reader, &child)?,
            TRACK_UID => track.uid = read_uint(reader, &child)?,
            TRACK_TYPE => track.track_type = read_uint(reader, &child)?,
            CODEC_ID => track.codec_id = read_string(reader, &child)?,
            CODEC_PRIVATE => {
                track.codec_private_count += 1;
                track.codec_private = Some(read_binary(reader, &child)?);
            }
            DEFAULT_DURATION => track.default_duration_ns = Some(read_uint(reader, &child)?),
            VIDEO => {
                let mut video = VideoInfo {
                    pixel_width: 0,
                    pixel_height: 0,
                };
                for v in read_children(reader, &child)? {
                    match v.id {
                        PIXEL_WIDTH => video.pixel_width = read_uint(reader, &v)?,
                        PIXEL_HEIGHT => video.pixel_height = read_uint(reader, &v)?,
                        _ => {}
                    }
                }
                track.video = Some(video);
            }
            AUDIO => {
                let mut audio = AudioInfo {
                    sampling_frequency: 8000.0,
                    channels: 1,
                    bit_depth: None,
                };
                for a in read_children(reader, &child)? {
                    match a.id {
                        SAMPLING_FREQUENCY => audio.sampling_frequency = read_float(reader, &a)?,
                        CHANNELS => audio.channels = read_uint(reader, &a)?,
                        BIT_DEPTH => audio.bit_depth = Some(read_uint(reader, &a)?),
                        _ => {}
                    }
                }
                track.audio = Some(audio);
            }
            VOID => voids += child.total_size(),
            _ => {}
        }
    }

    debug!(
        number = track.number,
        codec = %track.codec_id,
        codec_private = track.codec_private_count,
        "Parsed track entry"
    );
    Ok((track, voids))
}

fn parse_cluster<R: Read + Seek>(
    reader: &mut R,
    elem: &EbmlElement,
    position: u64,
) -> DemuxResult<ClusterInfo> {
    let children = read_children(reader, elem)?;

    // Timecode must precede the blocks that are relative to it.
    let mut timecode = None;
    let mut blocks = Vec::new();
    for child in children {
        match child.id {
            TIMECODE => timecode = Some(read_uint(reader, &child)?),
            SIMPLE_BLOCK => {
                let base = timecode.ok_or_else(|| DemuxError::InvalidStructure {
                    offset: child.position,
                    reason: "SimpleBlock before cluster Timecode".into(),
                })?;
                let data = read_binary(reader, &child)?;
                let SimpleBlock {
                    track_number,
                    relative_timecode,
                    keyframe,
                    data,
                    ..
                } = parse_simple_block(&data, child.position)?;
                blocks.push(BlockInfo {
                    track_number,
                    timecode: base as i64 + i64::from(relative_timecode),
                    relative_timecode,
                    keyframe,
                    data,
                });
            }
            _ => {}
        }
    }

    Ok(ClusterInfo {
        position,
        size: elem.size,
        timecode: timecode.ok_or_else(|| DemuxError::InvalidStructure {
            offset: elem.position,
            reason: "Cluster without Timecode".into(),
        })?,
        blocks,
    })
}

fn parse_cues<R: Read + Seek>(reader: &mut R, elem: &EbmlElement) -> DemuxResult<Vec<CueInfo>> {
    let mut cues = Vec::new();
    for point in read_children(reader, elem)? {
        if point.id != CUE_POINT {
            continue;
        }
        let mut time = None;
        let mut track = None;
        let mut cluster_position = None;
        for child in read_children(reader, &point)? {
            match child.id {
                CUE_TIME => time = Some(read_uint(reader, &child)?),
                CUE_TRACK_POSITIONS => {
                    for pos in read_children(reader, &child)? {
                        match pos.id {
                            CUE_TRACK => track = Some(read_uint(reader, &pos)?),
                            CUE_CLUSTER_POSITION => {
                                cluster_position = Some(read_uint(reader, &pos)?)
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
        match (time, track, cluster_position) {
            (Some(time), Some(track), Some(cluster_position)) => cues.push(CueInfo {
                time,
                track,
                cluster_position,
            }),
            _ => {
                return Err(DemuxError::InvalidStructure {
                    offset: point.position,
                    reason: "Incomplete CuePoint".into(),
                })
            }
        }
    }
    Ok(cues)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(id: &[u8], payload: &[u8]) -> Vec<u8> {
        assert!(payload.len() < 127);
        let mut out = id.to_vec();
        out.push(0x80 | payload.len() as u8);
        out.extend_from_slice(payload);
        out
    }

    fn ebml_header(doc_type: &str) -> Vec<u8> {
        element(&[0x1A, 0x45, 0xDF, 0xA3], &element(&[0x42, 0x82], doc_type.as_bytes()))
    }

    /// Header + Segment with an 8-byte size around `body`.
    fn file(body: &[u8]) -> Vec<u8> {
        let mut out = ebml_header("webm");
        out.extend_from_slice(&[0x18, 0x53, 0x80, 0x67, 0x01, 0, 0, 0, 0, 0, 0]);
        out.push(body.len() as u8);
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn rejects_non_ebml() {
        assert!(matches!(
            WebmReader::parse_bytes(b"RIFF\x00\x00\x00\x00WAVE"),
            Err(DemuxError::NotWebm)
        ));
    }

    #[test]
    fn rejects_matroska_doc_type() {
        let mut data = ebml_header("matroska");
        data.extend_from_slice(&[0x18, 0x53, 0x80, 0x67, 0x80]);
        assert!(matches!(
            WebmReader::parse_bytes(&data),
            Err(DemuxError::UnsupportedDocType(t)) if t == "matroska"
        ));
    }

    #[test]
    fn rejects_unknown_segment_size() {
        let mut data = ebml_header("webm");
        data.extend_from_slice(&[0x18, 0x53, 0x80, 0x67, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(
            WebmReader::parse_bytes(&data),
            Err(DemuxError::UnknownSize { id: 0x18538067, .. })
        ));
    }

    #[test]
    fn rejects_segment_size_mismatch() {
        let mut data = file(&element(&[0xEC], &[0; 4]));
        data.push(0x00);
        assert!(WebmReader::parse_bytes(&data).is_err());
    }

    #[test]
    fn parses_cluster_blocks() {
        let timecode = element(&[0xE7], &[0x07, 0xD0]); // 2000
        let block = element(&[0xA3], &[0x81, 0x00, 0x21, 0x80, 0xAB]); // +33, key
        let mut cluster_body = timecode;
        cluster_body.extend_from_slice(&block);

        let mut body = element(&[0xEC], &[0; 3]);
        body.extend_from_slice(&element(&[0x1F, 0x43, 0xB6, 0x75], &cluster_body));

        let parsed = WebmReader::parse_bytes(&file(&body)).unwrap();
        assert_eq!(parsed.header.doc_type, "webm");
        assert_eq!(parsed.void_bytes, 5);
        assert_eq!(parsed.clusters.len(), 1);

        let cluster = &parsed.clusters[0];
        assert_eq!(cluster.position, 5);
        assert_eq!(cluster.timecode, 2000);
        assert_eq!(cluster.blocks[0].timecode, 2033);
        assert!(cluster.blocks[0].keyframe);
        assert_eq!(parsed.timestamps_us(1), vec![2_033_000]);
        assert_eq!(parsed.position_of(CLUSTER), Some(5));
    }

    #[test]
    fn block_before_timecode_rejected() {
        let block = element(&[0xA3], &[0x81, 0x00, 0x00, 0x80]);
        let body = element(&[0x1F, 0x43, 0xB6, 0x75], &block);
        assert!(WebmReader::parse_bytes(&file(&body)).is_err());
    }
}
