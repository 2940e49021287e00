//! WebM container structure: header, Segment skeleton, clusters, blocks, cues.
//!
//! Layout of a finished file:
//! ```text
//! EBML header
//! Segment (8-byte size, patched at finalize)
//! ├── SeekHead   (Void region, filled at finalize)
//! ├── Info       (Duration reserved, patched at finalize)
//! ├── Tracks     (one TrackEntry per track, CodecPrivate slot per entry)
//! ├── Cluster*   (5-byte size, patched when the next cluster opens)
//! └── Cues       (only if at least one cue was recorded)
//! ```

use byteorder::{BigEndian, WriteBytesExt};
use tracing::debug;

use webm_common::elements::*;
use webm_common::{AudioTrackOptions, MuxerOptions, TimecodeScale, TrackKind, VideoTrackOptions};

use crate::cues::{CuePoint, SeekEntry};
use crate::ebml::{
    self, begin_element, end_element, fill_void, reserve_float, reserve_void, write_binary,
    write_float, write_master, write_string, write_uint, ElementHandle, ReservedFloat, SizeMode,
    VoidRegion,
};
use crate::error::MuxResult;
use crate::sink::{ByteSink, MemorySink};

/// Width of the Segment size field.
pub const SEGMENT_SIZE_WIDTH: usize = 8;
/// Width of each Cluster size field (clusters stay well below 32 GiB).
pub const CLUSTER_SIZE_WIDTH: usize = 5;
/// Width of the Info / Tracks / TrackEntry size fields.
const HEADER_SIZE_WIDTH: usize = 4;
/// Bytes kept free for the SeekHead (three Seek entries with 8-byte positions fit).
pub const SEEK_HEAD_RESERVE: usize = 96;

const EBML_DOC_TYPE: &str = "webm";
const EBML_DOC_TYPE_VERSION: u64 = 2;

/// Where a track's CodecPrivate lives.
#[derive(Debug, PartialEq, Eq)]
pub enum CodecPrivateSlot {
    /// Void region waiting for the first codec private data.
    Pending(VoidRegion),
    /// Already written (from the track options or an earlier chunk).
    Written,
    /// No space was reserved.
    Unreserved,
}

/// Per-track state produced when the Tracks element is written.
#[derive(Debug)]
pub struct TrackLayout {
    pub kind: TrackKind,
    pub number: u64,
    pub codec_private: CodecPrivateSlot,
}

/// Everything written at construction that must be patched later.
#[derive(Debug)]
pub struct Skeleton {
    pub segment: ElementHandle,
    pub seek_head: VoidRegion,
    pub duration: ReservedFloat,
    /// Info and Tracks positions, Segment-relative.
    pub seek_entries: Vec<SeekEntry>,
    pub tracks: Vec<TrackLayout>,
}

impl Skeleton {
    /// Absolute offset of the first byte inside the Segment.
    pub fn segment_data_start(&self) -> u64 {
        self.segment.data_start()
    }

    pub fn track(&self, kind: TrackKind) -> Option<&TrackLayout> {
        self.tracks.iter().find(|t| t.kind == kind)
    }

    pub fn track_mut(&mut self, kind: TrackKind) -> Option<&mut TrackLayout> {
        self.tracks.iter_mut().find(|t| t.kind == kind)
    }
}

/// Write the EBML header, open the Segment and write SeekHead space, Info and Tracks.
pub fn write_skeleton<S: ByteSink + ?Sized>(
    sink: &mut S,
    options: &MuxerOptions,
) -> MuxResult<Skeleton> {
    write_ebml_header(sink)?;
    let segment = begin_element(sink, SEGMENT, SizeMode::Reserved(SEGMENT_SIZE_WIDTH))?;
    let seek_head = reserve_void(sink, SEEK_HEAD_RESERVE)?;

    let info_position = sink.position() - segment.data_start();
    let duration = write_info(sink, options)?;

    let tracks_position = sink.position() - segment.data_start();
    let tracks = write_tracks(sink, options)?;

    Ok(Skeleton {
        segment,
        seek_head,
        duration,
        seek_entries: vec![
            SeekEntry::new(INFO, info_position),
            SeekEntry::new(TRACKS, tracks_position),
        ],
        tracks,
    })
}

pub fn write_ebml_header<S: ByteSink + ?Sized>(sink: &mut S) -> MuxResult<()> {
    write_master(sink, EBML_HEADER, |s| {
        write_uint(s, EBML_VERSION, 1)?;
        write_uint(s, EBML_READ_VERSION, 1)?;
        write_uint(s, EBML_MAX_ID_LENGTH, 4)?;
        write_uint(s, EBML_MAX_SIZE_LENGTH, ebml::MAX_VINT_WIDTH as u64)?;
        write_string(s, DOC_TYPE, EBML_DOC_TYPE)?;
        write_uint(s, DOC_TYPE_VERSION, EBML_DOC_TYPE_VERSION)?;
        write_uint(s, DOC_TYPE_READ_VERSION, EBML_DOC_TYPE_VERSION)
    })
}

/// Segment Info. Returns the reserved Duration slot.
pub fn write_info<S: ByteSink + ?Sized>(
    sink: &mut S,
    options: &MuxerOptions,
) -> MuxResult<ReservedFloat> {
    let info = begin_element(sink, INFO, SizeMode::Reserved(HEADER_SIZE_WIDTH))?;
    write_uint(sink, TIMECODE_SCALE, options.timecode_scale.nanos_per_tick())?;
    write_string(sink, MUXING_APP, &options.muxing_app)?;
    write_string(sink, WRITING_APP, &options.writing_app)?;
    let duration = reserve_float(sink, DURATION)?;
    end_element(sink, info)?;
    Ok(duration)
}

/// Tracks element. Video (when configured) is track 1, audio the next number.
pub fn write_tracks<S: ByteSink + ?Sized>(
    sink: &mut S,
    options: &MuxerOptions,
) -> MuxResult<Vec<TrackLayout>> {
    let tracks = begin_element(sink, TRACKS, SizeMode::Reserved(HEADER_SIZE_WIDTH))?;
    let mut layouts = Vec::with_capacity(2);
    let mut number = 1;

    if let Some(video) = &options.video {
        let slot = write_video_entry(sink, number, video, options.codec_private_reserve)?;
        layouts.push(TrackLayout {
            kind: TrackKind::Video,
            number,
            codec_private: slot,
        });
        number += 1;
    }
    if let Some(audio) = &options.audio {
        let slot = write_audio_entry(sink, number, audio, options.codec_private_reserve)?;
        layouts.push(TrackLayout {
            kind: TrackKind::Audio,
            number,
            codec_private: slot,
        });
    }

    end_element(sink, tracks)?;
    Ok(layouts)
}

fn write_video_entry<S: ByteSink + ?Sized>(
    sink: &mut S,
    number: u64,
    video: &VideoTrackOptions,
    reserve: usize,
) -> MuxResult<CodecPrivateSlot> {
    let entry = begin_track_entry(sink, number, TrackKind::Video, &video.codec)?;
    let slot = write_codec_private_slot(sink, video.codec_private.as_deref(), reserve)?;
    if let Some(fps) = video.frame_rate {
        write_uint(sink, DEFAULT_DURATION, (1e9 / fps).round() as u64)?;
    }
    write_master(sink, VIDEO, |s| {
        write_uint(s, PIXEL_WIDTH, u64::from(video.width))?;
        write_uint(s, PIXEL_HEIGHT, u64::from(video.height))
    })?;
    end_element(sink, entry)?;
    Ok(slot)
}

fn write_audio_entry<S: ByteSink + ?Sized>(
    sink: &mut S,
    number: u64,
    audio: &AudioTrackOptions,
    reserve: usize,
) -> MuxResult<CodecPrivateSlot> {
    let entry = begin_track_entry(sink, number, TrackKind::Audio, &audio.codec)?;
    let slot = write_codec_private_slot(sink, audio.codec_private.as_deref(), reserve)?;
    write_master(sink, AUDIO, |s| {
        write_float(s, SAMPLING_FREQUENCY, audio.sample_rate)?;
        write_uint(s, CHANNELS, u64::from(audio.channels))?;
        if let Some(bits) = audio.bit_depth {
            write_uint(s, BIT_DEPTH, u64::from(bits))?;
        }
        Ok(())
    })?;
    end_element(sink, entry)?;
    Ok(slot)
}

fn begin_track_entry<S: ByteSink + ?Sized>(
    sink: &mut S,
    number: u64,
    kind: TrackKind,
    codec: &str,
) -> MuxResult<ElementHandle> {
    let entry = begin_element(sink, TRACK_ENTRY, SizeMode::Reserved(HEADER_SIZE_WIDTH))?;
    write_uint(sink, TRACK_NUMBER, number)?;
    // UID mirrors the track number so output is deterministic.
    write_uint(sink, TRACK_UID, number)?;
    write_uint(sink, TRACK_TYPE, kind.matroska_type())?;
    write_string(sink, CODEC_ID, codec)?;
    Ok(entry)
}

fn write_codec_private_slot<S: ByteSink + ?Sized>(
    sink: &mut S,
    initial: Option<&[u8]>,
    reserve: usize,
) -> MuxResult<CodecPrivateSlot> {
    let initial = initial.filter(|data| !data.is_empty());
    match (initial, reserve) {
        (Some(data), 0) => {
            write_binary(sink, CODEC_PRIVATE, data)?;
            Ok(CodecPrivateSlot::Written)
        }
        (None, 0) => Ok(CodecPrivateSlot::Unreserved),
        (Some(data), _) => {
            let region = reserve_void(sink, reserve)?;
            fill_void(sink, region, CODEC_PRIVATE, data)?;
            Ok(CodecPrivateSlot::Written)
        }
        (None, _) => Ok(CodecPrivateSlot::Pending(reserve_void(sink, reserve)?)),
    }
}

/// Write codec private data into a pending slot.
pub fn fill_codec_private<S: ByteSink + ?Sized>(
    sink: &mut S,
    slot: VoidRegion,
    data: &[u8],
) -> MuxResult<()> {
    debug!(offset = slot.offset(), len = data.len(), "Writing CodecPrivate into reserved slot");
    fill_void(sink, slot, CODEC_PRIVATE, data)
}

/// The cluster currently receiving blocks.
#[derive(Debug)]
pub struct OpenCluster {
    handle: ElementHandle,
    base_us: u64,
    base_ticks: u64,
    position: u64,
}

impl OpenCluster {
    /// Cluster base in microseconds.
    pub fn base_us(&self) -> u64 {
        self.base_us
    }

    /// Cluster Timecode in timecode-scale ticks.
    pub fn base_ticks(&self) -> u64 {
        self.base_ticks
    }

    /// Cluster offset relative to the Segment data start.
    pub fn position(&self) -> u64 {
        self.position
    }
}

/// Opens and closes clusters, one at a time.
#[derive(Debug, Default)]
pub struct ClusterWriter {
    current: Option<OpenCluster>,
    count: usize,
}

impl ClusterWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&OpenCluster> {
        self.current.as_ref()
    }

    /// Clusters opened so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Close any open cluster, then start a new one based at `base_us`.
    pub fn open<S: ByteSink + ?Sized>(
        &mut self,
        sink: &mut S,
        segment_data_start: u64,
        base_us: u64,
        scale: TimecodeScale,
    ) -> MuxResult<&OpenCluster> {
        self.close(sink)?;

        let base_ticks = scale.ticks_from_micros(base_us);
        let handle = begin_element(sink, CLUSTER, SizeMode::Reserved(CLUSTER_SIZE_WIDTH))?;
        write_uint(sink, TIMECODE, base_ticks)?;

        let position = handle.start() - segment_data_start;
        debug!(
            cluster = self.count,
            position, base_us, base_ticks, "Opened cluster"
        );
        self.count += 1;
        Ok(self.current.insert(OpenCluster {
            handle,
            base_us,
            base_ticks,
            position,
        }))
    }

    /// Patch the open cluster's size. No-op when none is open.
    pub fn close<S: ByteSink + ?Sized>(&mut self, sink: &mut S) -> MuxResult<()> {
        if let Some(cluster) = self.current.take() {
            let size = end_element(sink, cluster.handle)?;
            debug!(position = cluster.position, size, "Closed cluster");
        }
        Ok(())
    }
}

/// `[SimpleBlock][size][track vint][relative i16][flags][payload]`.
pub fn write_simple_block<S: ByteSink + ?Sized>(
    sink: &mut S,
    track_number: u64,
    relative_ticks: i16,
    keyframe: bool,
    payload: &[u8],
) -> MuxResult<()> {
    let track_width = ebml::vint_width(track_number)?;
    let body_len = (track_width + 3 + payload.len()) as u64;

    let mut header = Vec::with_capacity(16);
    ebml::write_id(&mut header, SIMPLE_BLOCK)?;
    ebml::write_vint(&mut header, body_len, ebml::vint_width(body_len)?)?;
    ebml::write_vint(&mut header, track_number, track_width)?;
    header.write_i16::<BigEndian>(relative_ticks)?;
    header.write_u8(if keyframe { SIMPLE_BLOCK_KEYFRAME } else { 0 })?;

    sink.append(&header)?;
    sink.append(payload)
}

/// Write the Cues element. Returns its Segment-relative position, or `None`
/// when there is nothing to index.
pub fn write_cues<S: ByteSink + ?Sized>(
    sink: &mut S,
    segment_data_start: u64,
    cues: &[CuePoint],
) -> MuxResult<Option<u64>> {
    if cues.is_empty() {
        return Ok(None);
    }

    let position = sink.position() - segment_data_start;
    write_master(sink, CUES, |s| {
        for cue in cues {
            write_master(s, CUE_POINT, |p| {
                write_uint(p, CUE_TIME, cue.time_ticks)?;
                write_master(p, CUE_TRACK_POSITIONS, |t| {
                    write_uint(t, CUE_TRACK, cue.track_number)?;
                    write_uint(t, CUE_CLUSTER_POSITION, cue.cluster_position)
                })
            })?;
        }
        Ok(())
    })?;
    debug!(position, count = cues.len(), "Wrote Cues");
    Ok(Some(position))
}

/// Replace the reserved SeekHead region with the real index.
pub fn write_seek_head<S: ByteSink + ?Sized>(
    sink: &mut S,
    region: VoidRegion,
    entries: &[SeekEntry],
) -> MuxResult<()> {
    let mut payload = MemorySink::new();
    for entry in entries {
        let mut id_bytes = Vec::with_capacity(4);
        ebml::write_id(&mut id_bytes, entry.id)?;
        write_master(&mut payload, SEEK, |s| {
            write_binary(s, SEEK_ID, &id_bytes)?;
            write_uint(s, SEEK_POSITION, entry.position)
        })?;
    }
    fill_void(sink, region, SEEK_HEAD, payload.bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use webm_common::elements::codec_ids;

    fn vp8_options() -> MuxerOptions {
        MuxerOptions::video_only(VideoTrackOptions::new(codec_ids::VP8, 320, 240))
    }

    #[test]
    fn ebml_header_bytes() {
        let mut sink = MemorySink::new();
        write_ebml_header(&mut sink).unwrap();
        let bytes = sink.bytes();
        assert_eq!(&bytes[..4], &[0x1A, 0x45, 0xDF, 0xA3]);
        // DocType "webm" appears unterminated right after its size byte
        let doc_type = bytes
            .windows(7)
            .position(|w| w == [0x42, 0x82, 0x84, b'w', b'e', b'b', b'm']);
        assert!(doc_type.is_some());
        assert_eq!(bytes[4] as usize & 0x7F, bytes.len() - 5);
    }

    #[test]
    fn skeleton_positions() {
        let mut sink = MemorySink::new();
        let skeleton = write_skeleton(&mut sink, &vp8_options()).unwrap();

        let data_start = skeleton.segment_data_start();
        let bytes = sink.bytes();
        // Segment ID followed by the 8-byte unknown size
        let seg = skeleton.segment.start() as usize;
        assert_eq!(&bytes[seg..seg + 4], &[0x18, 0x53, 0x80, 0x67]);
        assert_eq!(bytes[seg + 4], 0x01);
        assert_eq!(data_start as usize, seg + 12);

        // SeekHead region comes first, then Info
        assert_eq!(skeleton.seek_head.offset(), data_start);
        assert_eq!(bytes[data_start as usize], 0xEC);
        let info = &skeleton.seek_entries[0];
        assert_eq!(info.id, INFO);
        assert_eq!(info.position, SEEK_HEAD_RESERVE as u64);
        let info_abs = (data_start + info.position) as usize;
        assert_eq!(&bytes[info_abs..info_abs + 4], &[0x15, 0x49, 0xA9, 0x66]);

        let tracks_abs = (data_start + skeleton.seek_entries[1].position) as usize;
        assert_eq!(&bytes[tracks_abs..tracks_abs + 4], &[0x16, 0x54, 0xAE, 0x6B]);
    }

    #[test]
    fn track_numbers_video_first() {
        let options = vp8_options().with_audio(AudioTrackOptions::new(codec_ids::OPUS, 2, 48_000.0));
        let mut sink = MemorySink::new();
        let skeleton = write_skeleton(&mut sink, &options).unwrap();
        assert_eq!(skeleton.track(TrackKind::Video).unwrap().number, 1);
        assert_eq!(skeleton.track(TrackKind::Audio).unwrap().number, 2);

        let audio_only = MuxerOptions::audio_only(AudioTrackOptions::new(codec_ids::OPUS, 1, 48_000.0));
        let mut sink = MemorySink::new();
        let skeleton = write_skeleton(&mut sink, &audio_only).unwrap();
        assert_eq!(skeleton.track(TrackKind::Audio).unwrap().number, 1);
        assert!(skeleton.track(TrackKind::Video).is_none());
    }

    #[test]
    fn codec_private_slot_states() {
        let mut options = vp8_options();
        options.video.as_mut().unwrap().codec_private = Some(vec![1, 2, 3]);
        let mut sink = MemorySink::new();
        let skeleton = write_skeleton(&mut sink, &options).unwrap();
        assert_eq!(
            skeleton.track(TrackKind::Video).unwrap().codec_private,
            CodecPrivateSlot::Written
        );
        assert!(sink
            .bytes()
            .windows(6)
            .any(|w| w == [0x63, 0xA2, 0x83, 1, 2, 3]));

        let mut options = vp8_options();
        options.codec_private_reserve = 0;
        let mut sink = MemorySink::new();
        let skeleton = write_skeleton(&mut sink, &options).unwrap();
        assert_eq!(
            skeleton.track(TrackKind::Video).unwrap().codec_private,
            CodecPrivateSlot::Unreserved
        );

        // No reserve: configured data is written inline
        let mut options = vp8_options();
        options.codec_private_reserve = 0;
        options.video.as_mut().unwrap().codec_private = Some(vec![4, 5]);
        let mut sink = MemorySink::new();
        let skeleton = write_skeleton(&mut sink, &options).unwrap();
        assert_eq!(
            skeleton.track(TrackKind::Video).unwrap().codec_private,
            CodecPrivateSlot::Written
        );
        assert!(sink.bytes().windows(5).any(|w| w == [0x63, 0xA2, 0x82, 4, 5]));
    }

    #[test]
    fn pending_slot_keeps_size() {
        let mut sink = MemorySink::new();
        let mut skeleton = write_skeleton(&mut sink, &vp8_options()).unwrap();
        let before = sink.position();

        let track = skeleton.track_mut(TrackKind::Video).unwrap();
        let slot = std::mem::replace(&mut track.codec_private, CodecPrivateSlot::Written);
        let CodecPrivateSlot::Pending(region) = slot else {
            panic!("expected a pending slot");
        };
        assert_eq!(region.len(), webm_common::config::DEFAULT_CODEC_PRIVATE_RESERVE);
        fill_codec_private(&mut sink, region, &[0xAB; 10]).unwrap();
        assert_eq!(sink.position(), before);
    }

    #[test]
    fn cluster_open_close() {
        let mut sink = MemorySink::new();
        sink.append(&[0; 10]).unwrap();
        let mut clusters = ClusterWriter::new();

        let cluster = clusters
            .open(&mut sink, 4, 2_000_000, TimecodeScale::MILLISECOND)
            .unwrap();
        assert_eq!(cluster.base_ticks(), 2000);
        assert_eq!(cluster.position(), 6);

        write_simple_block(&mut sink, 1, 0, true, &[0xAA; 3]).unwrap();
        clusters.close(&mut sink).unwrap();
        assert!(clusters.current().is_none());
        assert_eq!(clusters.count(), 1);

        let bytes = sink.bytes();
        // 5-byte size = Timecode (4 bytes) + SimpleBlock (2 + 7)
        assert_eq!(&bytes[14..19], &[0x08, 0, 0, 0, 13]);
        // Timecode 2000
        assert_eq!(&bytes[19..23], &[0xE7, 0x82, 0x07, 0xD0]);
    }

    #[test]
    fn simple_block_layout() {
        let mut sink = MemorySink::new();
        write_simple_block(&mut sink, 2, -3, false, &[9, 8]).unwrap();
        assert_eq!(
            sink.bytes(),
            &[0xA3, 0x86, 0x82, 0xFF, 0xFD, 0x00, 9, 8]
        );

        let mut sink = MemorySink::new();
        write_simple_block(&mut sink, 1, 33, true, &[]).unwrap();
        assert_eq!(sink.bytes(), &[0xA3, 0x84, 0x81, 0x00, 0x21, 0x80]);
    }

    #[test]
    fn empty_cues_are_omitted() {
        let mut sink = MemorySink::new();
        assert_eq!(write_cues(&mut sink, 0, &[]).unwrap(), None);
        assert_eq!(sink.position(), 0);
    }

    #[test]
    fn cues_encoding() {
        let mut sink = MemorySink::new();
        sink.append(&[0; 4]).unwrap();
        let cues = [CuePoint {
            track_number: 1,
            time_ticks: 0,
            cluster_position: 300,
        }];
        assert_eq!(write_cues(&mut sink, 2, &cues).unwrap(), Some(2));
        assert_eq!(
            &sink.bytes()[4..],
            &[
                0x1C, 0x53, 0xBB, 0x6B, 0x8E, // Cues
                0xBB, 0x8C, // CuePoint
                0xB3, 0x81, 0x00, // CueTime
                0xB7, 0x87, // CueTrackPositions
                0xF7, 0x81, 0x01, // CueTrack
                0xF1, 0x82, 0x01, 0x2C, // CueClusterPosition
            ]
        );
    }

    #[test]
    fn seek_head_fills_region() {
        let mut sink = MemorySink::new();
        let region = reserve_void(&mut sink, SEEK_HEAD_RESERVE).unwrap();
        let entries = [
            SeekEntry::new(INFO, 96),
            SeekEntry::new(TRACKS, 200),
            SeekEntry::new(CUES, 1 << 40),
        ];
        write_seek_head(&mut sink, region, &entries).unwrap();

        let bytes = sink.bytes();
        assert_eq!(bytes.len(), SEEK_HEAD_RESERVE);
        assert_eq!(&bytes[..4], &[0x11, 0x4D, 0x9B, 0x74]);
        assert!(bytes.windows(4).any(|w| w == [0x53, 0xAB, 0x84, 0x15]));
    }
}
