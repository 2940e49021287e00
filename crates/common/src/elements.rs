//! Matroska/WebM element IDs used by the muxer and the reader.
//!
//! IDs are stored with their EBML length-marker bits, so the big-endian
//! bytes of each constant are exactly what appears in the file.

// ─── EBML Header ─────────────────────────────────────────────────────

pub const EBML_HEADER: u32 = 0x1A45DFA3;
pub const EBML_VERSION: u32 = 0x4286;
pub const EBML_READ_VERSION: u32 = 0x42F7;
pub const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
pub const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
/// Document type string ("webm").
pub const DOC_TYPE: u32 = 0x4282;
pub const DOC_TYPE_VERSION: u32 = 0x4287;
pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;

/// Void: padding whose content readers must skip.
pub const VOID: u32 = 0xEC;

// ─── Segment ─────────────────────────────────────────────────────────

pub const SEGMENT: u32 = 0x18538067;

pub const SEEK_HEAD: u32 = 0x114D9B74;
pub const SEEK: u32 = 0x4DBB;
/// SeekID: binary, the raw ID bytes of the referenced element.
pub const SEEK_ID: u32 = 0x53AB;
/// SeekPosition: offset of the referenced element from the Segment data start.
pub const SEEK_POSITION: u32 = 0x53AC;

// ─── Segment Information ─────────────────────────────────────────────

pub const INFO: u32 = 0x1549A966;
/// TimecodeScale: nanoseconds per timecode tick.
pub const TIMECODE_SCALE: u32 = 0x2AD7B1;
/// Duration in TimecodeScale units (float).
pub const DURATION: u32 = 0x4489;
pub const MUXING_APP: u32 = 0x4D80;
pub const WRITING_APP: u32 = 0x5741;

// ─── Tracks ──────────────────────────────────────────────────────────

pub const TRACKS: u32 = 0x1654AE6B;
pub const TRACK_ENTRY: u32 = 0xAE;
pub const TRACK_NUMBER: u32 = 0xD7;
pub const TRACK_UID: u32 = 0x73C5;
/// 1 = video, 2 = audio.
pub const TRACK_TYPE: u32 = 0x83;
pub const CODEC_ID: u32 = 0x86;
pub const CODEC_PRIVATE: u32 = 0x63A2;
/// Nanoseconds per frame.
pub const DEFAULT_DURATION: u32 = 0x23E383;

pub const VIDEO: u32 = 0xE0;
pub const PIXEL_WIDTH: u32 = 0xB0;
pub const PIXEL_HEIGHT: u32 = 0xBA;

pub const AUDIO: u32 = 0xE1;
/// Sampling frequency in Hz (float).
pub const SAMPLING_FREQUENCY: u32 = 0xB5;
pub const CHANNELS: u32 = 0x9F;
pub const BIT_DEPTH: u32 = 0x6264;

// ─── Cluster ─────────────────────────────────────────────────────────

pub const CLUSTER: u32 = 0x1F43B675;
/// Cluster timecode in TimecodeScale units.
pub const TIMECODE: u32 = 0xE7;
/// `[track: vint] [timecode: i16] [flags: u8] [frame data]`.
pub const SIMPLE_BLOCK: u32 = 0xA3;

/// SimpleBlock flag: the frame is a keyframe.
pub const SIMPLE_BLOCK_KEYFRAME: u8 = 0x80;

// ─── Cues ────────────────────────────────────────────────────────────

pub const CUES: u32 = 0x1C53BB6B;
pub const CUE_POINT: u32 = 0xBB;
pub const CUE_TIME: u32 = 0xB3;
pub const CUE_TRACK_POSITIONS: u32 = 0xB7;
pub const CUE_TRACK: u32 = 0xF7;
/// Cluster offset from the Segment data start.
pub const CUE_CLUSTER_POSITION: u32 = 0xF1;

/// WebM codec IDs. Other Matroska codec IDs are accepted but logged.
pub mod codec_ids {
    pub const VP8: &str = "V_VP8";
    pub const VP9: &str = "V_VP9";
    pub const AV1: &str = "V_AV1";
    pub const OPUS: &str = "A_OPUS";
    pub const VORBIS: &str = "A_VORBIS";

    pub const WEBM: [&str; 5] = [VP8, VP9, AV1, OPUS, VORBIS];

    /// Whether the ID belongs to the WebM codec subset.
    pub fn is_webm(codec_id: &str) -> bool {
        WEBM.contains(&codec_id)
    }
}

/// Human-readable element name, for logs and reader diagnostics.
pub fn element_name(id: u32) -> &'static str {
    match id {
        EBML_HEADER => "EBML",
        SEGMENT => "Segment",
        SEEK_HEAD => "SeekHead",
        INFO => "Info",
        TRACKS => "Tracks",
        TRACK_ENTRY => "TrackEntry",
        CLUSTER => "Cluster",
        SIMPLE_BLOCK => "SimpleBlock",
        CUES => "Cues",
        CUE_POINT => "CuePoint",
        VOID => "Void",
        CODEC_PRIVATE => "CodecPrivate",
        _ => "Unknown",
    }
}
