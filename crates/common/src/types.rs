//! Core types with newtype pattern for type safety.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which of the (at most two) tracks a chunk belongs to.
///
/// The derived ordering doubles as the interleaving tie-break priority:
/// video sorts before audio.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    pub const ALL: [TrackKind; 2] = [TrackKind::Video, TrackKind::Audio];

    /// Matroska `TrackType` value (1 = video, 2 = audio).
    pub fn matroska_type(self) -> u64 {
        match self {
            Self::Video => 1,
            Self::Audio => 2,
        }
    }

    /// Expected prefix of a Matroska codec ID for this kind of track.
    pub fn codec_prefix(self) -> &'static str {
        match self {
            Self::Video => "V_",
            Self::Audio => "A_",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// Whether an encoded chunk can be decoded on its own.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    Key,
    Delta,
}

impl FrameType {
    pub fn is_key(self) -> bool {
        matches!(self, Self::Key)
    }
}

/// One encoded access unit as handed over by an encoder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedChunk {
    /// Compressed payload.
    pub data: Vec<u8>,
    /// Presentation timestamp in microseconds.
    pub timestamp_us: u64,
    pub frame_type: FrameType,
}

impl EncodedChunk {
    pub fn new(data: impl Into<Vec<u8>>, frame_type: FrameType, timestamp_us: u64) -> Self {
        Self {
            data: data.into(),
            timestamp_us,
            frame_type,
        }
    }
}

/// Encoder-supplied side information that travels with a chunk.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkMeta {
    /// Decoder configuration (Matroska `CodecPrivate`). Only the first
    /// value supplied for a track is stored.
    pub codec_private: Option<Vec<u8>>,
}

impl ChunkMeta {
    pub fn with_codec_private(data: impl Into<Vec<u8>>) -> Self {
        Self {
            codec_private: Some(data.into()),
        }
    }
}

/// Matroska timecode scale: nanoseconds per stored timecode tick.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimecodeScale(pub u64);

impl TimecodeScale {
    /// 1 tick = 1 ms, the Matroska default.
    pub const MILLISECOND: Self = Self(1_000_000);

    pub fn nanos_per_tick(self) -> u64 {
        self.0
    }

    /// Convert microseconds to ticks, rounding down.
    pub fn ticks_from_micros(self, micros: u64) -> u64 {
        ((micros as u128 * 1_000) / self.0.max(1) as u128) as u64
    }

    /// Convert ticks back to microseconds, rounding down.
    pub fn micros_from_ticks(self, ticks: u64) -> u64 {
        ((ticks as u128 * self.0 as u128) / 1_000) as u64
    }
}

impl Default for TimecodeScale {
    fn default() -> Self {
        Self::MILLISECOND
    }
}

impl fmt::Display for TimecodeScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns/tick", self.0)
    }
}
