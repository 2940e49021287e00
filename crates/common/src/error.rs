//! Central error types shared by the muxer and the reader (thiserror-based).

use thiserror::Error;

use crate::types::TrackKind;

/// Invalid muxer configuration. Returned at construction; no muxer is built.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("At least one of video or audio must be configured")]
    NoTracks,

    #[error("Invalid {track} codec ID {codec_id:?}: {reason}")]
    InvalidCodec {
        track: TrackKind,
        codec_id: String,
        reason: String,
    },

    #[error("Invalid {track} track setting: {reason}")]
    InvalidTrack { track: TrackKind, reason: String },

    #[error("Invalid muxer setting: {0}")]
    InvalidSetting(String),

    #[error("{track} codec private data is {size} bytes, reserve is {capacity} bytes")]
    CodecPrivateTooLarge {
        track: TrackKind,
        size: usize,
        capacity: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors while parsing a WebM/Matroska byte stream.
#[derive(Error, Debug)]
pub enum DemuxError {
    #[error("Not an EBML/WebM stream")]
    NotWebm,

    #[error("Unsupported document type: {0}")]
    UnsupportedDocType(String),

    #[error("Invalid element at offset {offset}: {reason}")]
    InvalidStructure { offset: u64, reason: String },

    #[error("Element 0x{id:X} at offset {offset} has unknown size")]
    UnknownSize { id: u32, offset: u64 },

    #[error("Truncated data: expected {expected} bytes, got {got}")]
    TruncatedData { expected: usize, got: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type for configuration handling.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Convenience Result type for reader operations.
pub type DemuxResult<T> = Result<T, DemuxError>;
