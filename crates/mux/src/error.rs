//! Muxer error types.

use thiserror::Error;
use webm_common::{ConfigError, TrackKind};

/// Errors that can occur during WebM muxing.
#[derive(Error, Debug)]
pub enum MuxError {
    /// I/O error from the byte sink. The muxer is unusable afterwards.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid muxer configuration.
    #[error("Invalid muxer config: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// Chunk for a track that is not configured or was already ended.
    #[error("Track error: {0}")]
    TrackError(String),

    /// First-timestamp policy violation.
    #[error("Invalid {track} timestamp: {reason}")]
    InvalidTimestamp { track: TrackKind, reason: String },

    /// A chunk is older than the last accepted chunk of the same track.
    #[error("{track} timestamp went backwards: {got}us after {previous}us")]
    TimestampRegression {
        track: TrackKind,
        previous: u64,
        got: u64,
    },

    /// A track queue reached its configured bound.
    #[error("Buffer full: {0}")]
    BufferFull(String),

    /// Codec private data does not fit the space reserved in the TrackEntry.
    #[error("{track} codec private data is {size} bytes, reserve allows {capacity}")]
    CodecPrivateTooLarge {
        track: TrackKind,
        size: usize,
        capacity: usize,
    },

    /// Any operation after `finalize()` succeeded.
    #[error("Muxer already finalized")]
    Finalized,

    /// Any operation after a sink write failed.
    #[error("Muxer failed earlier and can no longer write")]
    Failed,

    /// A seek-write outside the bytes written so far.
    #[error("Invalid patch of {len} bytes at offset {offset} (written: {position})")]
    InvalidPatch { offset: u64, len: usize, position: u64 },

    /// A value does not fit the fixed width reserved for it.
    #[error("Size overflow: {0}")]
    SizeOverflow(String),
}

impl MuxError {
    /// Whether this error came from the sink and leaves the output unreliable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::IoError(_) | Self::InvalidPatch { .. } | Self::SizeOverflow(_)
        )
    }
}

/// Convenience Result type for mux operations.
pub type MuxResult<T> = Result<T, MuxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mux_error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let mux_err = MuxError::from(io_err);
        assert!(mux_err.to_string().contains("IO error"));
        assert!(mux_err.to_string().contains("file not found"));
        assert!(mux_err.is_fatal());
    }

    #[test]
    fn mux_error_display_invalid_config() {
        let err = MuxError::from(ConfigError::NoTracks);
        assert_eq!(
            err.to_string(),
            "Invalid muxer config: At least one of video or audio must be configured"
        );
        assert!(!err.is_fatal());
    }

    #[test]
    fn mux_error_display_regression() {
        let err = MuxError::TimestampRegression {
            track: TrackKind::Video,
            previous: 66_000,
            got: 33_000,
        };
        assert_eq!(
            err.to_string(),
            "video timestamp went backwards: 33000us after 66000us"
        );
    }

    #[test]
    fn mux_error_display_usage() {
        assert_eq!(MuxError::Finalized.to_string(), "Muxer already finalized");
        let err = MuxError::TrackError("no audio track configured".into());
        assert_eq!(err.to_string(), "Track error: no audio track configured");
    }

    #[test]
    fn mux_error_display_patch() {
        let err = MuxError::InvalidPatch {
            offset: 100,
            len: 8,
            position: 104,
        };
        assert!(err.to_string().contains("offset 100"));
        assert!(err.is_fatal());
    }
}
