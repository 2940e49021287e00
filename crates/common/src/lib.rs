//! `webm-common`: shared types, element IDs, configuration and errors for
//! the WebM muxer workspace.
//!
//! - **Types**: `TrackKind`, `FrameType`, `EncodedChunk`, `ChunkMeta`, `TimecodeScale`
//! - **Elements**: Matroska/WebM element ID constants and the WebM codec set
//! - **Config**: `MuxerOptions`, `VideoTrackOptions`, `AudioTrackOptions`
//! - **Errors**: `ConfigError`, `DemuxError` (thiserror-based)

pub mod config;
pub mod elements;
pub mod error;
pub mod types;

// Re-export commonly used items at crate root
pub use config::{AudioTrackOptions, FirstTimestampBehavior, MuxerOptions, VideoTrackOptions};
pub use error::{ConfigError, ConfigResult, DemuxError, DemuxResult};
pub use types::{ChunkMeta, EncodedChunk, FrameType, TimecodeScale, TrackKind};
