//! `webm-mux`: incremental WebM muxer.
//!
//! Combines independently produced, already-encoded video and audio chunks
//! into a seekable WebM file (the Matroska subset for VP8/VP9/AV1 + Opus/Vorbis).
//!
//! # Architecture
//!
//! - **Progressive write**: clusters are written as soon as cross-track order is certain
//! - **Bounded reordering**: one FIFO per track, released by smallest timestamp
//! - **Patch at end**: Segment size, Duration and SeekHead are reserved up front and
//!   patched during `finalize()`; each Cluster size is patched when it closes
//! - **Pluggable sinks**: in-memory buffer or any `Write + Seek` destination
//!
//! # Usage
//!
//! ```ignore
//! use webm_mux::WebmMuxer;
//! use webm_common::{AudioTrackOptions, FrameType, MuxerOptions, VideoTrackOptions};
//!
//! let options = MuxerOptions::video_only(VideoTrackOptions::new("V_VP8", 640, 480))
//!     .with_audio(AudioTrackOptions::new("A_OPUS", 2, 48_000.0));
//! let mut muxer = WebmMuxer::in_memory(options)?;
//!
//! muxer.add_video_chunk_raw(&frame, FrameType::Key, 0, None)?;
//! muxer.add_audio_chunk_raw(&packet, FrameType::Key, 0, None)?;
//!
//! let bytes: Vec<u8> = muxer.finalize()?;
//! ```

pub mod cues;
pub mod ebml;
pub mod error;
pub mod layout;
pub mod muxer;
pub mod scheduler;
pub mod sink;

// Re-export primary API types
pub use cues::CuePoint;
pub use error::{MuxError, MuxResult};
pub use muxer::WebmMuxer;
pub use sink::{ByteSink, MemorySink, StreamSink};
pub use webm_common::{
    AudioTrackOptions, ChunkMeta, EncodedChunk, FirstTimestampBehavior, FrameType, MuxerOptions,
    TimecodeScale, TrackKind, VideoTrackOptions,
};
