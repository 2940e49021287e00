//! `webm-demux`: WebM reader for inspecting muxer output.
//!
//! Parses a complete file (EBML header, Segment, SeekHead, Info, Tracks,
//! Clusters with SimpleBlocks, Cues) and keeps every position and size it
//! reads. Unknown-size elements and children that overrun their parent are
//! errors, so an unfinalized or mis-patched file is rejected.

pub mod block;
pub mod ebml;
pub mod reader;

pub use block::SimpleBlock;
pub use reader::{
    AudioInfo, BlockInfo, ClusterInfo, CueInfo, EbmlHeader, ParsedWebm, SeekInfo, SegmentInfo,
    TopLevelElement, TrackInfo, VideoInfo, WebmReader,
};
pub use webm_common::{DemuxError, DemuxResult};
