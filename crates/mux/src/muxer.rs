//! High-level WebM muxer API.
//!
//! Usage:
//! ```ignore
//! let options = MuxerOptions::video_only(VideoTrackOptions::new("V_VP9", 1280, 720))
//!     .with_audio(AudioTrackOptions::new("A_OPUS", 2, 48_000.0));
//! let mut muxer = WebmMuxer::create("out.webm", options)?;
//!
//! // Chunks may arrive in any cross-track order
//! muxer.add_video_chunk(&frame, Some(&ChunkMeta::with_codec_private(vpcc)))?;
//! muxer.add_audio_chunk(&packet, None)?;
//!
//! // Drains the queues, writes Cues, patches sizes and Duration
//! muxer.finalize()?;
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use tracing::{debug, error, info, trace, warn};
use webm_common::elements::CUES;
use webm_common::{
    ChunkMeta, EncodedChunk, FirstTimestampBehavior, FrameType, MuxerOptions, TrackKind,
};

use crate::cues::{CuePoint, CueTracker, SeekHeadTracker};
use crate::ebml::{end_element, patch_float, ElementHandle, ReservedFloat, VoidRegion};
use crate::error::{MuxError, MuxResult};
use crate::layout::{self, ClusterWriter, CodecPrivateSlot};
use crate::scheduler::{QueuedChunk, Scheduler};
use crate::sink::{ByteSink, MemorySink, StreamSink};

/// Lifecycle of a muxer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum MuxerState {
    Open,
    /// A sink write failed; the output must be treated as invalid.
    Failed,
    Finalized,
}

/// Reserved fields patched exactly once, at finalize.
#[derive(Debug)]
struct PendingPatches {
    segment: ElementHandle,
    duration: ReservedFloat,
    seek_head: VoidRegion,
}

/// Internal per-track state during muxing.
#[derive(Debug)]
struct TrackState {
    /// Track number (1-based).
    number: u64,
    codec_private: CodecPrivateSlot,
    /// First codec private data accepted, kept to detect conflicting repeats.
    stored_codec_private: Option<Vec<u8>>,
    /// First timestamp as given by the caller.
    first_raw_us: Option<u64>,
    /// Last accepted timestamp as given by the caller.
    last_raw_us: Option<u64>,
}

/// Incremental WebM muxer writing to a [`ByteSink`].
///
/// Chunks are interleaved across tracks in timestamp order and written as
/// soon as that order is certain. The file is only valid once
/// [`finalize`](Self::finalize) succeeds: dropping the muxer earlier leaves a
/// truncated stream with unpatched size fields on the destination.
pub struct WebmMuxer<S: ByteSink> {
    /// Taken by `finalize()`.
    sink: Option<S>,
    options: MuxerOptions,
    tracks: BTreeMap<TrackKind, TrackState>,
    scheduler: Scheduler,
    clusters: ClusterWriter,
    cues: CueTracker,
    seek: SeekHeadTracker,
    pending: Option<PendingPatches>,
    segment_data_start: u64,
    /// Largest timestamp written so far, in microseconds.
    max_timestamp_us: u64,
    /// Total output size once finalized.
    final_size: Option<u64>,
    state: MuxerState,
}

impl WebmMuxer<MemorySink> {
    /// Mux into memory; `finalize()` returns the file bytes.
    pub fn in_memory(options: MuxerOptions) -> MuxResult<Self> {
        Self::with_sink(options, MemorySink::new())
    }
}

impl<W: Write + Seek> WebmMuxer<StreamSink<W>> {
    /// Mux into a seekable writer; `finalize()` returns the flushed writer.
    pub fn with_writer(options: MuxerOptions, writer: W) -> MuxResult<Self> {
        Self::with_sink(options, StreamSink::new(writer)?)
    }
}

impl WebmMuxer<StreamSink<BufWriter<File>>> {
    /// Create (or truncate) a file and mux into it.
    pub fn create(path: impl AsRef<Path>, options: MuxerOptions) -> MuxResult<Self> {
        let path = path.as_ref();
        // Validate first so a bad configuration leaves no empty file behind.
        options.validate()?;
        let file = File::create(path).map_err(|e| {
            MuxError::IoError(std::io::Error::new(
                e.kind(),
                format!("Failed to create output file {:?}: {}", path, e),
            ))
        })?;
        info!(path = %path.display(), "Created WebM output file");
        Self::with_writer(options, BufWriter::new(file))
    }
}

impl<S: ByteSink> WebmMuxer<S> {
    /// Validate the options and write the file header, Info and Tracks.
    pub fn with_sink(options: MuxerOptions, mut sink: S) -> MuxResult<Self> {
        options.validate()?;

        let skeleton = layout::write_skeleton(&mut sink, &options)?;
        let segment_data_start = skeleton.segment_data_start();

        let tracks = skeleton
            .tracks
            .into_iter()
            .map(|t| {
                let stored = match t.kind {
                    TrackKind::Video => options.video.as_ref().and_then(|v| v.codec_private.clone()),
                    TrackKind::Audio => options.audio.as_ref().and_then(|a| a.codec_private.clone()),
                };
                (
                    t.kind,
                    TrackState {
                        number: t.number,
                        codec_private: t.codec_private,
                        stored_codec_private: stored.filter(|d| !d.is_empty()),
                        first_raw_us: None,
                        last_raw_us: None,
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();

        let kinds: Vec<TrackKind> = tracks.keys().copied().collect();
        info!(
            tracks = ?kinds,
            timecode_scale = %options.timecode_scale,
            header_bytes = sink.position(),
            "Created WebM muxer"
        );

        Ok(Self {
            sink: Some(sink),
            scheduler: Scheduler::new(&kinds, options.max_queued_chunks),
            tracks,
            clusters: ClusterWriter::new(),
            cues: CueTracker::new(),
            seek: SeekHeadTracker::new(skeleton.seek_entries),
            pending: Some(PendingPatches {
                segment: skeleton.segment,
                duration: skeleton.duration,
                seek_head: skeleton.seek_head,
            }),
            segment_data_start,
            max_timestamp_us: 0,
            final_size: None,
            state: MuxerState::Open,
            options,
        })
    }

    /// Add an encoded chunk. `timestamp_us` overrides the chunk's own timestamp.
    pub fn add_chunk(
        &mut self,
        track: TrackKind,
        chunk: &EncodedChunk,
        meta: Option<&ChunkMeta>,
        timestamp_us: Option<u64>,
    ) -> MuxResult<()> {
        self.add_chunk_raw(
            track,
            &chunk.data,
            chunk.frame_type,
            timestamp_us.unwrap_or(chunk.timestamp_us),
            meta,
        )
    }

    /// Add raw encoded bytes with an explicit frame type and timestamp.
    ///
    /// A rejected chunk leaves the muxer unchanged. The chunk is written
    /// immediately when cross-track order allows, otherwise queued.
    pub fn add_chunk_raw(
        &mut self,
        track: TrackKind,
        data: &[u8],
        frame_type: FrameType,
        timestamp_us: u64,
        meta: Option<&ChunkMeta>,
    ) -> MuxResult<()> {
        self.ensure_open()?;
        self.scheduler.can_accept(track)?;
        let resolved_us = self.resolve_timestamp(track, timestamp_us)?;
        let codec_private = meta.and_then(|m| m.codec_private.as_deref());
        self.check_codec_private(track, codec_private)?;

        // Checks passed: from here on the chunk is accepted.
        if let Some(state) = self.tracks.get_mut(&track) {
            state.first_raw_us.get_or_insert(timestamp_us);
            state.last_raw_us = Some(timestamp_us);
        }
        if let Some(data) = codec_private {
            let result = self.store_codec_private(track, data);
            self.poison_on_fatal(result)?;
        }

        self.scheduler.push(QueuedChunk {
            track,
            data: data.to_vec(),
            timestamp_us: resolved_us,
            frame_type,
        })?;

        let result = self.drain();
        self.poison_on_fatal(result)
    }

    pub fn add_video_chunk(&mut self, chunk: &EncodedChunk, meta: Option<&ChunkMeta>) -> MuxResult<()> {
        self.add_chunk(TrackKind::Video, chunk, meta, None)
    }

    pub fn add_audio_chunk(&mut self, chunk: &EncodedChunk, meta: Option<&ChunkMeta>) -> MuxResult<()> {
        self.add_chunk(TrackKind::Audio, chunk, meta, None)
    }

    pub fn add_video_chunk_raw(
        &mut self,
        data: &[u8],
        frame_type: FrameType,
        timestamp_us: u64,
        meta: Option<&ChunkMeta>,
    ) -> MuxResult<()> {
        self.add_chunk_raw(TrackKind::Video, data, frame_type, timestamp_us, meta)
    }

    pub fn add_audio_chunk_raw(
        &mut self,
        data: &[u8],
        frame_type: FrameType,
        timestamp_us: u64,
        meta: Option<&ChunkMeta>,
    ) -> MuxResult<()> {
        self.add_chunk_raw(TrackKind::Audio, data, frame_type, timestamp_us, meta)
    }

    /// Signal that a track will receive no more chunks, so the other track
    /// no longer waits for it.
    pub fn end_track(&mut self, track: TrackKind) -> MuxResult<()> {
        self.ensure_open()?;
        self.scheduler.end(track)?;
        debug!(track = %track, "Track ended");
        let result = self.drain();
        self.poison_on_fatal(result)
    }

    /// Write everything still queued, then Cues, and patch every reserved
    /// field. Returns what the sink yields on close.
    ///
    /// A second call fails with [`MuxError::Finalized`].
    pub fn finalize(&mut self) -> MuxResult<S::Output> {
        self.ensure_open()?;
        match self.finish() {
            Ok(output) => {
                self.state = MuxerState::Finalized;
                Ok(output)
            }
            Err(e) => {
                error!(error = %e, "Finalize failed, output is invalid");
                self.state = MuxerState::Failed;
                Err(e)
            }
        }
    }

    // ─── Introspection ───────────────────────────────────────────────

    /// Track number assigned to `track`, if configured.
    pub fn track_number(&self, track: TrackKind) -> Option<u64> {
        self.tracks.get(&track).map(|t| t.number)
    }

    /// Chunks of `track` waiting for the other track.
    pub fn queued_chunks(&self, track: TrackKind) -> usize {
        self.scheduler.queued(track)
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.count()
    }

    pub fn cue_points(&self) -> &[CuePoint] {
        self.cues.points()
    }

    /// Bytes committed to the sink (the file size once finalized).
    pub fn bytes_written(&self) -> u64 {
        match (&self.sink, self.final_size) {
            (Some(sink), _) => sink.position(),
            (None, Some(size)) => size,
            (None, None) => 0,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.state == MuxerState::Finalized
    }

    pub fn options(&self) -> &MuxerOptions {
        &self.options
    }

    // ─── Internals ───────────────────────────────────────────────────

    fn ensure_open(&self) -> MuxResult<()> {
        match self.state {
            MuxerState::Open => Ok(()),
            MuxerState::Finalized => Err(MuxError::Finalized),
            MuxerState::Failed => Err(MuxError::Failed),
        }
    }

    fn poison_on_fatal<T>(&mut self, result: MuxResult<T>) -> MuxResult<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                error!(error = %e, "Sink write failed, muxer is unusable");
                self.state = MuxerState::Failed;
            }
        }
        result
    }

    /// Apply the first-timestamp policy and the monotonicity check.
    fn resolve_timestamp(&self, track: TrackKind, timestamp_us: u64) -> MuxResult<u64> {
        let state = self
            .tracks
            .get(&track)
            .ok_or_else(|| MuxError::TrackError(format!("no {track} track configured")))?;

        if let Some(previous) = state.last_raw_us {
            if timestamp_us < previous {
                return Err(MuxError::TimestampRegression {
                    track,
                    previous,
                    got: timestamp_us,
                });
            }
        }

        match self.options.first_timestamp {
            FirstTimestampBehavior::Strict => {
                if state.first_raw_us.is_none() && timestamp_us != 0 {
                    return Err(MuxError::InvalidTimestamp {
                        track,
                        reason: format!("first chunk must start at 0, got {timestamp_us}us"),
                    });
                }
                Ok(timestamp_us)
            }
            FirstTimestampBehavior::Offset => {
                let first = state.first_raw_us.unwrap_or(timestamp_us);
                Ok(timestamp_us - first)
            }
            FirstTimestampBehavior::Permissive => Ok(timestamp_us),
        }
    }

    /// Reject codec private data that does not fit the pending slot.
    fn check_codec_private(&self, track: TrackKind, data: Option<&[u8]>) -> MuxResult<()> {
        let Some(data) = data.filter(|d| !d.is_empty()) else {
            return Ok(());
        };
        let Some(state) = self.tracks.get(&track) else {
            return Ok(());
        };
        if !matches!(state.codec_private, CodecPrivateSlot::Pending(_)) {
            return Ok(());
        }
        let capacity = self.options.codec_private_capacity();
        if data.len() > capacity {
            return Err(MuxError::CodecPrivateTooLarge {
                track,
                size: data.len(),
                capacity,
            });
        }
        Ok(())
    }

    /// Write codec private data on first supply; later supplies are ignored.
    fn store_codec_private(&mut self, track: TrackKind, data: &[u8]) -> MuxResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let Some(state) = self.tracks.get_mut(&track) else {
            return Ok(());
        };

        match std::mem::replace(&mut state.codec_private, CodecPrivateSlot::Written) {
            CodecPrivateSlot::Pending(region) => {
                state.stored_codec_private = Some(data.to_vec());
                let sink = self.sink.as_mut().ok_or(MuxError::Finalized)?;
                layout::fill_codec_private(sink, region, data)?;
                debug!(track = %track, len = data.len(), "Stored codec private data");
            }
            CodecPrivateSlot::Written => {
                if state.stored_codec_private.as_deref() != Some(data) {
                    warn!(
                        track = %track,
                        len = data.len(),
                        "Ignoring codec private data that differs from the stored one"
                    );
                }
            }
            CodecPrivateSlot::Unreserved => {
                state.codec_private = CodecPrivateSlot::Unreserved;
                warn!(
                    track = %track,
                    len = data.len(),
                    "No CodecPrivate space reserved, dropping codec private data"
                );
            }
        }
        Ok(())
    }

    /// Write every chunk the scheduler can release.
    fn drain(&mut self) -> MuxResult<()> {
        while let Some(chunk) = self.scheduler.pop_next() {
            self.write_chunk(chunk)?;
        }
        Ok(())
    }

    fn write_chunk(&mut self, chunk: QueuedChunk) -> MuxResult<()> {
        let scale = self.options.timecode_scale;
        let ticks = scale.ticks_from_micros(chunk.timestamp_us);
        let number = self
            .tracks
            .get(&chunk.track)
            .map(|t| t.number)
            .ok_or_else(|| MuxError::TrackError(format!("no {} track configured", chunk.track)))?;

        let new_cluster = match self.clusters.current() {
            None => true,
            Some(cluster) => {
                let relative = ticks as i64 - cluster.base_ticks() as i64;
                (chunk.is_video_key() && self.options.keyframe_clusters)
                    || chunk.timestamp_us.saturating_sub(cluster.base_us())
                        > self.options.max_cluster_duration_us
                    || i16::try_from(relative).is_err()
            }
        };

        let segment_data_start = self.segment_data_start;
        let audio_only = self.options.is_audio_only();
        let sink = self.sink.as_mut().ok_or(MuxError::Finalized)?;

        if new_cluster {
            let cluster = self
                .clusters
                .open(sink, segment_data_start, chunk.timestamp_us, scale)?;
            if chunk.is_video_key() || audio_only {
                let cue = CuePoint {
                    track_number: number,
                    time_ticks: cluster.base_ticks(),
                    cluster_position: cluster.position(),
                };
                debug!(
                    track = number,
                    time = cue.time_ticks,
                    position = cue.cluster_position,
                    "Recorded cue point"
                );
                self.cues.record(cue);
            }
        }

        let base_ticks = self
            .clusters
            .current()
            .map(|c| c.base_ticks())
            .ok_or_else(|| MuxError::SizeOverflow("no open cluster".into()))?;
        let relative = i16::try_from(ticks as i64 - base_ticks as i64).map_err(|_| {
            MuxError::SizeOverflow(format!("relative timecode {ticks} - {base_ticks} exceeds i16"))
        })?;

        layout::write_simple_block(sink, number, relative, chunk.is_video_key(), &chunk.data)?;
        trace!(
            track = number,
            timestamp_us = chunk.timestamp_us,
            relative,
            key = chunk.frame_type.is_key(),
            size = chunk.data.len(),
            "Wrote SimpleBlock"
        );

        self.max_timestamp_us = self.max_timestamp_us.max(chunk.timestamp_us);
        Ok(())
    }

    fn finish(&mut self) -> MuxResult<S::Output> {
        self.scheduler.end_all();
        self.drain()?;
        debug_assert!(self.scheduler.is_drained());

        let pending = self.pending.take().ok_or(MuxError::Finalized)?;
        let segment_data_start = self.segment_data_start;
        let scale = self.options.timecode_scale;
        let duration_ticks = self.max_timestamp_us as f64 * 1_000.0 / scale.nanos_per_tick() as f64;

        let sink = self.sink.as_mut().ok_or(MuxError::Finalized)?;
        self.clusters.close(sink)?;

        if let Some(position) = layout::write_cues(sink, segment_data_start, self.cues.points())? {
            self.seek.record(CUES, position);
        }
        patch_float(sink, pending.duration, duration_ticks)?;
        layout::write_seek_head(sink, pending.seek_head, self.seek.entries())?;
        let segment_size = end_element(sink, pending.segment)?;

        let total = sink.position();
        let sink = self.sink.take().ok_or(MuxError::Finalized)?;
        let output = sink.close()?;
        self.final_size = Some(total);

        info!(
            clusters = self.clusters.count(),
            cues = self.cues.len(),
            duration_ticks,
            segment_size,
            bytes = total,
            "Finalized WebM file"
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor, SeekFrom};
    use webm_common::elements::codec_ids;
    use webm_common::{AudioTrackOptions, TimecodeScale, VideoTrackOptions};

    fn video_options() -> MuxerOptions {
        MuxerOptions::video_only(VideoTrackOptions::new(codec_ids::VP8, 640, 480))
    }

    fn av_options() -> MuxerOptions {
        video_options().with_audio(AudioTrackOptions::new(codec_ids::OPUS, 2, 48_000.0))
    }

    #[test]
    fn invalid_options_produce_no_muxer() {
        assert!(matches!(
            WebmMuxer::in_memory(MuxerOptions::default()),
            Err(MuxError::InvalidConfig(_))
        ));
    }

    #[test]
    fn track_numbers() {
        let muxer = WebmMuxer::in_memory(av_options()).unwrap();
        assert_eq!(muxer.track_number(TrackKind::Video), Some(1));
        assert_eq!(muxer.track_number(TrackKind::Audio), Some(2));
        assert!(muxer.bytes_written() > 0);
    }

    #[test]
    fn unconfigured_track_rejected() {
        let mut muxer = WebmMuxer::in_memory(video_options()).unwrap();
        let err = muxer
            .add_audio_chunk_raw(&[1], FrameType::Key, 0, None)
            .unwrap_err();
        assert!(matches!(err, MuxError::TrackError(_)));
        assert!(!muxer.is_finalized());
    }

    #[test]
    fn strict_first_timestamp() {
        let mut options = video_options();
        options.first_timestamp = FirstTimestampBehavior::Strict;
        let mut muxer = WebmMuxer::in_memory(options).unwrap();
        let err = muxer
            .add_video_chunk_raw(&[1], FrameType::Key, 5_000, None)
            .unwrap_err();
        assert!(matches!(err, MuxError::InvalidTimestamp { .. }));
        assert_eq!(muxer.cluster_count(), 0);

        muxer.add_video_chunk_raw(&[1], FrameType::Key, 0, None).unwrap();
        assert_eq!(muxer.cluster_count(), 1);
    }

    #[test]
    fn default_accepts_any_first_timestamp() {
        let mut muxer = WebmMuxer::in_memory(av_options()).unwrap();
        muxer.add_video_chunk_raw(&[1], FrameType::Key, 33_000, None).unwrap();
        muxer.add_audio_chunk_raw(&[2], FrameType::Key, 20_000, None).unwrap();
        assert_eq!(muxer.cluster_count(), 1);
        assert_eq!(muxer.queued_chunks(TrackKind::Video), 1);
    }

    #[test]
    fn unreserved_codec_private_keeps_chunk() {
        let mut options = video_options();
        options.codec_private_reserve = 0;
        let mut muxer = WebmMuxer::in_memory(options).unwrap();

        let meta = ChunkMeta::with_codec_private(vec![0u8; 64]);
        muxer.add_video_chunk_raw(&[1], FrameType::Key, 0, Some(&meta)).unwrap();
        assert_eq!(muxer.cluster_count(), 1);
    }

    #[test]
    fn regression_rejected_without_state_change() {
        let mut muxer = WebmMuxer::in_memory(video_options()).unwrap();
        muxer.add_video_chunk_raw(&[1], FrameType::Key, 0, None).unwrap();
        muxer.add_video_chunk_raw(&[2], FrameType::Delta, 66_000, None).unwrap();
        let before = muxer.bytes_written();

        let err = muxer
            .add_video_chunk_raw(&[3], FrameType::Delta, 33_000, None)
            .unwrap_err();
        assert!(matches!(
            err,
            MuxError::TimestampRegression {
                previous: 66_000,
                got: 33_000,
                ..
            }
        ));
        assert_eq!(muxer.bytes_written(), before);

        // Equal timestamps are fine
        muxer.add_video_chunk_raw(&[4], FrameType::Delta, 66_000, None).unwrap();
    }

    #[test]
    fn buffer_full_when_other_track_is_silent() {
        let mut options = av_options();
        options.max_queued_chunks = 2;
        let mut muxer = WebmMuxer::in_memory(options).unwrap();

        muxer.add_audio_chunk_raw(&[0], FrameType::Key, 0, None).unwrap();
        muxer.add_audio_chunk_raw(&[0], FrameType::Key, 20_000, None).unwrap();
        assert_eq!(muxer.queued_chunks(TrackKind::Audio), 2);

        let err = muxer
            .add_audio_chunk_raw(&[0], FrameType::Key, 40_000, None)
            .unwrap_err();
        assert!(matches!(err, MuxError::BufferFull(_)));
        assert_eq!(muxer.queued_chunks(TrackKind::Audio), 2);

        // The rejected timestamp was not recorded, so it can be retried
        muxer.end_track(TrackKind::Video).unwrap();
        assert_eq!(muxer.queued_chunks(TrackKind::Audio), 0);
        muxer.add_audio_chunk_raw(&[0], FrameType::Key, 40_000, None).unwrap();
    }

    #[test]
    fn video_waits_for_audio() {
        let mut muxer = WebmMuxer::in_memory(av_options()).unwrap();
        muxer.add_video_chunk_raw(&[1], FrameType::Key, 0, None).unwrap();
        assert_eq!(muxer.queued_chunks(TrackKind::Video), 1);
        assert_eq!(muxer.cluster_count(), 0);

        muxer.add_audio_chunk_raw(&[2], FrameType::Key, 0, None).unwrap();
        // Video (0) is released; audio (0) must wait for the next video chunk
        assert_eq!(muxer.queued_chunks(TrackKind::Video), 0);
        assert_eq!(muxer.queued_chunks(TrackKind::Audio), 1);
        assert_eq!(muxer.cluster_count(), 1);
    }

    #[test]
    fn keyframes_open_clusters() {
        let mut muxer = WebmMuxer::in_memory(video_options()).unwrap();
        for (i, key) in [true, false, false, true, false].into_iter().enumerate() {
            let frame_type = if key { FrameType::Key } else { FrameType::Delta };
            muxer
                .add_video_chunk_raw(&[i as u8], frame_type, i as u64 * 33_000, None)
                .unwrap();
        }
        assert_eq!(muxer.cluster_count(), 2);
        let positions: Vec<u64> = muxer.cue_points().iter().map(|c| c.time_ticks).collect();
        assert_eq!(positions, vec![0, 99]);
    }

    #[test]
    fn keyframe_clusters_can_be_disabled() {
        let mut options = video_options();
        options.keyframe_clusters = false;
        let mut muxer = WebmMuxer::in_memory(options).unwrap();
        for i in 0..4u64 {
            muxer.add_video_chunk_raw(&[0], FrameType::Key, i * 33_000, None).unwrap();
        }
        assert_eq!(muxer.cluster_count(), 1);
        assert_eq!(muxer.cue_points().len(), 1);
    }

    #[test]
    fn relative_timecode_overflow_opens_cluster() {
        let mut options = video_options();
        options.timecode_scale = TimecodeScale(1_000); // 1 tick = 1 us
        options.keyframe_clusters = false;
        let mut muxer = WebmMuxer::in_memory(options).unwrap();

        muxer.add_video_chunk_raw(&[0], FrameType::Key, 0, None).unwrap();
        muxer.add_video_chunk_raw(&[0], FrameType::Delta, 32_767, None).unwrap();
        assert_eq!(muxer.cluster_count(), 1);
        muxer.add_video_chunk_raw(&[0], FrameType::Delta, 32_768, None).unwrap();
        assert_eq!(muxer.cluster_count(), 2);
        // Delta frame: no cue for the second cluster
        assert_eq!(muxer.cue_points().len(), 1);
    }

    #[test]
    fn codec_private_too_large_is_not_fatal() {
        let mut options = video_options();
        options.codec_private_reserve = 16;
        let mut muxer = WebmMuxer::in_memory(options).unwrap();

        let meta = ChunkMeta::with_codec_private(vec![0u8; 64]);
        let err = muxer
            .add_video_chunk_raw(&[1], FrameType::Key, 0, Some(&meta))
            .unwrap_err();
        assert!(matches!(
            err,
            MuxError::CodecPrivateTooLarge {
                size: 64,
                capacity: 10,
                ..
            }
        ));

        let meta = ChunkMeta::with_codec_private(vec![7u8; 10]);
        muxer.add_video_chunk_raw(&[1], FrameType::Key, 0, Some(&meta)).unwrap();
    }

    #[test]
    fn finalize_twice() {
        let mut muxer = WebmMuxer::in_memory(video_options()).unwrap();
        muxer.add_video_chunk_raw(&[1, 2, 3], FrameType::Key, 0, None).unwrap();
        let bytes = muxer.finalize().unwrap();
        assert!(muxer.is_finalized());
        assert_eq!(muxer.bytes_written(), bytes.len() as u64);

        assert!(matches!(muxer.finalize(), Err(MuxError::Finalized)));
        assert!(matches!(
            muxer.add_video_chunk_raw(&[1], FrameType::Key, 33_000, None),
            Err(MuxError::Finalized)
        ));
        assert!(matches!(
            muxer.end_track(TrackKind::Video),
            Err(MuxError::Finalized)
        ));
    }

    /// Accepts `limit` bytes, then fails every write.
    struct FailingWriter {
        inner: Cursor<Vec<u8>>,
        limit: u64,
    }

    impl Write for FailingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.inner.position() + buf.len() as u64 > self.limit {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for FailingWriter {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn sink_failure_poisons_muxer() {
        let writer = FailingWriter {
            inner: Cursor::new(Vec::new()),
            limit: 8_000,
        };
        let sink = StreamSink::with_window(writer, 64).unwrap();
        let mut muxer = WebmMuxer::with_sink(video_options(), sink).unwrap();

        let payload = vec![0u8; 1_000];
        let mut failure = None;
        for i in 0..20u64 {
            let frame_type = if i == 0 { FrameType::Key } else { FrameType::Delta };
            if let Err(e) = muxer.add_video_chunk_raw(&payload, frame_type, i * 33_000, None) {
                failure = Some(e);
                break;
            }
        }

        assert!(matches!(failure, Some(MuxError::IoError(_))));
        assert!(matches!(
            muxer.add_video_chunk_raw(&payload, FrameType::Delta, 1_000_000, None),
            Err(MuxError::Failed)
        ));
        assert!(matches!(muxer.finalize(), Err(MuxError::Failed)));
    }
}
