//! Cross-track interleaving.
//!
//! Each configured track gets a bounded FIFO. A chunk is only released once
//! it is provably the oldest pending chunk: every track that has not ended
//! must have something queued, so no earlier chunk can still arrive. The
//! decision ([`Scheduler::next_safe`]) is pure and does no I/O.

use std::collections::{BTreeMap, VecDeque};

use webm_common::{FrameType, TrackKind};

use crate::error::{MuxError, MuxResult};

/// A chunk accepted by the muxer, waiting to be written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedChunk {
    pub track: TrackKind,
    pub data: Vec<u8>,
    /// Timestamp after the first-timestamp policy was applied.
    pub timestamp_us: u64,
    pub frame_type: FrameType,
}

impl QueuedChunk {
    /// Whether this chunk may start a cluster that a seeker can land on.
    pub fn is_video_key(&self) -> bool {
        self.track == TrackKind::Video && self.frame_type.is_key()
    }
}

#[derive(Debug, Default)]
struct TrackQueue {
    chunks: VecDeque<QueuedChunk>,
    ended: bool,
}

/// Per-track queues plus the release decision.
#[derive(Debug)]
pub struct Scheduler {
    // BTreeMap keeps tracks in priority order (video first).
    queues: BTreeMap<TrackKind, TrackQueue>,
    capacity: usize,
}

impl Scheduler {
    pub fn new(tracks: &[TrackKind], capacity: usize) -> Self {
        Self {
            queues: tracks
                .iter()
                .map(|&kind| (kind, TrackQueue::default()))
                .collect(),
            capacity: capacity.max(1),
        }
    }

    pub fn is_ended(&self, track: TrackKind) -> bool {
        self.queues.get(&track).is_some_and(|q| q.ended)
    }

    /// Check whether a push for `track` would succeed, without changing anything.
    pub fn can_accept(&self, track: TrackKind) -> MuxResult<()> {
        let queue = self
            .queues
            .get(&track)
            .ok_or_else(|| MuxError::TrackError(format!("no {track} track configured")))?;
        if queue.ended {
            return Err(MuxError::TrackError(format!("{track} track already ended")));
        }
        if queue.chunks.len() >= self.capacity {
            return Err(MuxError::BufferFull(format!(
                "{track} queue holds {} chunks waiting for the other track",
                queue.chunks.len()
            )));
        }
        Ok(())
    }

    pub fn push(&mut self, chunk: QueuedChunk) -> MuxResult<()> {
        self.can_accept(chunk.track)?;
        if let Some(queue) = self.queues.get_mut(&chunk.track) {
            queue.chunks.push_back(chunk);
        }
        Ok(())
    }

    /// Mark a track as finished. Its queue still drains.
    pub fn end(&mut self, track: TrackKind) -> MuxResult<()> {
        let queue = self
            .queues
            .get_mut(&track)
            .ok_or_else(|| MuxError::TrackError(format!("no {track} track configured")))?;
        queue.ended = true;
        Ok(())
    }

    pub fn end_all(&mut self) {
        for queue in self.queues.values_mut() {
            queue.ended = true;
        }
    }

    /// The track whose front chunk may be written now, if any.
    ///
    /// `None` while some active track has nothing queued. Among the rest the
    /// smallest front timestamp wins; video wins ties.
    pub fn next_safe(&self) -> Option<TrackKind> {
        let mut best: Option<(u64, TrackKind)> = None;
        for (&kind, queue) in &self.queues {
            match queue.chunks.front() {
                None if queue.ended => continue,
                None => return None,
                Some(front) => {
                    let candidate = (front.timestamp_us, kind);
                    if best.map_or(true, |b| candidate < b) {
                        best = Some(candidate);
                    }
                }
            }
        }
        best.map(|(_, kind)| kind)
    }

    pub fn pop_next(&mut self) -> Option<QueuedChunk> {
        let track = self.next_safe()?;
        self.queues.get_mut(&track)?.chunks.pop_front()
    }

    pub fn queued(&self, track: TrackKind) -> usize {
        self.queues.get(&track).map_or(0, |q| q.chunks.len())
    }

    /// Every queue is empty.
    pub fn is_drained(&self) -> bool {
        self.queues.values().all(|q| q.chunks.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(track: TrackKind, ts: u64) -> QueuedChunk {
        QueuedChunk {
            track,
            data: vec![0; 4],
            timestamp_us: ts,
            frame_type: FrameType::Delta,
        }
    }

    fn both() -> Scheduler {
        Scheduler::new(&[TrackKind::Video, TrackKind::Audio], 16)
    }

    #[test]
    fn waits_for_every_active_track() {
        let mut s = both();
        s.push(chunk(TrackKind::Video, 0)).unwrap();
        assert_eq!(s.next_safe(), None);
        assert_eq!(s.pop_next(), None);

        s.push(chunk(TrackKind::Audio, 10)).unwrap();
        assert_eq!(s.next_safe(), Some(TrackKind::Video));
    }

    #[test]
    fn smallest_timestamp_first() {
        let mut s = both();
        s.push(chunk(TrackKind::Video, 40_000)).unwrap();
        s.push(chunk(TrackKind::Audio, 20_000)).unwrap();
        s.push(chunk(TrackKind::Audio, 60_000)).unwrap();

        assert_eq!(s.pop_next().unwrap().timestamp_us, 20_000);
        assert_eq!(s.pop_next().unwrap().timestamp_us, 40_000);
        // Video is empty and still active
        assert_eq!(s.pop_next(), None);
        assert_eq!(s.queued(TrackKind::Audio), 1);
    }

    #[test]
    fn video_wins_ties() {
        let mut s = both();
        s.push(chunk(TrackKind::Audio, 1_000)).unwrap();
        s.push(chunk(TrackKind::Video, 1_000)).unwrap();
        assert_eq!(s.next_safe(), Some(TrackKind::Video));
    }

    #[test]
    fn ended_track_unblocks() {
        let mut s = both();
        s.push(chunk(TrackKind::Audio, 0)).unwrap();
        s.push(chunk(TrackKind::Audio, 20_000)).unwrap();
        assert_eq!(s.next_safe(), None);

        s.end(TrackKind::Video).unwrap();
        assert_eq!(s.pop_next().unwrap().timestamp_us, 0);
        assert_eq!(s.pop_next().unwrap().timestamp_us, 20_000);
        assert!(s.is_drained());
        assert_eq!(s.next_safe(), None);
    }

    #[test]
    fn ended_track_still_drains_its_queue() {
        let mut s = both();
        s.push(chunk(TrackKind::Video, 0)).unwrap();
        s.push(chunk(TrackKind::Video, 33_000)).unwrap();
        s.end_all();

        assert!(s.is_ended(TrackKind::Video));
        assert_eq!(s.pop_next().unwrap().timestamp_us, 0);
        assert_eq!(s.pop_next().unwrap().timestamp_us, 33_000);
        assert_eq!(s.pop_next(), None);
    }

    #[test]
    fn push_rejections() {
        let mut s = Scheduler::new(&[TrackKind::Video], 2);
        assert!(matches!(
            s.push(chunk(TrackKind::Audio, 0)),
            Err(MuxError::TrackError(_))
        ));

        // Single-track output never blocks, but the bound still applies to pushes.
        s.push(chunk(TrackKind::Video, 0)).unwrap();
        s.push(chunk(TrackKind::Video, 1)).unwrap();
        assert!(matches!(
            s.push(chunk(TrackKind::Video, 2)),
            Err(MuxError::BufferFull(_))
        ));
        assert_eq!(s.queued(TrackKind::Video), 2);

        s.end(TrackKind::Video).unwrap();
        assert!(matches!(
            s.can_accept(TrackKind::Video),
            Err(MuxError::TrackError(_))
        ));
        assert!(s.end(TrackKind::Audio).is_err());
    }

    #[test]
    fn single_track_releases_immediately() {
        let mut s = Scheduler::new(&[TrackKind::Audio], 4);
        s.push(chunk(TrackKind::Audio, 0)).unwrap();
        assert_eq!(s.next_safe(), Some(TrackKind::Audio));
    }
}
