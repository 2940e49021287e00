//! Cue and SeekHead bookkeeping.

use webm_common::elements::element_name;

/// One seek-table entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CuePoint {
    pub track_number: u64,
    /// Absolute time in timecode-scale ticks.
    pub time_ticks: u64,
    /// Cluster offset relative to the Segment data start.
    pub cluster_position: u64,
}

/// Append-only list of cue points, in write order.
///
/// Clusters are written in timestamp order, so insertion order is also
/// ascending by position and by time.
#[derive(Clone, Debug, Default)]
pub struct CueTracker {
    points: Vec<CuePoint>,
}

impl CueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, point: CuePoint) {
        debug_assert!(
            self.points
                .last()
                .map_or(true, |last| last.cluster_position < point.cluster_position),
            "cue points must be recorded in ascending cluster order"
        );
        self.points.push(point);
    }

    pub fn points(&self) -> &[CuePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// A top-level element position for the SeekHead.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SeekEntry {
    pub id: u32,
    /// Offset relative to the Segment data start.
    pub position: u64,
}

impl SeekEntry {
    pub fn new(id: u32, position: u64) -> Self {
        Self { id, position }
    }
}

/// Positions of Info, Tracks and Cues, in the order they were written.
#[derive(Clone, Debug, Default)]
pub struct SeekHeadTracker {
    entries: Vec<SeekEntry>,
}

impl SeekHeadTracker {
    pub fn new(entries: impl IntoIterator<Item = SeekEntry>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn record(&mut self, id: u32, position: u64) {
        tracing::trace!(element = element_name(id), position, "Recorded seek entry");
        self.entries.push(SeekEntry::new(id, position));
    }

    pub fn entries(&self) -> &[SeekEntry] {
        &self.entries
    }

    pub fn position_of(&self, id: u32) -> Option<u64> {
        self.entries.iter().find(|e| e.id == id).map(|e| e.position)
    }
}
