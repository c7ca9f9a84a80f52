use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::tracker::{ObjectClass, TrackedDetection};

/// Virtual counting line with a vertical tolerance band.
///
/// A detection participates in counting when its center y falls inside the
/// inclusive band `[y1 - band, y1 + band]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountingLine {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub band: i32,
}

impl CountingLine {
    pub fn horizontal(x1: i32, x2: i32, y: i32, band: i32) -> Self {
        Self {
            x1,
            y1: y,
            x2,
            y2: y,
            band,
        }
    }

    /// Whether a detection center at `cy` falls inside the crossing band.
    pub fn contains_y(&self, cy: f32) -> bool {
        cy >= (self.y1 - self.band) as f32 && cy <= (self.y1 + self.band) as f32
    }
}

/// Running totals copied into every published pipeline item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountsSnapshot {
    pub bottles: u64,
    pub cans: u64,
    pub total: u64,
}

/// One newly counted object, surfaced for the serial event link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountedEvent {
    pub class: ObjectClass,
    pub track_id: i64,
}

/// Per-run counting state machine.
///
/// Deduplication is membership in the seen set, not edge-triggered crossing
/// detection: a track that jitters in and out of the band is counted once,
/// and a track that genuinely re-crosses under the same id is not counted
/// again until `reset`.
pub struct LineCounter {
    line: CountingLine,
    seen: HashSet<i64>,
    counts: CountsSnapshot,
}

impl LineCounter {
    pub fn new(line: CountingLine) -> Self {
        Self {
            line,
            seen: HashSet::new(),
            counts: CountsSnapshot::default(),
        }
    }

    pub fn line(&self) -> CountingLine {
        self.line
    }

    /// Consume one frame's detections and return the objects it counted.
    ///
    /// Most frames return an empty vec; the caller uses non-emptiness to
    /// flash the line on the annotated frame and to drive the event link.
    pub fn observe(&mut self, detections: &[TrackedDetection]) -> Vec<CountedEvent> {
        let mut counted = Vec::new();
        for detection in detections {
            if !self.line.contains_y(detection.center.1) {
                continue;
            }
            if !self.seen.insert(detection.track_id) {
                continue;
            }
            match detection.class {
                ObjectClass::Bottle => self.counts.bottles += 1,
                ObjectClass::Can => self.counts.cans += 1,
            }
            self.counts.total += 1;
            debug!(
                track = detection.track_id,
                class = detection.class.label(),
                total = self.counts.total,
                "object crossed the counting line"
            );
            counted.push(CountedEvent {
                class: detection.class,
                track_id: detection.track_id,
            });
        }
        counted
    }

    pub fn counts(&self) -> CountsSnapshot {
        self.counts
    }

    /// Clear the seen set and zero the totals.
    ///
    /// Invoked by the pipeline when a loop-enabled file source rewinds, so
    /// every pass over the footage counts afresh. Never called automatically.
    pub fn reset(&mut self) {
        self.seen.clear();
        self.counts = CountsSnapshot::default();
    }
}
