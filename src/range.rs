use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed interval `[start, end]` over record indices confirmed durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedRange {
    pub start: u64,
    pub end: u64,
}

impl ClosedRange {
    fn touches(&self, other: &ClosedRange) -> bool {
        // Adjacent counts as touching: [0,10] and [11,20] coalesce over an
        // integer index domain.
        self.start <= other.end.saturating_add(1) && other.start <= self.end.saturating_add(1)
    }
}

/// Error surfaced when a persisted range is malformed.
#[derive(Debug, Error)]
pub enum RangeError {
    #[error("inverted range: start {start} exceeds end {end}")]
    InvertedRange { start: u64, end: u64 },
}

/// Per-stream tracker for ingested-record counts and durably persisted ranges.
///
/// Persistence-completion callbacks merge newly durable intervals via
/// [`add_persisted_range`](Self::add_persisted_range); the checkpoint manager
/// only ever reads point-in-time [`snapshot`](Self::snapshot)s. The range set
/// is kept sorted, disjoint, and coalesced, and only ever grows.
#[derive(Debug, Clone, Default)]
pub struct PersistedRangeTracker {
    record_count: u64,
    ranges: Vec<ClosedRange>,
}

impl PersistedRangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one ingested record.
    pub fn add_record(&mut self) {
        self.record_count = self.record_count.saturating_add(1);
    }

    /// Records `count` ingested records.
    pub fn add_records(&mut self, count: u64) {
        self.record_count = self.record_count.saturating_add(count);
    }

    /// Total records ingested so far (informational; not consulted by the
    /// checkpoint manager).
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Merges the closed interval `[start, end]` into the persisted set.
    pub fn add_persisted_range(&mut self, start: u64, end: u64) -> Result<(), RangeError> {
        if start > end {
            return Err(RangeError::InvertedRange { start, end });
        }
        let mut merged = ClosedRange { start, end };
        let mut result = Vec::with_capacity(self.ranges.len() + 1);
        let mut placed = false;
        for range in &self.ranges {
            if range.touches(&merged) {
                merged.start = merged.start.min(range.start);
                merged.end = merged.end.max(range.end);
            } else if range.end < merged.start {
                result.push(*range);
            } else {
                if !placed {
                    result.push(merged);
                    placed = true;
                }
                result.push(*range);
            }
        }
        if !placed {
            result.push(merged);
        }
        self.ranges = result;
        Ok(())
    }

    /// The coalesced persisted set, sorted and disjoint.
    pub fn persisted_ranges(&self) -> &[ClosedRange] {
        &self.ranges
    }

    /// Captures a point-in-time copy for coverage queries.
    pub fn snapshot(&self) -> PersistedRangeSnapshot {
        PersistedRangeSnapshot {
            record_count: self.record_count,
            ranges: self.ranges.clone(),
        }
    }
}

/// Point-in-time view of a stream's persisted ranges.
///
/// Snapshots are owned copies: a flush can query them without holding any
/// lock on the live tracker, and a snapshot never regresses even while the
/// tracker keeps growing underneath it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PersistedRangeSnapshot {
    record_count: u64,
    ranges: Vec<ClosedRange>,
}

impl PersistedRangeSnapshot {
    /// Record count at snapshot time.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// The persisted set at snapshot time.
    pub fn persisted_ranges(&self) -> &[ClosedRange] {
        &self.ranges
    }

    /// True iff the set fully covers `[0, n)` with no gaps.
    ///
    /// The set is coalesced, so coverage reduces to the first interval
    /// starting at 0 and its closed end reaching at least `n - 1`.
    pub fn covers_prefix(&self, n: u64) -> bool {
        if n == 0 {
            return true;
        }
        match self.ranges.first() {
            Some(first) => first.start == 0 && first.end >= n - 1,
            None => false,
        }
    }
}
