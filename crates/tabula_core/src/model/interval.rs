//! Row interval sets used for the invalid and masked cell flags.
//!
//! # Invariants
//! - Ranges are inclusive, sorted by start, and never overlap or touch.

use serde::Serialize;

/// Inclusive row range `start..=end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RowRange {
    start: usize,
    end: usize,
}

impl RowRange {
    /// Returns `None` when `end < start`.
    pub fn new(start: usize, end: usize) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn single(row: usize) -> Self {
        Self {
            start: row,
            end: row,
        }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, row: usize) -> bool {
        self.start <= row && row <= self.end
    }
}

/// Normalized set of row ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntervalSet {
    ranges: Vec<RowRange>,
}

impl IntervalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ranges(&self) -> &[RowRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn contains(&self, row: usize) -> bool {
        let index = self.ranges.partition_point(|range| range.end < row);
        self.ranges
            .get(index)
            .is_some_and(|range| range.contains(row))
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    pub fn insert(&mut self, range: RowRange) {
        self.ranges.push(range);
        self.normalize();
    }

    pub fn remove(&mut self, range: RowRange) {
        let mut kept = Vec::with_capacity(self.ranges.len() + 1);
        for current in &self.ranges {
            if current.end < range.start || current.start > range.end {
                kept.push(*current);
                continue;
            }
            if current.start < range.start {
                kept.push(RowRange {
                    start: current.start,
                    end: range.start - 1,
                });
            }
            if current.end > range.end {
                kept.push(RowRange {
                    start: range.end + 1,
                    end: current.end,
                });
            }
        }
        self.ranges = kept;
    }

    /// Sets or clears `range` depending on `on`.
    pub fn set(&mut self, range: RowRange, on: bool) {
        if on {
            self.insert(range);
        } else {
            self.remove(range);
        }
    }

    /// Shifts ranges to make room for `count` fresh rows before `before`.
    /// Fresh rows are never part of the set.
    pub fn insert_rows(&mut self, before: usize, count: usize) {
        if count == 0 {
            return;
        }
        let mut shifted = Vec::with_capacity(self.ranges.len() + 1);
        for range in &self.ranges {
            if range.end < before {
                shifted.push(*range);
            } else if range.start >= before {
                shifted.push(RowRange {
                    start: range.start + count,
                    end: range.end + count,
                });
            } else {
                shifted.push(RowRange {
                    start: range.start,
                    end: before - 1,
                });
                shifted.push(RowRange {
                    start: before + count,
                    end: range.end + count,
                });
            }
        }
        self.ranges = shifted;
    }

    /// Drops rows `first..first + count` and closes the gap.
    pub fn remove_rows(&mut self, first: usize, count: usize) {
        if count == 0 {
            return;
        }
        let last = first.saturating_add(count - 1);
        self.remove(RowRange {
            start: first,
            end: last,
        });
        for range in &mut self.ranges {
            if range.start > last {
                range.start -= count;
                range.end -= count;
            }
        }
        self.normalize();
    }

    /// Drops every row at or after `len`.
    pub fn truncate(&mut self, len: usize) {
        self.remove(RowRange {
            start: len,
            end: usize::MAX,
        });
    }

    pub fn row_count(&self) -> usize {
        self.ranges.iter().map(RowRange::len).sum()
    }

    fn normalize(&mut self) {
        self.ranges.sort_by_key(|range| range.start);
        let mut merged: Vec<RowRange> = Vec::with_capacity(self.ranges.len());
        for range in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if range.start <= last.end.saturating_add(1) => {
                    last.end = last.end.max(range.end);
                }
                _ => merged.push(range),
            }
        }
        self.ranges = merged;
    }
}
