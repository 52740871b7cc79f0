//! Per-source record of which IDs have been captured
//!
//! A `MessageHistory` is filled in by the crawl consumer after each committed
//! page and answers "where is the next unfetched stretch below this bound".

use crate::range::{MultiRange, Range};
use crate::RangeResult;
use std::fmt;

/// Captured ID spans for one source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHistory {
    ranges: MultiRange<u64>,
    first: Option<u64>,
    finished: bool,
}

impl MessageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a history that already holds the given spans
    pub fn from_ranges<I>(ranges: I) -> Self
    where
        I: IntoIterator<Item = Range<u64>>,
    {
        Self {
            ranges: MultiRange::from_ranges(ranges),
            ..Self::default()
        }
    }

    /// Adds the captured span `[begin, end]`
    pub fn record(&mut self, begin: u64, end: u64) -> RangeResult<()> {
        self.ranges.insert(Range::new(begin, end)?);
        Ok(())
    }

    /// Adds an already constructed span
    pub fn insert(&mut self, range: Range<u64>) {
        self.ranges.insert(range);
    }

    /// Sets the earliest record ID the source is known to hold
    pub fn mark_first(&mut self, id: u64) {
        self.first = Some(id);
    }

    pub fn first(&self) -> Option<u64> {
        self.first
    }

    /// Marks the source as fully captured
    pub fn mark_finished(&mut self) {
        self.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Returns true when nothing older than what is held remains to fetch
    pub fn is_complete(&self) -> bool {
        if self.finished {
            return true;
        }

        match (self.first, self.ranges.min()) {
            (Some(first), Some(lowest)) => lowest <= first,
            _ => false,
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ranges.contains(id)
    }

    pub fn ranges(&self) -> &MultiRange<u64> {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Finds the next stretch of IDs to fetch below `target_upper_bound`
    ///
    /// Runs are scanned from the highest down. The first run ending below
    /// the bound yields the hole right after it, clipped to the lowest
    /// captured ID above it and to `max_size`.
    ///
    /// # Arguments
    ///
    /// * `target_upper_bound` - The highest ID worth fetching
    /// * `start_floor` - Where to begin when nothing has been captured
    /// * `max_size` - The largest page the caller will request
    ///
    /// # Returns
    ///
    /// `(start, length)` of the hole. A finished history returns a length of
    /// zero, and a history with no runs below the bound returns
    /// `(target_upper_bound, max_size)`.
    pub fn find_first_hole(
        &self,
        target_upper_bound: u64,
        start_floor: u64,
        max_size: u64,
    ) -> (u64, u64) {
        if self.finished {
            return (target_upper_bound, 0);
        }

        if self.ranges.is_empty() {
            return (start_floor, max_size);
        }

        let mut ceiling = target_upper_bound;
        for range in self.ranges.iter().rev() {
            if range.end() < target_upper_bound {
                let length = ceiling - range.end();
                return (range.end() + 1, length.min(max_size));
            }

            ceiling = range.begin().saturating_sub(1);
        }

        (target_upper_bound, max_size)
    }
}

impl fmt::Display for MessageHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.finished { " (finished)" } else { "" };

        match self.ranges.len() {
            0 => write!(f, "[]{}", state),
            n if n > 4 => write!(f, "{} chunks{}", n, state),
            _ => write!(f, "{}{}", self.ranges, state),
        }
    }
}
