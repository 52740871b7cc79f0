use crate::range::interval::{Discrete, Range};
use std::fmt;

/// A sorted group of disjoint ranges
///
/// Ranges are kept in ascending order, and no two stored ranges overlap or
/// sit directly next to each other. Every mutation restores this, so the
/// representation of a given set of values is unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MultiRange<T> {
    ranges: Vec<Range<T>>,
}

impl<T> Default for MultiRange<T> {
    fn default() -> Self {
        Self { ranges: Vec::new() }
    }
}

impl<T: Discrete> MultiRange<T> {
    /// Creates an empty multi-range
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a multi-range from any number of ranges, merging as needed
    pub fn from_ranges<I>(ranges: I) -> Self
    where
        I: IntoIterator<Item = Range<T>>,
    {
        let mut multi = Self::new();
        for range in ranges {
            multi.insert(range);
        }
        multi
    }

    /// Adds a range, coalescing it with every stored range it touches
    ///
    /// Finds the first affected range by binary search, then splices out the
    /// `k` ranges that overlap or are adjacent to the new one.
    pub fn insert(&mut self, range: Range<T>) {
        let start = self
            .ranges
            .partition_point(|existing| existing.precedes_with_gap(&range));

        let mut end = start;
        let mut merged = range;
        while end < self.ranges.len() && !merged.precedes_with_gap(&self.ranges[end]) {
            merged = merged.hull(&self.ranges[end]);
            end += 1;
        }

        self.ranges.splice(start..end, std::iter::once(merged));
    }

    /// Determines if a value is within any of the ranges
    pub fn contains(&self, value: T) -> bool {
        let idx = self.ranges.partition_point(|r| r.end() < value);
        self.ranges.get(idx).is_some_and(|r| r.begin() <= value)
    }

    /// Returns the stored ranges in ascending order
    pub fn ranges(&self) -> &[Range<T>] {
        &self.ranges
    }

    /// Iterates over the stored ranges in ascending order
    pub fn iter(&self) -> std::slice::Iter<'_, Range<T>> {
        self.ranges.iter()
    }

    /// Returns the number of disjoint ranges
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Returns the smallest value in the set
    pub fn min(&self) -> Option<T> {
        self.ranges.first().map(Range::begin)
    }

    /// Returns the largest value in the set
    pub fn max(&self) -> Option<T> {
        self.ranges.last().map(Range::end)
    }

    /// Returns the union of the two sets
    pub fn union(&self, other: &Self) -> Self {
        let (mut base, extra) = if self.len() >= other.len() {
            (self.clone(), other)
        } else {
            (other.clone(), self)
        };

        for range in extra.iter() {
            base.insert(*range);
        }
        base
    }

    /// Returns the values present in both sets
    pub fn intersect(&self, other: &Self) -> Self {
        let (a, b) = (&self.ranges, &other.ranges);
        let mut ranges = Vec::new();
        let (mut i, mut j) = (0, 0);

        while i < a.len() && j < b.len() {
            if let Some(shared) = a[i].intersect(&b[j]) {
                ranges.push(shared);
            }

            if a[i].end() < b[j].end() {
                i += 1;
            } else {
                j += 1;
            }
        }

        Self { ranges }
    }

    /// Returns the values of `self` that are not in `other`
    pub fn difference(&self, other: &Self) -> Self {
        let removed = &other.ranges;
        let mut ranges = Vec::new();
        let mut first_candidate = 0;

        for range in &self.ranges {
            while first_candidate < removed.len() && removed[first_candidate].end() < range.begin()
            {
                first_candidate += 1;
            }

            let mut remaining = Some(*range);
            let mut k = first_candidate;
            while let Some(current) = remaining {
                match removed.get(k) {
                    Some(cut) if cut.begin() <= current.end() => {
                        let [below, above] = current.subtract(cut);
                        if let Some(below) = below {
                            ranges.push(below);
                        }
                        remaining = above;
                        k += 1;
                    }
                    _ => {
                        ranges.push(current);
                        remaining = None;
                    }
                }
            }
        }

        Self { ranges }
    }

    /// Returns true if every value of `self` is also in `other`
    pub fn is_subset(&self, other: &Self) -> bool {
        self.difference(other).is_empty()
    }
}

impl<T: Discrete> From<Range<T>> for MultiRange<T> {
    fn from(range: Range<T>) -> Self {
        Self {
            ranges: vec![range],
        }
    }
}

impl<T: Discrete> FromIterator<Range<T>> for MultiRange<T> {
    fn from_iter<I: IntoIterator<Item = Range<T>>>(iter: I) -> Self {
        Self::from_ranges(iter)
    }
}

impl<'a, T: Discrete> IntoIterator for &'a MultiRange<T> {
    type Item = &'a Range<T>;
    type IntoIter = std::slice::Iter<'a, Range<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges.iter()
    }
}

impl<T: Discrete> fmt::Display for MultiRange<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ranges.is_empty() {
            return write!(f, "{{}}");
        }

        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, " ∪ ")?;
            }
            write!(f, "{}", range)?;
        }
        Ok(())
    }
}
