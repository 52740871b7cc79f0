use crate::{RangeError, RangeResult};
use std::fmt;

/// A totally ordered domain where every value has a well-defined neighbour
///
/// Adjacency matters for merging: `[0, 2]` and `[3, 4]` cover the same
/// values as `[0, 4]`, which can only be known if the domain is discrete.
pub trait Discrete: Copy + Ord + fmt::Debug + fmt::Display {
    /// The next value up, or `None` at the top of the domain
    fn successor(self) -> Option<Self>;

    /// The next value down, or `None` at the bottom of the domain
    fn predecessor(self) -> Option<Self>;
}

macro_rules! impl_discrete {
    ($($t:ty),*) => {
        $(
            impl Discrete for $t {
                fn successor(self) -> Option<Self> {
                    self.checked_add(1)
                }

                fn predecessor(self) -> Option<Self> {
                    self.checked_sub(1)
                }
            }
        )*
    };
}

impl_discrete!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);

/// A closed interval `[begin, end]` of values
///
/// Both endpoints are members of the range, so the smallest possible range
/// holds exactly one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range<T> {
    begin: T,
    end: T,
}

impl<T: Discrete> Range<T> {
    /// Creates a new range
    ///
    /// # Arguments
    ///
    /// * `begin` - The smallest member of the range
    /// * `end` - The largest member of the range
    ///
    /// # Returns
    ///
    /// * `Ok(Range)` - The range `[begin, end]`
    /// * `Err(RangeError::InvalidRange)` - `begin` is larger than `end`
    pub fn new(begin: T, end: T) -> RangeResult<Self> {
        if begin > end {
            return Err(RangeError::InvalidRange {
                begin: begin.to_string(),
                end: end.to_string(),
            });
        }

        Ok(Self { begin, end })
    }

    /// Creates a range holding a single value
    pub fn point(value: T) -> Self {
        Self {
            begin: value,
            end: value,
        }
    }

    /// Returns the smallest value in the range
    pub fn begin(&self) -> T {
        self.begin
    }

    /// Returns the largest value in the range
    pub fn end(&self) -> T {
        self.end
    }

    /// Determines if a value is within the range
    pub fn contains(&self, value: T) -> bool {
        self.begin <= value && value <= self.end
    }

    /// Returns true if the two ranges share at least one value
    pub fn overlaps(&self, other: &Self) -> bool {
        self.begin <= other.end && other.begin <= self.end
    }

    /// Returns true if `self` ends strictly before `other` begins with at
    /// least one value missing in between
    pub fn precedes_with_gap(&self, other: &Self) -> bool {
        self.end
            .successor()
            .is_some_and(|next| next < other.begin)
    }

    /// Returns true if the ranges overlap or are directly adjacent, i.e. their
    /// union is contiguous
    pub fn touches(&self, other: &Self) -> bool {
        !self.precedes_with_gap(other) && !other.precedes_with_gap(self)
    }

    /// Returns true if every value of `self` is also in `other`
    pub fn is_subset(&self, other: &Self) -> bool {
        other.begin <= self.begin && self.end <= other.end
    }

    /// Returns the smallest range covering both ranges
    pub fn hull(&self, other: &Self) -> Self {
        Self {
            begin: self.begin.min(other.begin),
            end: self.end.max(other.end),
        }
    }

    /// Returns the values shared by both ranges, if any
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        if !self.overlaps(other) {
            return None;
        }

        Some(Self {
            begin: self.begin.max(other.begin),
            end: self.end.min(other.end),
        })
    }

    /// Removes `other` from `self`
    ///
    /// Returns the pieces left below and above `other`. Either side may be
    /// empty; if `other` does not overlap `self` at all the whole range is
    /// returned as the lower piece.
    pub fn subtract(&self, other: &Self) -> [Option<Self>; 2] {
        if !self.overlaps(other) {
            return [Some(*self), None];
        }

        let below = if self.begin < other.begin {
            other.begin.predecessor().map(|end| Self {
                begin: self.begin,
                end,
            })
        } else {
            None
        };

        let above = if other.end < self.end {
            other.end.successor().map(|begin| Self {
                begin,
                end: self.end,
            })
        } else {
            None
        };

        [below, above]
    }
}

impl<T: Discrete> fmt::Display for Range<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.begin, self.end)
    }
}

impl<T: Discrete> TryFrom<(T, T)> for Range<T> {
    type Error = RangeError;

    fn try_from((begin, end): (T, T)) -> RangeResult<Self> {
        Self::new(begin, end)
    }
}
