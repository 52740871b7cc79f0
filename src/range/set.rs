use crate::range::interval::{Discrete, Range};
use crate::range::multi::MultiRange;
use crate::{RangeError, RangeResult};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{BitAnd, BitOr};

/// A set of values expressed as ranges
///
/// Every operation returns a normalized value: an empty result is `Null`
/// and a single contiguous run is `Range`. `Multi` always holds two or more
/// disjoint runs.
#[derive(Debug, Clone)]
pub enum IntervalSet<T> {
    /// The empty set
    Null,

    /// The universal set
    All,

    /// One contiguous run of values
    Range(Range<T>),

    /// Two or more disjoint runs of values
    Multi(MultiRange<T>),
}

impl<T: Discrete> IntervalSet<T> {
    /// Builds a normalized set from a multi-range
    pub fn from_multi(multi: MultiRange<T>) -> Self {
        match multi.ranges() {
            [] => Self::Null,
            [single] => Self::Range(*single),
            _ => Self::Multi(multi),
        }
    }

    /// Builds a set from a contiguous run `[begin, end]`
    pub fn range(begin: T, end: T) -> RangeResult<Self> {
        Range::new(begin, end).map(Self::Range)
    }

    /// Returns the disjoint runs making up this set, or `None` for the
    /// universal set
    pub fn runs(&self) -> Option<&[Range<T>]> {
        match self {
            Self::Null => Some(&[]),
            Self::All => None,
            Self::Range(range) => Some(std::slice::from_ref(range)),
            Self::Multi(multi) => Some(multi.ranges()),
        }
    }

    fn to_multi(&self) -> Option<MultiRange<T>> {
        self.runs()
            .map(|runs| MultiRange::from_ranges(runs.iter().copied()))
    }

    /// Determines if a value is within the set
    pub fn contains(&self, value: T) -> bool {
        match self {
            Self::Null => false,
            Self::All => true,
            Self::Range(range) => range.contains(value),
            Self::Multi(multi) => multi.contains(value),
        }
    }

    /// Returns the smallest value in the set
    ///
    /// Both the empty and the universal set return `None`.
    pub fn min(&self) -> Option<T> {
        self.runs().and_then(|runs| runs.first().map(Range::begin))
    }

    /// Returns the largest value in the set
    pub fn max(&self) -> Option<T> {
        self.runs().and_then(|runs| runs.last().map(Range::end))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.runs(), Some([]))
    }

    /// Returns the number of disjoint runs in the set
    ///
    /// Fails with `RangeError::UnboundedSet` for the universal set.
    pub fn len(&self) -> RangeResult<usize> {
        self.runs()
            .map(|runs| runs.len())
            .ok_or(RangeError::UnboundedSet)
    }

    /// Iterates over the disjoint runs of the set in ascending order
    ///
    /// Fails with `RangeError::UnboundedSet` for the universal set.
    pub fn iter(&self) -> RangeResult<std::slice::Iter<'_, Range<T>>> {
        self.runs()
            .map(|runs| runs.iter())
            .ok_or(RangeError::UnboundedSet)
    }

    /// Returns the union of the two sets
    pub fn union(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::All, _) | (_, Self::All) => Self::All,
            (Self::Null, x) | (x, Self::Null) => x.clone(),
            _ => match (self.to_multi(), other.to_multi()) {
                (Some(a), Some(b)) => Self::from_multi(a.union(&b)),
                _ => Self::All,
            },
        }
    }

    /// Returns the values present in both sets
    pub fn intersect(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Null, _) | (_, Self::Null) => Self::Null,
            (Self::All, x) | (x, Self::All) => x.clone(),
            _ => match (self.to_multi(), other.to_multi()) {
                (Some(a), Some(b)) => Self::from_multi(a.intersect(&b)),
                _ => Self::Null,
            },
        }
    }

    /// Returns the values of `self` that are not in `other`
    ///
    /// Subtracting from the universal set yields a complement, which has no
    /// representation here, so that case fails with `NotImplemented`.
    pub fn difference(&self, other: &Self) -> RangeResult<Self> {
        match (self, other) {
            (Self::All, _) => Err(RangeError::NotImplemented(
                "difference on the universal set",
            )),
            (_, Self::All) | (Self::Null, _) => Ok(Self::Null),
            (x, Self::Null) => Ok(x.clone()),
            _ => match (self.to_multi(), other.to_multi()) {
                (Some(a), Some(b)) => Ok(Self::from_multi(a.difference(&b))),
                _ => Ok(Self::Null),
            },
        }
    }

    /// Returns the values in exactly one of the two sets
    pub fn symmetric_difference(&self, other: &Self) -> RangeResult<Self> {
        match (self, other) {
            (Self::All, _) | (_, Self::All) => Err(RangeError::NotImplemented(
                "symmetric difference with the universal set",
            )),
            _ => {
                let left = self.difference(other)?;
                let right = other.difference(self)?;
                Ok(left.union(&right))
            }
        }
    }

    /// Returns true if every value of `self` is also in `other`
    pub fn is_subset(&self, other: &Self) -> bool {
        match (self, other) {
            (_, Self::All) | (Self::Null, _) => true,
            (Self::All, _) => false,
            _ => self.difference(other).is_ok_and(|rest| rest.is_empty()),
        }
    }

    /// Returns true if every value of `other` is also in `self`
    pub fn is_superset(&self, other: &Self) -> bool {
        other.is_subset(self)
    }

    /// Returns true if the sets share no values
    pub fn is_disjoint(&self, other: &Self) -> bool {
        self.intersect(other).is_empty()
    }
}

impl<T: Discrete> PartialEq for IntervalSet<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self.runs(), other.runs()) {
            (None, None) => true,
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl<T: Discrete> Eq for IntervalSet<T> {}

impl<T: Discrete + Hash> Hash for IntervalSet<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.runs() {
            None => state.write_u8(0xff),
            Some(runs) => runs.hash(state),
        }
    }
}

/// Sets are ordered by inclusion: `a <= b` means `a` is a subset of `b`.
/// Sets where neither contains the other are unordered.
impl<T: Discrete> PartialOrd for IntervalSet<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            Some(Ordering::Equal)
        } else if self.is_subset(other) {
            Some(Ordering::Less)
        } else if other.is_subset(self) {
            Some(Ordering::Greater)
        } else {
            None
        }
    }
}

impl<T: Discrete> From<Range<T>> for IntervalSet<T> {
    fn from(range: Range<T>) -> Self {
        Self::Range(range)
    }
}

impl<T: Discrete> From<MultiRange<T>> for IntervalSet<T> {
    fn from(multi: MultiRange<T>) -> Self {
        Self::from_multi(multi)
    }
}

impl<T: Discrete> BitOr for &IntervalSet<T> {
    type Output = IntervalSet<T>;

    fn bitor(self, rhs: Self) -> IntervalSet<T> {
        self.union(rhs)
    }
}

impl<T: Discrete> BitOr for IntervalSet<T> {
    type Output = IntervalSet<T>;

    fn bitor(self, rhs: Self) -> IntervalSet<T> {
        self.union(&rhs)
    }
}

impl<T: Discrete> BitAnd for &IntervalSet<T> {
    type Output = IntervalSet<T>;

    fn bitand(self, rhs: Self) -> IntervalSet<T> {
        self.intersect(rhs)
    }
}

impl<T: Discrete> BitAnd for IntervalSet<T> {
    type Output = IntervalSet<T>;

    fn bitand(self, rhs: Self) -> IntervalSet<T> {
        self.intersect(&rhs)
    }
}

impl<T: Discrete> fmt::Display for IntervalSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "∅"),
            Self::All => write!(f, "*"),
            Self::Range(range) => write!(f, "{}", range),
            Self::Multi(multi) => write!(f, "{}", multi),
        }
    }
}
