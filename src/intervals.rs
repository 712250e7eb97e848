//! Exact algebra over finite unions of closed real intervals.
//!
//! A [`RealSubset`] is the normalized form of a union of closed intervals
//! `[l, u]`: intervals are stored in ascending order, pairwise disjoint and
//! non-touching (`u_i < l_{i+1}`). `±∞` are admissible endpoints and the
//! empty set is the absence of intervals.
//!
//! ## Numerical policy
//!
//! Endpoints are compared by **exact** floating-point comparison. No
//! tolerance is applied anywhere in this module: touching intervals
//! coalesce under union, nothing else does, and equality is structural on
//! the normalized representation. Approximate coalescing belongs to root
//! extraction (see `polynomial`), not to the algebra.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors raised by interval construction and lookup.
#[derive(Debug, thiserror::Error)]
pub enum IntervalError {
    /// Construction from a pair with `lower > upper`.
    #[error("inverted interval [{lower}, {upper}]")]
    Inverted {
        /// Offending lower endpoint.
        lower: f64,
        /// Offending upper endpoint.
        upper: f64,
    },
    /// Construction from a pair containing a NaN endpoint.
    #[error("interval endpoint is NaN")]
    NanEndpoint,
    /// Construction of a point interval pinned at `±∞`.
    #[error("point interval at a non-finite endpoint ({0})")]
    NonFinitePoint(f64),
    /// [`RealSubset::find_interval_containing`] on a point outside the set.
    #[error("no interval of the subset contains {0}")]
    NotContained(f64),
}

/// A single closed interval `[lower, upper]` with `lower ≤ upper`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    /// Lower endpoint (may be `-∞`).
    pub lower: f64,
    /// Upper endpoint (may be `+∞`).
    pub upper: f64,
}

impl Interval {
    /// Validate and build a closed interval.
    pub fn new(lower: f64, upper: f64) -> Result<Self, IntervalError> {
        if lower.is_nan() || upper.is_nan() {
            return Err(IntervalError::NanEndpoint);
        }
        if lower > upper {
            return Err(IntervalError::Inverted { lower, upper });
        }
        if lower == upper && lower.is_infinite() {
            return Err(IntervalError::NonFinitePoint(lower));
        }
        Ok(Self { lower, upper })
    }

    /// Whether `z` lies in the closed interval.
    #[inline]
    pub fn contains(&self, z: f64) -> bool {
        self.lower <= z && z <= self.upper
    }

    /// Length of the interval (`+∞` when unbounded).
    #[inline]
    pub fn length(&self) -> f64 {
        self.upper - self.lower
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}

/// A normalized finite union of closed real intervals.
///
/// All set operations return normalized values; normalization is
/// idempotent. Equality (`==`) is structural equality of the normalized
/// interval sequence.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RealSubset {
    intervals: Vec<Interval>,
}

impl RealSubset {
    /// The empty set.
    #[inline]
    pub fn empty() -> Self {
        Self { intervals: Vec::new() }
    }

    /// The whole real line `[-∞, +∞]`.
    pub fn whole_line() -> Self {
        Self {
            intervals: vec![Interval { lower: f64::NEG_INFINITY, upper: f64::INFINITY }],
        }
    }

    /// A single closed interval `[lower, upper]`.
    pub fn interval(lower: f64, upper: f64) -> Result<Self, IntervalError> {
        Ok(Self { intervals: vec![Interval::new(lower, upper)?] })
    }

    /// Build from `[lower, upper]` pairs, rejecting inverted or NaN pairs
    /// and normalizing the result.
    pub fn new(pairs: &[[f64; 2]]) -> Result<Self, IntervalError> {
        let mut intervals = Vec::with_capacity(pairs.len());
        for &[lower, upper] in pairs {
            intervals.push(Interval::new(lower, upper)?);
        }
        Ok(Self::from_intervals(intervals))
    }

    /// Normalize an arbitrary interval collection: sort ascending, then
    /// coalesce every overlapping or touching pair.
    pub(crate) fn from_intervals(mut intervals: Vec<Interval>) -> Self {
        intervals.sort_by(|a, b| {
            a.lower.total_cmp(&b.lower).then(a.upper.total_cmp(&b.upper))
        });
        let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
        for iv in intervals {
            match merged.last_mut() {
                Some(last) if iv.lower <= last.upper => {
                    last.upper = last.upper.max(iv.upper);
                }
                _ => merged.push(iv),
            }
        }
        Self { intervals: merged }
    }

    /// Whether the set has no intervals.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// The stored intervals, ascending and disjoint.
    #[inline]
    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    /// Iterate over the stored intervals.
    pub fn iter_intervals(&self) -> impl Iterator<Item = Interval> + '_ {
        self.intervals.iter().copied()
    }

    /// The set as `[lower, upper]` pairs.
    pub fn to_pairs(&self) -> Vec<[f64; 2]> {
        self.intervals.iter().map(|iv| [iv.lower, iv.upper]).collect()
    }

    /// Lebesgue measure of the set (`+∞` when any interval is unbounded).
    pub fn measure(&self) -> f64 {
        self.intervals.iter().map(Interval::length).sum()
    }

    /// Smallest element of the set, `None` when empty.
    pub fn infimum(&self) -> Option<f64> {
        self.intervals.first().map(|iv| iv.lower)
    }

    /// Largest element of the set, `None` when empty.
    pub fn supremum(&self) -> Option<f64> {
        self.intervals.last().map(|iv| iv.upper)
    }

    /// Union `self ∪ other`.
    pub fn union(&self, other: &Self) -> Self {
        let mut all = Vec::with_capacity(self.intervals.len() + other.intervals.len());
        all.extend_from_slice(&self.intervals);
        all.extend_from_slice(&other.intervals);
        Self::from_intervals(all)
    }

    /// Intersection `self ∩ other`.
    ///
    /// Both sequences are swept in order; a candidate `[max(l), min(u)]`
    /// is emitted only when `max(l) < min(u)`, so intersections that touch
    /// in a single point vanish.
    pub fn intersection(&self, other: &Self) -> Self {
        let (a, b) = (&self.intervals, &other.intervals);
        let mut out = Vec::new();
        let (mut i, mut j) = (0usize, 0usize);
        while i < a.len() && j < b.len() {
            let lower = a[i].lower.max(b[j].lower);
            let upper = a[i].upper.min(b[j].upper);
            if lower < upper {
                out.push(Interval { lower, upper });
            }
            if a[i].upper <= b[j].upper {
                i += 1;
            } else {
                j += 1;
            }
        }
        Self { intervals: out }
    }

    /// Complement `ℝ \ self`.
    ///
    /// Gaps between stored intervals flip to intervals; `[-∞, l₁]` is
    /// prepended when the set does not reach `-∞` and `[uₙ, +∞]` appended
    /// when it does not reach `+∞`. Complement intervals share endpoints
    /// with the set: the algebra is closed-interval throughout, and the
    /// shared endpoints have measure zero.
    pub fn complement(&self) -> Self {
        if self.intervals.is_empty() {
            return Self::whole_line();
        }
        let mut out = Vec::with_capacity(self.intervals.len() + 1);
        let first = self.intervals[0];
        if first.lower > f64::NEG_INFINITY {
            out.push(Interval { lower: f64::NEG_INFINITY, upper: first.lower });
        }
        for pair in self.intervals.windows(2) {
            out.push(Interval { lower: pair[0].upper, upper: pair[1].lower });
        }
        let last = self.intervals[self.intervals.len() - 1];
        if last.upper < f64::INFINITY {
            out.push(Interval { lower: last.upper, upper: f64::INFINITY });
        }
        Self { intervals: out }
    }

    /// Difference `self \ other`.
    pub fn difference(&self, other: &Self) -> Self {
        self.intersection(&other.complement())
    }

    /// Symmetric difference `(self \ other) ∪ (other \ self)`.
    pub fn symmetric_difference(&self, other: &Self) -> Self {
        self.difference(other).union(&other.difference(self))
    }

    /// Whether `z` lies in the set. NaN is in no set.
    pub fn contains(&self, z: f64) -> bool {
        self.locate(z).is_some()
    }

    /// Whether every point of `other` lies in `self`.
    pub fn is_superset_of(&self, other: &Self) -> bool {
        other.intervals.iter().all(|iv| {
            self.locate(iv.lower)
                .map_or(false, |host| host.lower <= iv.lower && iv.upper <= host.upper)
        })
    }

    /// Whether every point of `self` lies in `other`.
    #[inline]
    pub fn is_subset_of(&self, other: &Self) -> bool {
        other.is_superset_of(self)
    }

    /// The stored interval `[l, u]` with `z ∈ [l, u]`, or
    /// [`IntervalError::NotContained`] when `z` is outside the set.
    pub fn find_interval_containing(&self, z: f64) -> Result<Interval, IntervalError> {
        self.locate(z).ok_or(IntervalError::NotContained(z))
    }

    /// Whether `z` lies in the interior of one of the stored intervals.
    pub(crate) fn interior_contains(&self, z: f64) -> bool {
        self.locate(z).map_or(false, |iv| iv.lower < z && z < iv.upper)
    }

    // Binary search for the unique interval that could contain `z`.
    fn locate(&self, z: f64) -> Option<Interval> {
        if z.is_nan() {
            return None;
        }
        let idx = self.intervals.partition_point(|iv| iv.upper < z);
        match self.intervals.get(idx) {
            Some(iv) if iv.contains(z) => Some(*iv),
            _ => None,
        }
    }
}

impl fmt::Display for RealSubset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (k, iv) in self.intervals.iter().enumerate() {
            if k > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{iv}")?;
        }
        write!(f, "]")
    }
}
