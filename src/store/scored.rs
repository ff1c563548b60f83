//! Score-ordered member set.

use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A totally ordered `f64` usable as a map key.
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl Score {
    fn new(value: f64) -> Self {
        // -0.0 and 0.0 must land on the same key
        if value == 0.0 {
            Score(0.0)
        } else {
            Score(value)
        }
    }
}

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Members ordered by ascending score.
///
/// Several members may share a score, and the same member may be inserted
/// more than once; every insertion counts.
#[derive(Debug, Clone, Default)]
pub struct ScoredSet {
    members: BTreeMap<Score, Vec<String>>,
    len: usize,
}

impl ScoredSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a member at the given score.
    pub fn insert(&mut self, score: f64, member: impl Into<String>) {
        self.members
            .entry(Score::new(score))
            .or_default()
            .push(member.into());
        self.len += 1;
    }

    /// Remove all members with `min <= score <= max`.
    pub fn remove_range(&mut self, min: f64, max: f64) -> usize {
        let (lo, hi) = (Score::new(min), Score::new(max));
        if lo > hi {
            return 0;
        }

        let doomed: Vec<Score> = self.members.range(lo..=hi).map(|(s, _)| *s).collect();
        let mut removed = 0;
        for score in doomed {
            if let Some(bucket) = self.members.remove(&score) {
                removed += bucket.len();
            }
        }

        self.len -= removed;
        removed
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Lowest score in the set.
    pub fn min_score(&self) -> Option<f64> {
        self.members.keys().next().map(|s| s.0)
    }

    /// Iterate `(score, member)` pairs in ascending score order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, &str)> {
        self.members
            .iter()
            .flat_map(|(score, bucket)| bucket.iter().map(move |m| (score.0, m.as_str())))
    }
}
