//! Concurrent sorted set - member -> i64 score
//!
//! Mirrors the subset of ordered-set commands the engine needs:
//! add-if-absent, atomic increment, remove, score lookup, rank-descending
//! range, score-window range and intersection with a plain member set.
//!
//! Scores live in `AtomicI64` cells inside a `DashMap`, so increments from
//! different writers commute without a read-modify-write cycle and readers
//! never wait on an increment. Ordered views are built from a snapshot at
//! read time; equal scores are ordered by member ascending so pagination is
//! reproducible.

use std::hash::Hash;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

pub struct SortedSet<M> {
    entries: DashMap<M, AtomicI64>,
}

impl<M> SortedSet<M>
where
    M: Copy + Eq + Hash + Ord,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Insert `member` with `score` unless it is already present.
    ///
    /// Returns true if the member was inserted.
    pub fn add(&self, member: M, score: i64) -> bool {
        match self.entries.entry(member) {
            Entry::Vacant(slot) => {
                slot.insert(AtomicI64::new(score));
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Atomically add `delta` to an existing member, returning the new score.
    pub fn incr_by(&self, member: &M, delta: i64) -> Option<i64> {
        self.entries
            .get(member)
            .map(|cell| cell.fetch_add(delta, Ordering::AcqRel) + delta)
    }

    pub fn remove(&self, member: &M) -> Option<i64> {
        self.entries
            .remove(member)
            .map(|(_, cell)| cell.load(Ordering::Acquire))
    }

    pub fn score(&self, member: &M) -> Option<i64> {
        self.entries
            .get(member)
            .map(|cell| cell.load(Ordering::Acquire))
    }

    pub fn contains(&self, member: &M) -> bool {
        self.entries.contains_key(member)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Batched score lookup, one slot per requested member in request order.
    pub fn scores_for(&self, members: &[M]) -> Vec<Option<i64>> {
        members.iter().map(|m| self.score(m)).collect()
    }

    /// Members ranked by score descending, inclusive rank bounds.
    ///
    /// Out-of-range bounds yield an empty or truncated result.
    pub fn rev_range(&self, start: usize, stop: usize) -> Vec<M> {
        if start > stop {
            return Vec::new();
        }
        let ranked = rank_descending(self.snapshot());
        ranked
            .into_iter()
            .skip(start)
            .take(stop - start + 1)
            .map(|(m, _)| m)
            .collect()
    }

    /// Members with `min <= score <= max`, ascending by score then member.
    pub fn range_by_score(&self, min: i64, max: i64) -> Vec<(M, i64)> {
        let mut hits: Vec<(M, i64)> = self
            .entries
            .iter()
            .filter_map(|e| {
                let score = e.value().load(Ordering::Acquire);
                (min..=max).contains(&score).then_some((*e.key(), score))
            })
            .collect();
        hits.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        hits
    }

    pub fn count_by_score(&self, min: i64, max: i64) -> usize {
        self.entries
            .iter()
            .filter(|e| (min..=max).contains(&e.value().load(Ordering::Acquire)))
            .count()
    }

    /// Intersect with a plain member set, ranked by score descending.
    ///
    /// Plain members carry no score of their own, so the max aggregate of
    /// each surviving member is its score in this set.
    pub fn intersect<I>(&self, members: I) -> Vec<(M, i64)>
    where
        I: IntoIterator<Item = M>,
    {
        let joined = members
            .into_iter()
            .filter_map(|m| self.score(&m).map(|s| (m, s)))
            .collect();
        rank_descending(joined)
    }

    fn snapshot(&self) -> Vec<(M, i64)> {
        self.entries
            .iter()
            .map(|e| (*e.key(), e.value().load(Ordering::Acquire)))
            .collect()
    }
}

impl<M> Default for SortedSet<M>
where
    M: Copy + Eq + Hash + Ord,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Highest score first, ties by member ascending.
pub fn rank_descending<M: Ord>(mut items: Vec<(M, i64)>) -> Vec<(M, i64)> {
    items.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    items
}
