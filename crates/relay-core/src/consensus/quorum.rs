//! Majority selection over equal values.
//!
//! All functions are stateless. Counting is O(n) with one `HashMap` lookup per value.

use ahash::RandomState;
use std::{collections::HashMap, hash::Hash};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConsensusError {
    /// There was nothing to vote on.
    #[error("no responses to pick from")]
    NoResponses,
}

/// One distinct value and how many times it was seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteGroup<T> {
    pub value: T,
    pub count: usize,
}

/// Groups equal values, preserving the order in which each distinct value first appeared.
pub fn tally<T, I>(values: I) -> Vec<VoteGroup<T>>
where
    T: Eq + Hash,
    I: IntoIterator<Item = T>,
{
    let mut positions: HashMap<u64, Vec<usize>, RandomState> = HashMap::default();
    let hasher = RandomState::new();
    let mut groups: Vec<VoteGroup<T>> = Vec::new();

    for value in values {
        let bucket = positions.entry(hasher.hash_one(&value)).or_default();
        if let Some(&index) = bucket.iter().find(|&&i| groups[i].value == value) {
            groups[index].count += 1;
        } else {
            bucket.push(groups.len());
            groups.push(VoteGroup { value, count: 1 });
        }
    }

    groups
}

/// Returns the most frequent value and its count.
///
/// Ties resolve to the value that appeared first in `values`.
///
/// # Errors
/// Returns [`ConsensusError::NoResponses`] if `values` is empty.
pub fn pick_consensus<T: Eq + Hash + Clone>(values: &[T]) -> Result<(T, usize), ConsensusError> {
    leader(tally(values.iter()))
        .map(|group| (group.value.clone(), group.count))
        .ok_or(ConsensusError::NoResponses)
}

/// Most frequent group, earliest first-seen on ties.
pub fn leader<T>(groups: Vec<VoteGroup<T>>) -> Option<VoteGroup<T>> {
    groups.into_iter().fold(None, |best, group| match best {
        Some(current) if current.count >= group.count => Some(current),
        _ => Some(group),
    })
}

/// Returns `true` when `count` out of `total` is a strict majority.
#[must_use]
pub fn is_strict_majority(count: usize, total: usize) -> bool {
    count.saturating_mul(2) > total
}
