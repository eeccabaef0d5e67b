//! Trusted-set selection.
//!
//! Given the latest health snapshot of every usable node, decides which nodes agree by strict
//! majority on chain identity (genesis) and on the active fork, and which of those are at the
//! highest observed head slot. Nodes on the losing side of a vote are excluded; a node leaves
//! the exclusion list only by landing in a later winning majority. Lagging nodes are dropped
//! from the result without being excluded.
//!
//! The function is pure: the caller owns the exclusion set and applies side effects (logging,
//! metrics) based on the returned [`Selection`].

use super::quorum::{is_strict_majority, leader, tally};
use crate::types::GenesisInfo;
use std::{collections::HashSet, hash::Hash};

/// Health data of one node, already validated as fresh and complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot<Id> {
    pub id: Id,
    pub genesis: GenesisInfo,
    pub fork_id: String,
    pub head_slot: u64,
}

/// Why the selection ended where it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// A majority was found on both votes.
    Selected,
    /// No node had complete fresh data.
    NoCandidates,
    /// Genesis vote had no strict majority; every known node was excluded.
    NoGenesisMajority,
    /// Fork vote had no strict majority; every known node was excluded.
    NoForkMajority,
}

/// Result of one trusted-set computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection<Id> {
    pub outcome: SelectionOutcome,
    /// Majority members at the highest head slot, in candidate order.
    pub trusted: Vec<Id>,
    /// Majority members behind the highest head slot.
    pub lagging: Vec<Id>,
    /// Nodes added to the exclusion set by this computation.
    pub newly_excluded: Vec<Id>,
    /// Previously excluded nodes that landed in the majority this time.
    pub readmitted: Vec<Id>,
    pub highest_head_slot: Option<u64>,
}

impl<Id> Selection<Id> {
    fn empty(outcome: SelectionOutcome, newly_excluded: Vec<Id>) -> Self {
        Self {
            outcome,
            trusted: Vec::new(),
            lagging: Vec::new(),
            newly_excluded,
            readmitted: Vec::new(),
            highest_head_slot: None,
        }
    }
}

/// Runs the two majority votes and the head-slot filter.
///
/// `known` lists every configured node; on a failed vote all of them are excluded.
/// `excluded` is updated in place.
pub fn select_trusted<Id>(
    candidates: Vec<NodeSnapshot<Id>>,
    known: &[Id],
    excluded: &mut HashSet<Id>,
) -> Selection<Id>
where
    Id: Clone + Eq + Hash,
{
    if candidates.is_empty() {
        return Selection::empty(SelectionOutcome::NoCandidates, Vec::new());
    }

    let mut newly_excluded = Vec::new();

    let by_genesis = |node: &NodeSnapshot<Id>| node.genesis.normalized();
    let Some(survivors) = majority_by(candidates, by_genesis, excluded, &mut newly_excluded) else {
        let all = exclude_all(known, excluded);
        return Selection::empty(SelectionOutcome::NoGenesisMajority, all);
    };

    let by_fork = |node: &NodeSnapshot<Id>| node.fork_id.clone();
    let Some(survivors) = majority_by(survivors, by_fork, excluded, &mut newly_excluded) else {
        let all = exclude_all(known, excluded);
        return Selection::empty(SelectionOutcome::NoForkMajority, all);
    };

    let readmitted: Vec<Id> = survivors
        .iter()
        .filter(|node| excluded.remove(&node.id))
        .map(|node| node.id.clone())
        .collect();

    let highest = survivors.iter().map(|node| node.head_slot).max();
    let (trusted, lagging): (Vec<_>, Vec<_>) =
        survivors.into_iter().partition(|node| Some(node.head_slot) >= highest);

    Selection {
        outcome: SelectionOutcome::Selected,
        trusted: trusted.into_iter().map(|node| node.id).collect(),
        lagging: lagging.into_iter().map(|node| node.id).collect(),
        newly_excluded,
        readmitted,
        highest_head_slot: highest,
    }
}

/// Keeps the nodes whose `key` won a strict majority and excludes the rest.
///
/// Returns `None` when no value reached a strict majority.
fn majority_by<Id, K, F>(
    nodes: Vec<NodeSnapshot<Id>>,
    key: F,
    excluded: &mut HashSet<Id>,
    newly_excluded: &mut Vec<Id>,
) -> Option<Vec<NodeSnapshot<Id>>>
where
    Id: Clone + Eq + Hash,
    K: Eq + Hash,
    F: Fn(&NodeSnapshot<Id>) -> K,
{
    let keys: Vec<K> = nodes.iter().map(&key).collect();
    let total = keys.len();
    let winner = leader(tally(keys.iter()))?;
    if !is_strict_majority(winner.count, total) {
        return None;
    }
    let winning_key = winner.value;

    let mut kept = Vec::with_capacity(winner.count);
    for (node, node_key) in nodes.into_iter().zip(keys.iter()) {
        if node_key == winning_key {
            kept.push(node);
        } else if excluded.insert(node.id.clone()) {
            newly_excluded.push(node.id);
        }
    }
    Some(kept)
}

fn exclude_all<Id: Clone + Eq + Hash>(known: &[Id], excluded: &mut HashSet<Id>) -> Vec<Id> {
    known.iter().filter(|id| excluded.insert((*id).clone())).cloned().collect()
}
