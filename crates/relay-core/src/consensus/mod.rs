//! Agreement across redundant beacon nodes.
//!
//! - [`race`]: concurrent calls with a grace window after the first success
//! - [`quorum`]: equality tallies and most-frequent-value selection
//! - [`trusted`]: strict-majority selection of the nodes allowed to serve traffic

pub mod quorum;
pub mod race;
pub mod trusted;

pub use quorum::{is_strict_majority, pick_consensus, ConsensusError, VoteGroup};
pub use race::{race_all, RaceError};
pub use trusted::{select_trusted, NodeSnapshot, Selection, SelectionOutcome};
