//! Beacon node event topics and their decoded payloads.
//!
//! The Beacon API event stream multiplexes a closed set of topics. Each topic has a fixed
//! payload schema, modelled here as one variant of [`BeaconEvent`]. Decoding is done per
//! topic by [`BeaconEvent::decode`]; payloads are kept hashable so that identical events
//! delivered by different upstreams can be recognized and suppressed.

use crate::types::CanonicalJson;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Topics of `GET /eth/v1/events`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTopic {
    Head,
    Block,
    Attestation,
    VoluntaryExit,
    BlsToExecutionChange,
    FinalizedCheckpoint,
    ChainReorg,
    ContributionAndProof,
    LightClientFinalityUpdate,
    LightClientOptimisticUpdate,
    PayloadAttributes,
}

impl EventTopic {
    pub const ALL: [Self; 11] = [
        Self::Head,
        Self::Block,
        Self::Attestation,
        Self::VoluntaryExit,
        Self::BlsToExecutionChange,
        Self::FinalizedCheckpoint,
        Self::ChainReorg,
        Self::ContributionAndProof,
        Self::LightClientFinalityUpdate,
        Self::LightClientOptimisticUpdate,
        Self::PayloadAttributes,
    ];

    /// Topics every upstream is asked for by default.
    ///
    /// `bls_to_execution_change` disappeared from several clients after Capella and the
    /// light client topics are optional, so they are not subscribed unless configured.
    pub const DEFAULT_SUBSCRIBED: [Self; 8] = [
        Self::Head,
        Self::Block,
        Self::Attestation,
        Self::VoluntaryExit,
        Self::FinalizedCheckpoint,
        Self::ChainReorg,
        Self::ContributionAndProof,
        Self::PayloadAttributes,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Head => "head",
            Self::Block => "block",
            Self::Attestation => "attestation",
            Self::VoluntaryExit => "voluntary_exit",
            Self::BlsToExecutionChange => "bls_to_execution_change",
            Self::FinalizedCheckpoint => "finalized_checkpoint",
            Self::ChainReorg => "chain_reorg",
            Self::ContributionAndProof => "contribution_and_proof",
            Self::LightClientFinalityUpdate => "light_client_finality_update",
            Self::LightClientOptimisticUpdate => "light_client_optimistic_update",
            Self::PayloadAttributes => "payload_attributes",
        }
    }

    /// Parses a comma separated topic list such as `head,block`.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownTopic`] naming the first unrecognized entry.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, UnknownTopic> {
        let mut topics = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let topic = part.parse()?;
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        }
        Ok(topics)
    }
}

impl fmt::Display for EventTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event topic: {0}")]
pub struct UnknownTopic(pub String);

impl FromStr for EventTopic {
    type Err = UnknownTopic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| UnknownTopic(s.to_string()))
    }
}

/// Failure to decode an event payload for its declared topic.
#[derive(Debug, Error)]
#[error("failed to decode {topic} event: {source}")]
pub struct DecodeError {
    pub topic: EventTopic,
    #[source]
    pub source: serde_json::Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeadEvent {
    pub slot: String,
    pub block: String,
    pub state: String,
    pub epoch_transition: bool,
    pub previous_duty_dependent_root: String,
    pub current_duty_dependent_root: String,
    pub execution_optimistic: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockEvent {
    pub slot: String,
    pub block: String,
    pub execution_optimistic: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checkpoint {
    pub epoch: String,
    pub root: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttestationData {
    pub slot: String,
    pub index: String,
    pub beacon_block_root: String,
    pub source: Checkpoint,
    pub target: Checkpoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttestationEvent {
    pub aggregation_bits: String,
    pub signature: String,
    pub data: AttestationData,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoluntaryExitMessage {
    pub epoch: String,
    pub validator_index: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoluntaryExitEvent {
    pub message: VoluntaryExitMessage,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FinalizedCheckpointEvent {
    pub block: String,
    pub state: String,
    pub epoch: String,
    pub execution_optimistic: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainReorgEvent {
    pub slot: String,
    pub depth: String,
    pub old_head_block: String,
    pub new_head_block: String,
    pub old_head_state: String,
    pub new_head_state: String,
    pub epoch: String,
    pub execution_optimistic: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncCommitteeContribution {
    pub slot: String,
    pub beacon_block_root: String,
    pub subcommittee_index: String,
    pub aggregation_bits: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContributionAndProofMessage {
    pub aggregator_index: String,
    pub selection_proof: String,
    pub contribution: SyncCommitteeContribution,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContributionAndProofEvent {
    pub message: ContributionAndProofMessage,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Withdrawal {
    pub index: String,
    pub validator_index: String,
    pub address: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadAttributes {
    pub timestamp: String,
    pub prev_randao: String,
    pub suggested_fee_recipient: String,
    #[serde(default)]
    pub parent_beacon_block_root: Option<String>,
    #[serde(default)]
    pub withdrawals: Option<Vec<Withdrawal>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadAttributesData {
    pub proposal_slot: String,
    pub parent_block_root: String,
    pub parent_block_number: String,
    pub parent_block_hash: String,
    pub proposer_index: String,
    pub payload_attributes: PayloadAttributes,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadAttributesEvent {
    pub version: String,
    pub data: PayloadAttributesData,
}

/// A decoded event, tagged by topic.
///
/// Topics without a dedicated schema (light client updates, BLS changes) are carried as
/// canonical JSON so they still deduplicate by content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BeaconEvent {
    Head(HeadEvent),
    Block(BlockEvent),
    Attestation(AttestationEvent),
    VoluntaryExit(VoluntaryExitEvent),
    FinalizedCheckpoint(FinalizedCheckpointEvent),
    ChainReorg(ChainReorgEvent),
    ContributionAndProof(ContributionAndProofEvent),
    PayloadAttributes(PayloadAttributesEvent),
    Opaque(EventTopic, CanonicalJson),
}

impl BeaconEvent {
    /// Decodes `data` with the schema registered for `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when the payload does not match the topic's schema.
    pub fn decode(topic: EventTopic, data: &str) -> Result<Self, DecodeError> {
        let wrap = |source| DecodeError { topic, source };
        let event = match topic {
            EventTopic::Head => Self::Head(serde_json::from_str(data).map_err(wrap)?),
            EventTopic::Block => Self::Block(serde_json::from_str(data).map_err(wrap)?),
            EventTopic::Attestation => {
                Self::Attestation(serde_json::from_str(data).map_err(wrap)?)
            }
            EventTopic::VoluntaryExit => {
                Self::VoluntaryExit(serde_json::from_str(data).map_err(wrap)?)
            }
            EventTopic::FinalizedCheckpoint => {
                Self::FinalizedCheckpoint(serde_json::from_str(data).map_err(wrap)?)
            }
            EventTopic::ChainReorg => Self::ChainReorg(serde_json::from_str(data).map_err(wrap)?),
            EventTopic::ContributionAndProof => {
                Self::ContributionAndProof(serde_json::from_str(data).map_err(wrap)?)
            }
            EventTopic::PayloadAttributes => {
                Self::PayloadAttributes(serde_json::from_str(data).map_err(wrap)?)
            }
            EventTopic::BlsToExecutionChange |
            EventTopic::LightClientFinalityUpdate |
            EventTopic::LightClientOptimisticUpdate => {
                Self::Opaque(topic, serde_json::from_str(data).map_err(wrap)?)
            }
        };
        Ok(event)
    }

    #[must_use]
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::Head(_) => EventTopic::Head,
            Self::Block(_) => EventTopic::Block,
            Self::Attestation(_) => EventTopic::Attestation,
            Self::VoluntaryExit(_) => EventTopic::VoluntaryExit,
            Self::FinalizedCheckpoint(_) => EventTopic::FinalizedCheckpoint,
            Self::ChainReorg(_) => EventTopic::ChainReorg,
            Self::ContributionAndProof(_) => EventTopic::ContributionAndProof,
            Self::PayloadAttributes(_) => EventTopic::PayloadAttributes,
            Self::Opaque(topic, _) => *topic,
        }
    }
}
