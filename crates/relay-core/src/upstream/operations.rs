//! Catalog of proxied Beacon API operations.
//!
//! Each [`OperationKind`] pins an HTTP method and a path template. An [`Operation`] is one
//! concrete request: the rendered path plus the query string, body and `eth-*` headers that
//! are forwarded verbatim to every trusted node.

use bytes::Bytes;
use reqwest::Method;
use std::{collections::BTreeMap, fmt};
use thiserror::Error;

/// Proxied Beacon API operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    // node
    GetSyncingStatus,
    GetNodeVersion,
    // config
    GetSpec,
    GetDepositContract,
    GetForkSchedule,
    // beacon state
    GetStateFork,
    GetStateValidators,
    PostStateValidators,
    // beacon blocks
    PublishBlock,
    PublishBlockV2,
    PublishBlindedBlock,
    PublishBlindedBlockV2,
    // beacon pool
    SubmitPoolAttestations,
    SubmitPoolSyncCommitteeSignatures,
    // validator duties
    GetAttesterDuties,
    GetProposerDuties,
    GetSyncCommitteeDuties,
    // validator production
    ProduceBlockV2,
    ProduceBlockV3,
    ProduceBlindedBlock,
    ProduceAttestationData,
    GetAggregatedAttestation,
    ProduceSyncCommitteeContribution,
    // validator submissions
    PublishAggregateAndProofs,
    PublishContributionAndProofs,
    PrepareBeaconCommitteeSubnet,
    PrepareSyncCommitteeSubnets,
    SubmitBeaconCommitteeSelections,
    SubmitSyncCommitteeSelections,
    PrepareBeaconProposer,
    RegisterValidator,
    GetLiveness,
}

impl OperationKind {
    pub const ALL: [Self; 32] = [
        Self::GetSyncingStatus,
        Self::GetNodeVersion,
        Self::GetSpec,
        Self::GetDepositContract,
        Self::GetForkSchedule,
        Self::GetStateFork,
        Self::GetStateValidators,
        Self::PostStateValidators,
        Self::PublishBlock,
        Self::PublishBlockV2,
        Self::PublishBlindedBlock,
        Self::PublishBlindedBlockV2,
        Self::SubmitPoolAttestations,
        Self::SubmitPoolSyncCommitteeSignatures,
        Self::GetAttesterDuties,
        Self::GetProposerDuties,
        Self::GetSyncCommitteeDuties,
        Self::ProduceBlockV2,
        Self::ProduceBlockV3,
        Self::ProduceBlindedBlock,
        Self::ProduceAttestationData,
        Self::GetAggregatedAttestation,
        Self::ProduceSyncCommitteeContribution,
        Self::PublishAggregateAndProofs,
        Self::PublishContributionAndProofs,
        Self::PrepareBeaconCommitteeSubnet,
        Self::PrepareSyncCommitteeSubnets,
        Self::SubmitBeaconCommitteeSelections,
        Self::SubmitSyncCommitteeSelections,
        Self::PrepareBeaconProposer,
        Self::RegisterValidator,
        Self::GetLiveness,
    ];

    #[must_use]
    pub fn method(&self) -> Method {
        match self {
            Self::GetSyncingStatus |
            Self::GetNodeVersion |
            Self::GetSpec |
            Self::GetDepositContract |
            Self::GetForkSchedule |
            Self::GetStateFork |
            Self::GetStateValidators |
            Self::GetProposerDuties |
            Self::ProduceBlockV2 |
            Self::ProduceBlockV3 |
            Self::ProduceBlindedBlock |
            Self::ProduceAttestationData |
            Self::GetAggregatedAttestation |
            Self::ProduceSyncCommitteeContribution => Method::GET,
            _ => Method::POST,
        }
    }

    /// Path template with `{name}` placeholders.
    #[must_use]
    pub fn path_template(&self) -> &'static str {
        match self {
            Self::GetSyncingStatus => "/eth/v1/node/syncing",
            Self::GetNodeVersion => "/eth/v1/node/version",
            Self::GetSpec => "/eth/v1/config/spec",
            Self::GetDepositContract => "/eth/v1/config/deposit_contract",
            Self::GetForkSchedule => "/eth/v1/config/fork_schedule",
            Self::GetStateFork => "/eth/v1/beacon/states/{state_id}/fork",
            Self::GetStateValidators | Self::PostStateValidators => {
                "/eth/v1/beacon/states/{state_id}/validators"
            }
            Self::PublishBlock => "/eth/v1/beacon/blocks",
            Self::PublishBlockV2 => "/eth/v2/beacon/blocks",
            Self::PublishBlindedBlock => "/eth/v1/beacon/blinded_blocks",
            Self::PublishBlindedBlockV2 => "/eth/v2/beacon/blinded_blocks",
            Self::SubmitPoolAttestations => "/eth/v1/beacon/pool/attestations",
            Self::SubmitPoolSyncCommitteeSignatures => "/eth/v1/beacon/pool/sync_committees",
            Self::GetAttesterDuties => "/eth/v1/validator/duties/attester/{epoch}",
            Self::GetProposerDuties => "/eth/v1/validator/duties/proposer/{epoch}",
            Self::GetSyncCommitteeDuties => "/eth/v1/validator/duties/sync/{epoch}",
            Self::ProduceBlockV2 => "/eth/v2/validator/blocks/{slot}",
            Self::ProduceBlockV3 => "/eth/v3/validator/blocks/{slot}",
            Self::ProduceBlindedBlock => "/eth/v1/validator/blinded_blocks/{slot}",
            Self::ProduceAttestationData => "/eth/v1/validator/attestation_data",
            Self::GetAggregatedAttestation => "/eth/v1/validator/aggregate_attestation",
            Self::ProduceSyncCommitteeContribution => {
                "/eth/v1/validator/sync_committee_contribution"
            }
            Self::PublishAggregateAndProofs => "/eth/v1/validator/aggregate_and_proofs",
            Self::PublishContributionAndProofs => "/eth/v1/validator/contribution_and_proofs",
            Self::PrepareBeaconCommitteeSubnet => {
                "/eth/v1/validator/beacon_committee_subscriptions"
            }
            Self::PrepareSyncCommitteeSubnets => "/eth/v1/validator/sync_committee_subscriptions",
            Self::SubmitBeaconCommitteeSelections => {
                "/eth/v1/validator/beacon_committee_selections"
            }
            Self::SubmitSyncCommitteeSelections => "/eth/v1/validator/sync_committee_selections",
            Self::PrepareBeaconProposer => "/eth/v1/validator/prepare_beacon_proposer",
            Self::RegisterValidator => "/eth/v1/validator/register_validator",
            Self::GetLiveness => "/eth/v1/validator/liveness/{epoch}",
        }
    }

    /// Stable snake-case name used in logs and metric labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetSyncingStatus => "get_syncing_status",
            Self::GetNodeVersion => "get_node_version",
            Self::GetSpec => "get_spec",
            Self::GetDepositContract => "get_deposit_contract",
            Self::GetForkSchedule => "get_fork_schedule",
            Self::GetStateFork => "get_state_fork",
            Self::GetStateValidators => "get_state_validators",
            Self::PostStateValidators => "post_state_validators",
            Self::PublishBlock => "publish_block",
            Self::PublishBlockV2 => "publish_block_v2",
            Self::PublishBlindedBlock => "publish_blinded_block",
            Self::PublishBlindedBlockV2 => "publish_blinded_block_v2",
            Self::SubmitPoolAttestations => "submit_pool_attestations",
            Self::SubmitPoolSyncCommitteeSignatures => "submit_pool_sync_committee_signatures",
            Self::GetAttesterDuties => "get_attester_duties",
            Self::GetProposerDuties => "get_proposer_duties",
            Self::GetSyncCommitteeDuties => "get_sync_committee_duties",
            Self::ProduceBlockV2 => "produce_block_v2",
            Self::ProduceBlockV3 => "produce_block_v3",
            Self::ProduceBlindedBlock => "produce_blinded_block",
            Self::ProduceAttestationData => "produce_attestation_data",
            Self::GetAggregatedAttestation => "get_aggregated_attestation",
            Self::ProduceSyncCommitteeContribution => "produce_sync_committee_contribution",
            Self::PublishAggregateAndProofs => "publish_aggregate_and_proofs",
            Self::PublishContributionAndProofs => "publish_contribution_and_proofs",
            Self::PrepareBeaconCommitteeSubnet => "prepare_beacon_committee_subnet",
            Self::PrepareSyncCommitteeSubnets => "prepare_sync_committee_subnets",
            Self::SubmitBeaconCommitteeSelections => "submit_beacon_committee_selections",
            Self::SubmitSyncCommitteeSelections => "submit_sync_committee_selections",
            Self::PrepareBeaconProposer => "prepare_beacon_proposer",
            Self::RegisterValidator => "register_validator",
            Self::GetLiveness => "get_liveness",
        }
    }

    /// Names of the `{...}` placeholders in the path template, in order.
    pub fn path_params(&self) -> impl Iterator<Item = &'static str> {
        self.path_template().split('/').filter_map(|segment| {
            segment.strip_prefix('{').and_then(|rest| rest.strip_suffix('}'))
        })
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    #[error("{operation} expects {expected} path parameters, got {got}")]
    PathParams { operation: OperationKind, expected: usize, got: usize },

    #[error("path parameter {0:?} must be a non-empty single path segment")]
    InvalidParam(String),
}

/// One concrete proxied request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub kind: OperationKind,
    /// Rendered path, without query string.
    pub path: String,
    pub query: Option<String>,
    pub body: Option<Bytes>,
    /// Lowercased `eth-*` request headers, such as `eth-consensus-version`.
    pub headers: BTreeMap<String, String>,
}

impl Operation {
    /// Builds an operation by filling the path template of `kind` with `params` in order.
    ///
    /// # Errors
    /// Returns [`OperationError`] if the parameter count does not match the template or a
    /// parameter would escape its path segment.
    pub fn new(kind: OperationKind, params: &[&str]) -> Result<Self, OperationError> {
        let expected = kind.path_params().count();
        if expected != params.len() {
            let got = params.len();
            return Err(OperationError::PathParams { operation: kind, expected, got });
        }

        let mut values = params.iter();
        let mut path = String::with_capacity(kind.path_template().len() + 16);
        for segment in kind.path_template().split('/').skip(1) {
            path.push('/');
            if segment.starts_with('{') {
                let Some(value) = values.next() else {
                    return Err(OperationError::PathParams {
                        operation: kind,
                        expected,
                        got: params.len(),
                    });
                };
                if value.is_empty() || value.contains(|c| matches!(c, '/' | '?' | '#')) {
                    return Err(OperationError::InvalidParam((*value).to_string()));
                }
                path.push_str(value);
            } else {
                path.push_str(segment);
            }
        }

        Ok(Self { kind, path, query: None, body: None, headers: BTreeMap::new() })
    }

    /// Wraps an already rendered path, as received by the HTTP boundary.
    #[must_use]
    pub fn from_path(kind: OperationKind, path: impl Into<String>) -> Self {
        Self { kind, path: path.into(), query: None, body: None, headers: BTreeMap::new() }
    }

    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        let query = query.into();
        self.query = (!query.is_empty()).then_some(query);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.body = (!body.is_empty()).then_some(body);
        self
    }

    /// Adds a forwarded header. Only `eth-*` headers are kept.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        let name = name.to_ascii_lowercase();
        if name.starts_with("eth-") {
            self.headers.insert(name, value.into());
        }
        self
    }

    #[must_use]
    pub fn method(&self) -> Method {
        self.kind.method()
    }

    /// Path and query, relative to a node's base URL.
    #[must_use]
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{query}", self.path),
            None => self.path.clone(),
        }
    }
}
