//! Core value types shared by the proposer, the watcher and the executor.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Content-derived identifier.
///
/// Used for imported data, deal proposals and the deals a redo produces.
/// The textual form is opaque to this crate; it is only checked for being
/// non-empty and free of whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cid(String);

/// Identifier of a submitted deal proposal.
pub type ProposalId = Cid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CidError {
    #[error("cid is empty")]
    Empty,
    #[error("cid contains whitespace: {0:?}")]
    Whitespace(String),
}

impl Cid {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Cid {
    type Err = CidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(CidError::Empty);
        }
        if s.chars().any(char::is_whitespace) {
            return Err(CidError::Whitespace(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for Cid {
    type Error = CidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Cid> for String {
    fn from(cid: Cid) -> Self {
        cid.0
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Arbitrary-precision, non-negative token amount (attoFIL-style base units).
///
/// Serialized as a decimal string so that no JSON consumer truncates it.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TokenAmount(BigUint);

impl TokenAmount {
    pub fn new(value: BigUint) -> Self {
        Self(value)
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        Self(BigUint::from(value))
    }
}

impl FromStr for TokenAmount {
    type Err = num_bigint::ParseBigIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BigUint::from_str(s).map(Self)
    }
}

impl TryFrom<String> for TokenAmount {
    type Error = num_bigint::ParseBigIntError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TokenAmount> for String {
    fn from(amount: TokenAmount) -> Self {
        amount.0.to_string()
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One provider to propose a deal to, and the per-epoch price offered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealConfig {
    pub provider: String,
    pub epoch_price: TokenAmount,
}

impl DealConfig {
    pub fn new(provider: impl Into<String>, epoch_price: impl Into<TokenAmount>) -> Self {
        Self {
            provider: provider.into(),
            epoch_price: epoch_price.into(),
        }
    }
}

/// Known deal states, indexed by the numeric id the chain reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DealState {
    Unknown,
    ProposalNotFound,
    ProposalRejected,
    ProposalAccepted,
    Staged,
    Sealing,
    Active,
    Failing,
    NotFound,
    FundsEnsured,
    Validating,
    Transferring,
    WaitingForData,
    VerifyData,
    EnsureProviderFunds,
    EnsureClientFunds,
    ProviderFunding,
    ClientFunding,
    Publish,
    Publishing,
    Error,
    Completed,
}

const DEAL_STATES: [DealState; 22] = [
    DealState::Unknown,
    DealState::ProposalNotFound,
    DealState::ProposalRejected,
    DealState::ProposalAccepted,
    DealState::Staged,
    DealState::Sealing,
    DealState::Active,
    DealState::Failing,
    DealState::NotFound,
    DealState::FundsEnsured,
    DealState::Validating,
    DealState::Transferring,
    DealState::WaitingForData,
    DealState::VerifyData,
    DealState::EnsureProviderFunds,
    DealState::EnsureClientFunds,
    DealState::ProviderFunding,
    DealState::ClientFunding,
    DealState::Publish,
    DealState::Publishing,
    DealState::Error,
    DealState::Completed,
];

impl DealState {
    /// Maps a chain state id to a known state. Ids outside the table are `Unknown`.
    pub fn from_id(id: u64) -> Self {
        usize::try_from(id)
            .ok()
            .and_then(|idx| DEAL_STATES.get(idx).copied())
            .unwrap_or(DealState::Unknown)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DealState::Unknown => "Unknown",
            DealState::ProposalNotFound => "ProposalNotFound",
            DealState::ProposalRejected => "ProposalRejected",
            DealState::ProposalAccepted => "ProposalAccepted",
            DealState::Staged => "Staged",
            DealState::Sealing => "Sealing",
            DealState::Active => "Active",
            DealState::Failing => "Failing",
            DealState::NotFound => "NotFound",
            DealState::FundsEnsured => "FundsEnsured",
            DealState::Validating => "Validating",
            DealState::Transferring => "Transferring",
            DealState::WaitingForData => "WaitingForData",
            DealState::VerifyData => "VerifyData",
            DealState::EnsureProviderFunds => "EnsureProviderFunds",
            DealState::EnsureClientFunds => "EnsureClientFunds",
            DealState::ProviderFunding => "ProviderFunding",
            DealState::ClientFunding => "ClientFunding",
            DealState::Publish => "Publish",
            DealState::Publishing => "Publishing",
            DealState::Error => "Error",
            DealState::Completed => "Completed",
        }
    }

    /// No further transition is expected from a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DealState::ProposalRejected
                | DealState::Failing
                | DealState::Error
                | DealState::Completed
                | DealState::NotFound
        )
    }
}

impl fmt::Display for DealState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw deal record as returned by the chain client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainDealInfo {
    pub proposal_cid: Cid,
    pub state: u64,
    pub provider: String,
    pub piece_ref: Vec<u8>,
    pub size: u64,
    pub price_per_epoch: TokenAmount,
    pub duration: u64,
}

/// Immutable snapshot of a proposal's state at one observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealInfo {
    pub proposal_cid: Cid,
    pub state_id: u64,
    pub state_name: String,
    pub provider: String,
    pub piece_ref: Vec<u8>,
    pub size: u64,
    pub price_per_epoch: TokenAmount,
    pub duration: u64,
}

impl DealInfo {
    pub fn state(&self) -> DealState {
        DealState::from_id(self.state_id)
    }
}

impl From<ChainDealInfo> for DealInfo {
    fn from(info: ChainDealInfo) -> Self {
        Self {
            state_name: DealState::from_id(info.state).name().to_string(),
            proposal_cid: info.proposal_cid,
            state_id: info.state,
            provider: info.provider,
            piece_ref: info.piece_ref,
            size: info.size,
            price_per_epoch: info.price_per_epoch,
            duration: info.duration,
        }
    }
}

/// Kind of a single chain head change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadChangeKind {
    Apply,
    Revert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadChange {
    pub kind: HeadChangeKind,
    pub height: u64,
}

/// One coalesced notification. Usually holds one or two changes.
pub type HeadChanges = SmallVec<[HeadChange; 2]>;
