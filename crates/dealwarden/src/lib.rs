//! # Dealwarden
//!
//! Storage deal lifecycle for a client of a decentralized storage network:
//! propose deals, watch their on-chain state, and repair deals a policy flags.
//!
//! ## Core Concepts
//!
//! Dealwarden has two independent halves:
//! - [`DealModule`] = proposing deals ([`DealModule::store`]) and watching
//!   their state ([`DealModule::watch`])
//! - [`DealExecutor`] = draining a [`DealTrigger`], redoing each flagged deal
//!   with a [`DealRedoer`] and recording the result in a [`LogStore`]
//!
//! The key principle: **partial failures never abort the batch**. One bad
//! provider, one failing state fetch or one failed redo is logged and
//! skipped; only broken preconditions surface as errors.
//!
//! ## Architecture
//!
//! ```text
//! client
//!   │ store(wallet, data, configs, duration)
//!   ▼
//! DealModule ──► ChainApi.client_import / client_start_deal
//!   │ proposals
//!   ▼ watch(cancel, proposals)
//! watch task ◄── ChainApi.chain_notify (coalesced head changes)
//!   │ per tick: client_get_deal_info for every proposal
//!   │ emit on first sighting or state change
//!   ▼ bounded send, dropped after write_timeout
//! mpsc::Receiver<DealInfo>
//!
//!
//! policy ──publish──► TriggerHub (DealTrigger)
//!                         │ one id at a time
//!                         ▼
//!                    DealExecutor ──► DealRedoer.redo()
//!                         │
//!                         ▼
//!                    LogStore.append() ──► get_log(since, limit)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Store accounts for every config** - `proposals + failed == configs`
//! 2. **Watch emits transitions only** - first sighting or a new state id
//! 3. **Watch never blocks forever** - undelivered events are dropped
//! 4. **Redo is strictly sequential** - log order equals trigger order
//! 5. **One log entry per trigger** - success links the new deal, failure
//!    carries the error
//!
//! ## Guarantees
//!
//! - **At-most-once watch delivery**: slow consumers miss state changes
//! - **In-memory watch state**: restarting a watch re-emits current states
//! - **Durable audit log**: when backed by a durable [`LogStore`]
//!
//! ## Example
//!
//! ```ignore
//! use dealwarden::{CancelSignal, DealConfig, DealModule, DealsConfig};
//!
//! let module = DealModule::new(api, DealsConfig::from_repo_path(repo)?)?;
//! let outcome = module
//!     .store(wallet, file, &[DealConfig::new("f01000", 500u64)], 1_000)
//!     .await?;
//!
//! let cancel = CancelSignal::new();
//! let mut changes = module.watch(cancel.clone(), outcome.proposals).await?;
//! while let Some(info) = changes.recv().await {
//!     println!("{} is now {}", info.proposal_cid, info.state_name);
//! }
//! ```

mod address;
mod api;
mod cancel;
mod config;
mod core;
mod deals;
mod error;
mod executor;

pub use crate::address::{Address, AddressError, Network, Protocol};
pub use crate::api::ChainApi;
pub use crate::cancel::CancelSignal;
pub use crate::config::{DealsConfig, ExecutorConfig, DEFAULT_WRITE_TIMEOUT};
pub use crate::core::{
    ChainDealInfo, Cid, CidError, DealConfig, DealInfo, DealState, HeadChange, HeadChangeKind,
    HeadChanges, ProposalId, TokenAmount,
};
pub use crate::deals::{DealModule, StoreOutcome};
pub use crate::error::{ConfigError, DealError, ExecutorError, Result};
pub use crate::executor::{
    DealExecutor, DealRedoer, DealTrigger, Direction, ExecutorHandle, ExecutorState, LogCursor,
    LogEntry, LogQuery, LogStore, MemoryLogStore, NewLogEntry, RedoOutcome, SubscriptionId,
    TriggerHub, TriggerStream,
};

// Re-export commonly used external types
pub use async_trait::async_trait;
