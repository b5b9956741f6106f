//! Pluggable repair policy and repair action.

use crate::core::Cid;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifies one listener registered with a [`DealTrigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stream of flagged deal ids handed out by [`DealTrigger::listen`].
///
/// The stream ends when the trigger unregisters it or closes.
#[derive(Debug)]
pub struct TriggerStream {
    pub id: SubscriptionId,
    pub rx: mpsc::Receiver<Cid>,
}

impl TriggerStream {
    pub async fn recv(&mut self) -> Option<Cid> {
        self.rx.recv().await
    }
}

/// Inspects existing deals and flags those matching some policy
/// (expired, slashed, stalled, ...).
#[async_trait]
pub trait DealTrigger: Send + Sync + 'static {
    /// Start receiving flagged deal ids.
    async fn listen(&self) -> Result<TriggerStream>;

    /// Detach a stream obtained from [`listen`](Self::listen).
    async fn unregister(&self, id: SubscriptionId) -> Result<()>;

    /// Release everything. All outstanding streams end.
    async fn close(&self) -> Result<()>;
}

/// Re-executes a flagged deal in the network.
#[async_trait]
pub trait DealRedoer: Send + Sync + 'static {
    /// Re-establish or replace `deal`, returning the id of the new deal.
    async fn redo(&self, deal: &Cid) -> Result<Cid>;
}
