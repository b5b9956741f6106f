//! Chain client interface consumed by [`DealModule`](crate::DealModule).

use crate::address::Address;
use crate::core::{ChainDealInfo, Cid, HeadChanges, TokenAmount};
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use tokio::sync::mpsc;

/// Full-node operations needed to propose and watch deals.
///
/// Implementations talk to a chain node; tests use an in-memory fake.
#[async_trait]
pub trait ChainApi: Send + Sync + 'static {
    /// Import a local file into the node, returning its content id.
    async fn client_import(&self, path: &Path) -> Result<Cid>;

    /// Propose a deal for `data` from `client` to `provider`.
    async fn client_start_deal(
        &self,
        data: &Cid,
        client: &Address,
        provider: &Address,
        price: &TokenAmount,
        duration: u64,
    ) -> Result<Cid>;

    /// Fetch the current state of a proposal.
    async fn client_get_deal_info(&self, proposal: &Cid) -> Result<ChainDealInfo>;

    /// Subscribe to head changes.
    ///
    /// Notifications are coalesced: one message may stand for several head
    /// changes and carries no guaranteed payload. The stream ends when the
    /// node drops the subscription.
    async fn chain_notify(&self) -> Result<mpsc::Receiver<HeadChanges>>;
}
