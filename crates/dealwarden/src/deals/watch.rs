use super::DealModule;
use crate::api::ChainApi;
use crate::cancel::CancelSignal;
use crate::core::{ChainDealInfo, Cid, DealInfo, HeadChangeKind, HeadChanges};
use crate::error::{DealError, Result};
use anyhow::anyhow;
use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

impl DealModule {
    /// Stream state changes of `proposals` until `cancel` fires or the chain
    /// notification feed closes.
    ///
    /// Every head change re-fetches each proposal. An event is emitted the
    /// first time a proposal is seen and whenever its state id changes.
    /// Delivery is lossy: an event the consumer does not take within the
    /// configured write timeout is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`DealError::Subscribe`] if the notification feed can't be
    /// opened. Nothing is spawned in that case.
    pub async fn watch(
        &self,
        cancel: CancelSignal,
        proposals: Vec<Cid>,
    ) -> Result<mpsc::Receiver<DealInfo>> {
        let notifications = self
            .api
            .chain_notify()
            .await
            .map_err(DealError::Subscribe)?;

        let mut seen = HashSet::with_capacity(proposals.len());
        let proposals: Vec<Cid> = proposals
            .into_iter()
            .filter(|p| seen.insert(p.clone()))
            .collect();

        let (tx, rx) = mpsc::channel(self.cfg.channel_capacity);
        let session = WatchSession {
            api: Arc::clone(&self.api),
            proposals,
            current: HashMap::new(),
            tx,
            cancel,
            write_timeout: self.cfg.write_timeout,
            fetch_timeout: self.cfg.fetch_timeout,
        };
        tokio::spawn(session.run(notifications));

        Ok(rx)
    }
}

enum Delivery {
    Sent,
    Dropped,
    Cancelled,
    Closed,
}

/// State owned by one watch task. Nothing outside the task can reach it.
struct WatchSession {
    api: Arc<dyn ChainApi>,
    proposals: Vec<Cid>,
    current: HashMap<Cid, DealInfo>,
    tx: mpsc::Sender<DealInfo>,
    cancel: CancelSignal,
    write_timeout: Duration,
    fetch_timeout: Option<Duration>,
}

impl WatchSession {
    async fn run(mut self, mut notifications: mpsc::Receiver<HeadChanges>) {
        debug!(proposals = self.proposals.len(), "watch session started");
        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("watch session cancelled");
                    break;
                }
                changes = notifications.recv() => match changes {
                    Some(changes) => {
                        let reverts = changes
                            .iter()
                            .filter(|c| c.kind == HeadChangeKind::Revert)
                            .count();
                        trace!(
                            changes = changes.len(),
                            reverts,
                            height = ?changes.last().map(|c| c.height),
                            "head changed"
                        );
                        if self.push_new_changes().await.is_break() {
                            break;
                        }
                    }
                    None => {
                        debug!("chain notifications closed");
                        break;
                    }
                },
            }
        }
        // Dropping the session drops `tx`, which ends the consumer's stream.
    }

    async fn push_new_changes(&mut self) -> ControlFlow<()> {
        for idx in 0..self.proposals.len() {
            if self.cancel.is_cancelled() {
                return ControlFlow::Break(());
            }
            let proposal = self.proposals[idx].clone();

            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return ControlFlow::Break(()),
                fetched = self.fetch(&proposal) => fetched,
            };
            let info = match fetched {
                Ok(raw) => DealInfo::from(raw),
                Err(e) => {
                    error!(%proposal, error = %e, "error when getting deal proposal info");
                    continue;
                }
            };

            let changed = self
                .current
                .get(&proposal)
                .map_or(true, |prev| prev.state_id != info.state_id);
            self.current.insert(proposal.clone(), info.clone());
            if !changed {
                continue;
            }
            if info.state().is_terminal() {
                debug!(%proposal, state = %info.state_name, "proposal reached a terminal state");
            }

            match self.deliver(info).await {
                Delivery::Sent => trace!(%proposal, "state change delivered"),
                Delivery::Dropped => {
                    warn!(%proposal, "dropping new state since channel is blocked");
                }
                Delivery::Cancelled => return ControlFlow::Break(()),
                Delivery::Closed => {
                    debug!("watch consumer went away");
                    return ControlFlow::Break(());
                }
            }
        }
        ControlFlow::Continue(())
    }

    async fn fetch(&self, proposal: &Cid) -> anyhow::Result<ChainDealInfo> {
        let request = self.api.client_get_deal_info(proposal);
        let info = match self.fetch_timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| anyhow!("timed out after {limit:?}"))??,
            None => request.await?,
        };
        Ok(info)
    }

    async fn deliver(&self, info: DealInfo) -> Delivery {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Delivery::Cancelled,
            sent = tokio::time::timeout(self.write_timeout, self.tx.send(info)) => match sent {
                Ok(Ok(())) => Delivery::Sent,
                Ok(Err(_)) => Delivery::Closed,
                Err(_) => Delivery::Dropped,
            },
        }
    }
}
