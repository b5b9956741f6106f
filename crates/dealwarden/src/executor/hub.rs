use super::trigger::{DealTrigger, SubscriptionId, TriggerStream};
use crate::core::Cid;
use anyhow::{bail, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Fan-out [`DealTrigger`] that policies publish flagged ids into.
///
/// Every listener gets its own bounded queue. [`publish`](Self::publish)
/// waits for room in each queue, so a slow consumer slows the policy down
/// instead of losing ids.
#[derive(Debug)]
pub struct TriggerHub {
    listeners: DashMap<SubscriptionId, mpsc::Sender<Cid>>,
    capacity: usize,
    closed: AtomicBool,
}

impl TriggerHub {
    /// Create a hub whose listener queues hold `capacity` ids each.
    pub fn new(capacity: usize) -> Self {
        Self {
            listeners: DashMap::new(),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Deliver `deal` to every registered listener.
    ///
    /// Returns how many listeners received it. Listeners whose stream was
    /// dropped are forgotten.
    pub async fn publish(&self, deal: Cid) -> Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            bail!("trigger hub is closed");
        }

        // Clone the senders out so no map guard is held across an await.
        let targets: Vec<(SubscriptionId, mpsc::Sender<Cid>)> = self
            .listeners
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut delivered = 0;
        for (id, tx) in targets {
            if tx.send(deal.clone()).await.is_ok() {
                delivered += 1;
            } else {
                debug!(subscription = %id, "listener gone, removing");
                self.listeners.remove(&id);
            }
        }
        trace!(%deal, delivered, "published trigger");
        Ok(delivered)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for TriggerHub {
    fn default() -> Self {
        Self::new(16)
    }
}

#[async_trait]
impl DealTrigger for TriggerHub {
    async fn listen(&self) -> Result<TriggerStream> {
        if self.is_closed() {
            bail!("trigger hub is closed");
        }
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = SubscriptionId::new();
        self.listeners.insert(id, tx);
        debug!(subscription = %id, "listener registered");
        Ok(TriggerStream { id, rx })
    }

    async fn unregister(&self, id: SubscriptionId) -> Result<()> {
        if self.listeners.remove(&id).is_none() {
            bail!("unknown subscription {id}");
        }
        debug!(subscription = %id, "listener unregistered");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.listeners.clear();
        debug!("trigger hub closed");
        Ok(())
    }
}
