use anyhow::{bail, Result};
use async_trait::async_trait;
use dealwarden::{Cid, DealRedoer};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// [`DealRedoer`] that records every call.
///
/// A successful redo of `X` returns `X-redoN`, where `N` counts calls.
/// Ids registered with [`fail_on`](Self::fail_on) fail instead.
#[derive(Debug, Default)]
pub struct ScriptedRedoer {
    failing: Mutex<HashSet<Cid>>,
    calls: Mutex<Vec<Cid>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedRedoer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every redo.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn fail_on(&self, deal: &Cid) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(deal.clone());
    }

    /// Ids passed to `redo`, in call order.
    pub fn calls(&self) -> Vec<Cid> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Highest number of redo calls that ever overlapped.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DealRedoer for ScriptedRedoer {
    async fn redo(&self, deal: &Cid) -> Result<Cid> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let call = {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            calls.push(deal.clone());
            calls.len()
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failing = self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(deal);
        if failing {
            bail!("redo of {deal} rejected");
        }
        Ok(format!("{deal}-redo{call}").parse()?)
    }
}
