//! Trigger-driven deal repair.
//!
//! A [`DealExecutor`] drains flagged deal ids from a [`DealTrigger`], asks a
//! [`DealRedoer`] to repair each one and appends the outcome to a
//! [`LogStore`]. Ids are handled one at a time in arrival order, so the log
//! reflects exactly the order triggers were received, and a slow redo
//! backpressures the trigger.
//!
//! ```text
//! DealTrigger ──listen()──► TriggerStream
//!                               │ recv() one id
//!                               ▼
//!                         DealRedoer.redo()
//!                               │ Ok(new) / Err(e)
//!                               ▼
//!                        LogStore.append()  ──► get_log(since, limit)
//! ```

mod hub;
mod log;
mod trigger;

pub use hub::TriggerHub;
pub use log::{
    Direction, LogCursor, LogEntry, LogQuery, LogStore, MemoryLogStore, NewLogEntry, RedoOutcome,
};
pub use trigger::{DealRedoer, DealTrigger, SubscriptionId, TriggerStream};

use crate::cancel::CancelSignal;
use crate::config::ExecutorConfig;
use crate::core::Cid;
use crate::error::ExecutorError;
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Lifecycle of a [`DealExecutor`]. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutorState {
    Idle,
    Listening,
    Stopped,
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutorState::Idle => "idle",
            ExecutorState::Listening => "listening",
            ExecutorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Listens to a trigger and redoes the deals it flags.
pub struct DealExecutor {
    trigger: Arc<dyn DealTrigger>,
    redoer: Arc<dyn DealRedoer>,
    log: Arc<dyn LogStore>,
    cfg: ExecutorConfig,
    state: watch::Sender<ExecutorState>,
    stop: CancelSignal,
}

impl DealExecutor {
    pub fn new(
        trigger: Arc<dyn DealTrigger>,
        redoer: Arc<dyn DealRedoer>,
        log: Arc<dyn LogStore>,
        cfg: ExecutorConfig,
    ) -> Self {
        let (state, _) = watch::channel(ExecutorState::Idle);
        Self {
            trigger,
            redoer,
            log,
            cfg,
            state,
            stop: CancelSignal::new(),
        }
    }

    pub fn state(&self) -> ExecutorState {
        *self.state.borrow()
    }

    /// Handle for stopping the loop and observing its state from elsewhere.
    pub fn handle(&self) -> ExecutorHandle {
        ExecutorHandle {
            stop: self.stop.clone(),
            state: self.state.subscribe(),
        }
    }

    /// Listen to the trigger and redo every flagged deal until the trigger
    /// stream ends or [`ExecutorHandle::stop`] is called.
    ///
    /// `resume_height` is the chain height the caller last processed. It is
    /// only recorded; triggers decide themselves where to resume.
    ///
    /// # Errors
    ///
    /// Fails if the executor was started before, if the trigger can't be
    /// listened to, or if the log store can't be read at startup. A failed
    /// redo or a failed log append never ends the loop.
    pub async fn start(&self, resume_height: u64) -> Result<(), ExecutorError> {
        let claimed = self.state.send_if_modified(|state| {
            if *state == ExecutorState::Idle {
                *state = ExecutorState::Listening;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(ExecutorError::AlreadyStarted);
        }

        let result = self.run(resume_height).await;
        self.state.send_replace(ExecutorState::Stopped);
        result
    }

    async fn run(&self, resume_height: u64) -> Result<(), ExecutorError> {
        let mut last_timestamp = self
            .log
            .latest()
            .await
            .map_err(ExecutorError::Log)?
            .map(|entry| entry.timestamp);

        let mut stream = self.trigger.listen().await.map_err(ExecutorError::Listen)?;
        info!(resume_height, subscription = %stream.id, "deal executor listening");

        loop {
            let deal = tokio::select! {
                biased;
                _ = self.stop.cancelled() => {
                    info!("deal executor stopped");
                    break;
                }
                next = stream.recv() => match next {
                    Some(deal) => deal,
                    None => {
                        info!("deal trigger closed");
                        break;
                    }
                },
            };

            let outcome = self.redo(&deal).await;
            let timestamp = next_timestamp(last_timestamp, Utc::now());
            last_timestamp = Some(timestamp);
            self.record(deal, outcome, timestamp).await;
        }

        if let Err(e) = self.trigger.unregister(stream.id).await {
            debug!(subscription = %stream.id, error = %e, "unregistering trigger stream");
        }
        Ok(())
    }

    async fn redo(&self, deal: &Cid) -> RedoOutcome {
        let result = match self.cfg.redo_timeout {
            Some(limit) => tokio::time::timeout(limit, self.redoer.redo(deal))
                .await
                .unwrap_or_else(|_| Err(anyhow!("redo timed out after {limit:?}"))),
            None => self.redoer.redo(deal).await,
        };

        match result {
            Ok(new_deal) => {
                info!(%deal, %new_deal, "deal redone");
                RedoOutcome::Replaced { new_deal }
            }
            Err(e) => {
                error!(%deal, error = %e, "redo failed");
                RedoOutcome::Failed {
                    error: format!("{e:#}"),
                }
            }
        }
    }

    async fn record(&self, trigger: Cid, outcome: RedoOutcome, timestamp: DateTime<Utc>) {
        let entry = NewLogEntry {
            trigger,
            outcome,
            timestamp,
        };
        match self.log.append(entry.clone()).await {
            Ok(stored) => debug!(seq = stored.seq, trigger = %stored.trigger, "log entry added"),
            Err(e) => {
                error!(
                    trigger = %entry.trigger,
                    is_error = matches!(entry.outcome, RedoOutcome::Failed { .. }),
                    error = %e,
                    "error when adding log entry"
                );
            }
        }
    }

    /// Log entries with timestamp at or after `since` (or strictly after an
    /// entry cursor), oldest first, at most `limit` of them.
    ///
    /// A full page means there may be more: call again with the last
    /// entry's [`cursor`](LogEntry::cursor).
    pub async fn get_log(
        &self,
        since: impl Into<LogCursor>,
        limit: usize,
    ) -> Result<Vec<LogEntry>, ExecutorError> {
        self.log
            .range(LogQuery::ascending(Some(since.into()), limit))
            .await
            .map_err(ExecutorError::Log)
    }

    /// Newest entries first, starting at `before` (or the newest entry).
    pub async fn latest_log(
        &self,
        before: Option<LogCursor>,
        limit: usize,
    ) -> Result<Vec<LogEntry>, ExecutorError> {
        self.log
            .range(LogQuery::descending(before, limit))
            .await
            .map_err(ExecutorError::Log)
    }
}

/// Timestamps handed to the log never go backwards, even if the wall clock
/// does, so `(timestamp, seq)` order matches write order.
fn next_timestamp(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match last {
        Some(last) if last > now => {
            warn!(%last, %now, "clock went backwards, reusing last log timestamp");
            last
        }
        _ => now,
    }
}

/// Stops a running [`DealExecutor`] and observes its state.
#[derive(Debug, Clone)]
pub struct ExecutorHandle {
    stop: CancelSignal,
    state: watch::Receiver<ExecutorState>,
}

impl ExecutorHandle {
    /// Ask the loop to exit. A redo already in flight finishes and is logged.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn state(&self) -> ExecutorState {
        *self.state.borrow()
    }

    /// Wait until the executor reaches [`ExecutorState::Stopped`].
    pub async fn stopped(&mut self) {
        // Err means the executor itself was dropped, which also ends the loop.
        let _ = self
            .state
            .wait_for(|state| *state == ExecutorState::Stopped)
            .await;
    }
}
