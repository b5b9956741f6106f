use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use dealwarden::{
    Address, ChainApi, ChainDealInfo, Cid, HeadChange, HeadChangeKind, HeadChanges, TokenAmount,
};
use smallvec::smallvec;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::mpsc;

const NOTIFY_BUFFER: usize = 64;

/// In-memory chain node.
///
/// Content ids are derived from blake3 hashes so the same payload always
/// imports to the same id. New deals start in state 0 until a test moves
/// them with [`set_state`](Self::set_state).
#[derive(Debug, Default)]
pub struct FakeChain {
    inner: Mutex<ChainState>,
}

#[derive(Debug, Default)]
struct ChainState {
    imports: Vec<(PathBuf, Vec<u8>)>,
    deals: HashMap<Cid, ChainDealInfo>,
    started: Vec<(Cid, String, String)>,
    rejected_providers: HashSet<String>,
    failing_info: HashSet<Cid>,
    stalled_info: HashSet<Cid>,
    fail_import: bool,
    fail_notify: bool,
    info_calls: usize,
    height: u64,
    nonce: u64,
    subscribers: Vec<mpsc::Sender<HeadChanges>>,
}

fn content_id(prefix: &str, bytes: &[u8]) -> Cid {
    let digest = blake3::hash(bytes);
    let hex = hex::encode(&digest.as_bytes()[..16]);
    // Only hex characters are appended, so the id is always well formed.
    Cid::try_from(format!("{prefix}{hex}")).unwrap_or_else(|_| unreachable!())
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ChainState> {
        // A panicking test thread poisons the lock; keep going with its data.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every proposal to `provider` fails from now on.
    pub fn reject_provider(&self, provider: &str) {
        self.state().rejected_providers.insert(provider.to_string());
    }

    pub fn fail_imports(&self) {
        self.state().fail_import = true;
    }

    pub fn fail_notify(&self) {
        self.state().fail_notify = true;
    }

    /// Make info queries for `proposal` fail (`true`) or succeed again.
    pub fn fail_info(&self, proposal: &Cid, failing: bool) {
        let mut state = self.state();
        if failing {
            state.failing_info.insert(proposal.clone());
        } else {
            state.failing_info.remove(proposal);
        }
    }

    /// Make info queries for `proposal` hang forever.
    pub fn stall_info(&self, proposal: &Cid) {
        self.state().stalled_info.insert(proposal.clone());
    }

    /// Move `proposal` to `state_id`, registering it if unknown.
    pub fn set_state(&self, proposal: &Cid, state_id: u64) {
        let mut state = self.state();
        state
            .deals
            .entry(proposal.clone())
            .or_insert_with(|| ChainDealInfo {
                proposal_cid: proposal.clone(),
                state: 0,
                provider: String::new(),
                piece_ref: Vec::new(),
                size: 0,
                price_per_epoch: TokenAmount::default(),
                duration: 0,
            })
            .state = state_id;
    }

    pub fn deal(&self, proposal: &Cid) -> Option<ChainDealInfo> {
        self.state().deals.get(proposal).cloned()
    }

    /// Number of `client_get_deal_info` calls so far, failed ones included.
    pub fn info_calls(&self) -> usize {
        self.state().info_calls
    }

    /// Payloads passed to `client_import`, with the path they were read from.
    pub fn imports(&self) -> Vec<(PathBuf, Vec<u8>)> {
        self.state().imports.clone()
    }

    /// `(proposal, client, provider)` for every accepted deal, in order.
    pub fn started_deals(&self) -> Vec<(Cid, String, String)> {
        self.state().started.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state().subscribers.iter().filter(|s| !s.is_closed()).count()
    }

    /// Advance the head by one and notify every subscriber.
    pub async fn tick(&self) {
        let (height, subscribers) = {
            let mut state = self.state();
            state.height += 1;
            state.subscribers.retain(|s| !s.is_closed());
            (state.height, state.subscribers.clone())
        };
        for tx in subscribers {
            let changes: HeadChanges = smallvec![HeadChange {
                kind: HeadChangeKind::Apply,
                height,
            }];
            let _ = tx.send(changes).await;
        }
    }

    /// Revert the current head and apply a replacement, as one coalesced
    /// notification.
    pub async fn reorg(&self) {
        let (height, subscribers) = {
            let mut state = self.state();
            state.subscribers.retain(|s| !s.is_closed());
            (state.height, state.subscribers.clone())
        };
        for tx in subscribers {
            let changes: HeadChanges = smallvec![
                HeadChange {
                    kind: HeadChangeKind::Revert,
                    height,
                },
                HeadChange {
                    kind: HeadChangeKind::Apply,
                    height,
                },
            ];
            let _ = tx.send(changes).await;
        }
    }

    /// Drop every notification subscription, ending the feeds.
    pub fn close_notifications(&self) {
        self.state().subscribers.clear();
    }
}

#[async_trait]
impl ChainApi for FakeChain {
    async fn client_import(&self, path: &Path) -> Result<Cid> {
        if self.state().fail_import {
            bail!("import refused by node");
        }
        let bytes = tokio::fs::read(path).await?;
        let cid = content_id("bafk", &bytes);
        self.state().imports.push((path.to_path_buf(), bytes));
        Ok(cid)
    }

    async fn client_start_deal(
        &self,
        data: &Cid,
        client: &Address,
        provider: &Address,
        price: &TokenAmount,
        duration: u64,
    ) -> Result<Cid> {
        let mut state = self.state();
        if state.rejected_providers.contains(provider.as_str()) {
            bail!("provider {provider} rejected the proposal");
        }

        state.nonce += 1;
        let seed = format!("{data}|{client}|{provider}|{price}|{duration}|{}", state.nonce);
        let proposal = content_id("bafyprop", seed.as_bytes());
        state.deals.insert(
            proposal.clone(),
            ChainDealInfo {
                proposal_cid: proposal.clone(),
                state: 0,
                provider: provider.to_string(),
                piece_ref: data.as_str().as_bytes().to_vec(),
                size: 0,
                price_per_epoch: price.clone(),
                duration,
            },
        );
        state
            .started
            .push((proposal.clone(), client.to_string(), provider.to_string()));
        Ok(proposal)
    }

    async fn client_get_deal_info(&self, proposal: &Cid) -> Result<ChainDealInfo> {
        let answer = {
            let mut state = self.state();
            state.info_calls += 1;
            if state.stalled_info.contains(proposal) {
                None
            } else if state.failing_info.contains(proposal) {
                Some(Err(anyhow!("node unavailable")))
            } else {
                Some(
                    state
                        .deals
                        .get(proposal)
                        .cloned()
                        .ok_or_else(|| anyhow!("deal {proposal} not found")),
                )
            }
        };
        match answer {
            Some(answer) => answer,
            None => std::future::pending().await,
        }
    }

    async fn chain_notify(&self) -> Result<mpsc::Receiver<HeadChanges>> {
        let mut state = self.state();
        if state.fail_notify {
            bail!("notify subscription refused");
        }
        let (tx, rx) = mpsc::channel(NOTIFY_BUFFER);
        state.subscribers.push(tx);
        Ok(rx)
    }
}
