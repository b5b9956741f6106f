//! # Deal Lifecycle Demo
//!
//! Proposes a file to a handful of providers, watches the proposals move
//! through the deal states, then repairs two of them with the executor.
//! Everything runs against the in-memory chain from `dealwarden-testing`.
//!
//! Run with `RUST_LOG=dealwarden=debug` to see what the library logs.

use anyhow::Result;
use chrono::{DateTime, Utc};
use dealwarden::{
    CancelSignal, DealConfig, DealExecutor, DealModule, DealTrigger, DealsConfig, ExecutorConfig,
    MemoryLogStore, TriggerHub,
};
use dealwarden_testing::{id_address, wait_until, FakeChain, ScriptedRedoer};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const WALLET: &str = "f0100";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let chain = Arc::new(FakeChain::new());
    let repo = tempfile::tempdir()?;

    // ========================================================================
    // Store: one upload, several providers
    // ========================================================================

    chain.reject_provider(&id_address(1002));
    let module = DealModule::new(chain.clone(), DealsConfig::from_repo_path(repo.path())?)?;

    let configs = vec![
        DealConfig::new(id_address(1000), 500u64),
        DealConfig::new(id_address(1001), 450u64),
        DealConfig::new(id_address(1002), 400u64),
        DealConfig::new("not-a-provider", 1u64),
    ];
    let outcome = module
        .store(WALLET, &b"the quick brown fox"[..], &configs, 1_000)
        .await?;

    println!("Proposed {} deals", outcome.proposals.len());
    for failed in &outcome.failed {
        println!("  failed: provider {}", failed.provider);
    }

    // ========================================================================
    // Watch: follow the proposals across a few heads
    // ========================================================================

    let cancel = CancelSignal::new();
    let mut changes = module.watch(cancel.clone(), outcome.proposals.clone()).await?;
    let printer = tokio::spawn(async move {
        while let Some(info) = changes.recv().await {
            println!("  {} -> {}", info.proposal_cid, info.state_name);
        }
    });

    for state in [3, 5, 6] {
        for proposal in &outcome.proposals {
            chain.set_state(proposal, state);
        }
        chain.tick().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    cancel.cancel();
    printer.await?;

    // ========================================================================
    // Repair: redo flagged deals and read back the audit log
    // ========================================================================

    let hub = Arc::new(TriggerHub::new(8));
    let redoer = Arc::new(ScriptedRedoer::new());
    if let Some(second) = outcome.proposals.get(1) {
        redoer.fail_on(second);
    }
    let log = Arc::new(MemoryLogStore::new());
    let executor = Arc::new(DealExecutor::new(
        hub.clone(),
        redoer,
        log.clone(),
        ExecutorConfig::default(),
    ));

    let task = tokio::spawn({
        let executor = executor.clone();
        async move { executor.start(0).await }
    });
    let probe = hub.clone();
    wait_until(Duration::from_secs(1), || probe.listener_count() == 1).await;

    for proposal in &outcome.proposals {
        hub.publish(proposal.clone()).await?;
    }
    hub.close().await?;
    task.await??;

    println!("Executor log:");
    for entry in executor.get_log(DateTime::<Utc>::UNIX_EPOCH, 100).await? {
        match entry.result() {
            Some(new_deal) => println!("  #{} {} -> {}", entry.seq, entry.trigger, new_deal),
            None => println!(
                "  #{} {} failed: {}",
                entry.seq,
                entry.trigger,
                entry.error().unwrap_or_default()
            ),
        }
    }

    Ok(())
}

