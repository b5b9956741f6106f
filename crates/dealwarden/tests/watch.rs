//! Deal state watching against an in-memory chain.

use dealwarden::{CancelSignal, Cid, DealError, DealInfo, DealModule, DealsConfig};
use dealwarden_testing::{wait_until, FakeChain};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const DEADLINE: Duration = Duration::from_secs(2);

fn cid(s: &str) -> Cid {
    s.parse().unwrap()
}

fn module_with(chain: &Arc<FakeChain>, cfg: DealsConfig) -> DealModule {
    DealModule::new(chain.clone(), cfg).unwrap()
}

fn module(chain: &Arc<FakeChain>) -> DealModule {
    module_with(chain, DealsConfig::new(std::env::temp_dir()))
}

/// Drain the watch stream into a vector until it closes.
fn collect(mut rx: mpsc::Receiver<DealInfo>) -> JoinHandle<Vec<DealInfo>> {
    tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(info) = rx.recv().await {
            seen.push(info);
        }
        seen
    })
}

/// Tick once and wait until the watcher has fetched `expected_calls` times in total.
async fn tick_and_settle(chain: &FakeChain, expected_calls: usize) {
    chain.tick().await;
    assert!(
        wait_until(DEADLINE, || chain.info_calls() >= expected_calls).await,
        "watcher did not fetch {expected_calls} times"
    );
    // Let the delivery that follows the last fetch finish.
    tokio::time::sleep(Duration::from_millis(20)).await;
}

// ============================================================================
// Transition detection
// ============================================================================

#[tokio::test]
async fn test_emits_first_sighting_and_state_changes_only() {
    let chain = Arc::new(FakeChain::new());
    let p = cid("bafyP");
    chain.set_state(&p, 0);

    let rx = module(&chain)
        .watch(CancelSignal::new(), vec![p.clone()])
        .await
        .unwrap();
    let events = collect(rx);

    for (tick, state) in [0u64, 0, 2, 2, 5].into_iter().enumerate() {
        chain.set_state(&p, state);
        tick_and_settle(&chain, tick + 1).await;
    }
    chain.close_notifications();

    let events = tokio::time::timeout(DEADLINE, events).await.unwrap().unwrap();
    let states: Vec<u64> = events.iter().map(|e| e.state_id).collect();
    assert_eq!(states, vec![0, 2, 5]);

    // Transitions after the first sighting carry the full snapshot.
    let transitions = &events[1..];
    assert_eq!(transitions.len(), 2);
    assert_eq!(transitions[0].state_name, "ProposalRejected");
    assert_eq!(transitions[1].state_name, "Sealing");
    assert!(transitions.iter().all(|e| e.proposal_cid == p));
}

#[tokio::test]
async fn test_unchanged_state_stays_silent_over_many_ticks() {
    let chain = Arc::new(FakeChain::new());
    let p = cid("bafyQuiet");
    chain.set_state(&p, 6);

    let rx = module(&chain)
        .watch(CancelSignal::new(), vec![p.clone()])
        .await
        .unwrap();
    let events = collect(rx);

    for tick in 1..=10 {
        tick_and_settle(&chain, tick).await;
    }
    chain.close_notifications();

    let events = tokio::time::timeout(DEADLINE, events).await.unwrap().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].state_name, "Active");
}

#[tokio::test]
async fn test_fetch_error_skips_only_that_proposal_for_the_tick() {
    let chain = Arc::new(FakeChain::new());
    let (a, b) = (cid("bafyA"), cid("bafyB"));
    chain.set_state(&a, 3);
    chain.set_state(&b, 3);
    chain.fail_info(&a, true);

    let rx = module(&chain)
        .watch(CancelSignal::new(), vec![a.clone(), b.clone()])
        .await
        .unwrap();
    let events = collect(rx);

    tick_and_settle(&chain, 2).await;
    chain.fail_info(&a, false);
    tick_and_settle(&chain, 4).await;
    chain.close_notifications();

    let events = tokio::time::timeout(DEADLINE, events).await.unwrap().unwrap();
    let order: Vec<&Cid> = events.iter().map(|e| &e.proposal_cid).collect();
    assert_eq!(order, vec![&b, &a]);
}

#[tokio::test]
async fn test_duplicate_ids_are_tracked_once() {
    let chain = Arc::new(FakeChain::new());
    let p = cid("bafyDup");
    chain.set_state(&p, 4);

    let rx = module(&chain)
        .watch(CancelSignal::new(), vec![p.clone(), p.clone(), p.clone()])
        .await
        .unwrap();
    let events = collect(rx);

    tick_and_settle(&chain, 1).await;
    chain.close_notifications();

    let events = tokio::time::timeout(DEADLINE, events).await.unwrap().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(chain.info_calls(), 1);
}

#[tokio::test]
async fn test_reorg_batch_refetches_once() {
    let chain = Arc::new(FakeChain::new());
    let p = cid("bafyReorg");
    chain.set_state(&p, 5);

    let rx = module(&chain)
        .watch(CancelSignal::new(), vec![p.clone()])
        .await
        .unwrap();
    let events = collect(rx);

    tick_and_settle(&chain, 1).await;
    chain.set_state(&p, 21);
    chain.reorg().await;
    assert!(wait_until(DEADLINE, || chain.info_calls() >= 2).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    chain.close_notifications();

    let events = tokio::time::timeout(DEADLINE, events).await.unwrap().unwrap();
    assert_eq!(chain.info_calls(), 2);
    let states: Vec<&str> = events.iter().map(|e| e.state_name.as_str()).collect();
    assert_eq!(states, vec!["Sealing", "Completed"]);
    assert!(events[1].state().is_terminal());
}

#[tokio::test]
async fn test_fetch_timeout_skips_stalled_proposal() {
    let chain = Arc::new(FakeChain::new());
    let (stuck, fine) = (cid("bafyStuck"), cid("bafyFine"));
    chain.set_state(&stuck, 1);
    chain.set_state(&fine, 6);
    chain.stall_info(&stuck);

    let cfg = DealsConfig::new(std::env::temp_dir()).with_fetch_timeout(Duration::from_millis(30));
    let rx = module_with(&chain, cfg)
        .watch(CancelSignal::new(), vec![stuck.clone(), fine.clone()])
        .await
        .unwrap();
    let events = collect(rx);

    tick_and_settle(&chain, 2).await;
    chain.close_notifications();

    let events = tokio::time::timeout(DEADLINE, events).await.unwrap().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].proposal_cid, fine);
}

// ============================================================================
// Lossy delivery
// ============================================================================

#[tokio::test]
async fn test_slow_consumer_loses_events_without_stalling_watcher() {
    let chain = Arc::new(FakeChain::new());
    let ids: Vec<Cid> = ["bafy1", "bafy2", "bafy3"].into_iter().map(cid).collect();
    for id in &ids {
        chain.set_state(id, 3);
    }

    let cfg = DealsConfig::new(std::env::temp_dir()).with_write_timeout(Duration::from_millis(30));
    let mut rx = module_with(&chain, cfg)
        .watch(CancelSignal::new(), ids.clone())
        .await
        .unwrap();

    // Nobody reads. The first event fills the slot; the rest time out.
    chain.tick().await;
    assert!(wait_until(DEADLINE, || chain.info_calls() >= 3).await);
    for id in &ids {
        chain.set_state(id, 4);
    }
    chain.tick().await;
    assert!(
        wait_until(DEADLINE, || chain.info_calls() >= 6).await,
        "watcher stalled behind the blocked consumer"
    );

    chain.close_notifications();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let mut received = Vec::new();
    while let Some(info) = tokio::time::timeout(DEADLINE, rx.recv()).await.unwrap() {
        received.push(info);
    }
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].proposal_cid, ids[0]);
    assert_eq!(received[0].state_id, 3);
}

// ============================================================================
// Termination
// ============================================================================

#[tokio::test]
async fn test_cancel_aborts_blocked_delivery() {
    let chain = Arc::new(FakeChain::new());
    let (a, b) = (cid("bafyA"), cid("bafyB"));
    chain.set_state(&a, 1);
    chain.set_state(&b, 1);

    let cfg = DealsConfig::new(std::env::temp_dir()).with_write_timeout(Duration::from_secs(30));
    let cancel = CancelSignal::new();
    let mut rx = module_with(&chain, cfg)
        .watch(cancel.clone(), vec![a.clone(), b.clone()])
        .await
        .unwrap();

    chain.tick().await;
    assert!(wait_until(DEADLINE, || chain.info_calls() >= 2).await);

    // The second delivery is now blocked on the full slot.
    cancel.cancel();

    let first = tokio::time::timeout(DEADLINE, rx.recv()).await.unwrap();
    assert_eq!(first.map(|e| e.proposal_cid), Some(a));
    let end = tokio::time::timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("cancel must not wait for the write timeout");
    assert!(end.is_none());
}

#[tokio::test]
async fn test_cancel_aborts_hanging_fetch() {
    let chain = Arc::new(FakeChain::new());
    let p = cid("bafyHang");
    chain.set_state(&p, 3);
    chain.stall_info(&p);

    let cancel = CancelSignal::new();
    let mut rx = module(&chain)
        .watch(cancel.clone(), vec![p])
        .await
        .unwrap();

    chain.tick().await;
    assert!(wait_until(DEADLINE, || chain.info_calls() >= 1).await);
    cancel.cancel();

    let end = tokio::time::timeout(DEADLINE, rx.recv())
        .await
        .expect("stream must close while a fetch hangs");
    assert!(end.is_none());
}

#[tokio::test]
async fn test_cancel_before_any_tick_closes_stream() {
    let chain = Arc::new(FakeChain::new());
    let cancel = CancelSignal::new();
    let mut rx = module(&chain)
        .watch(cancel.clone(), vec![cid("bafyX")])
        .await
        .unwrap();

    cancel.cancel();
    let end = tokio::time::timeout(DEADLINE, rx.recv()).await.unwrap();
    assert!(end.is_none());
    assert_eq!(chain.info_calls(), 0);
}

#[tokio::test]
async fn test_feed_closing_ends_stream() {
    let chain = Arc::new(FakeChain::new());
    let mut rx = module(&chain)
        .watch(CancelSignal::new(), vec![cid("bafyX")])
        .await
        .unwrap();

    chain.close_notifications();
    let end = tokio::time::timeout(DEADLINE, rx.recv()).await.unwrap();
    assert!(end.is_none());
}

#[tokio::test]
async fn test_subscription_failure_is_reported_immediately() {
    let chain = Arc::new(FakeChain::new());
    chain.fail_notify();

    let err = module(&chain)
        .watch(CancelSignal::new(), vec![cid("bafyX")])
        .await
        .unwrap_err();
    assert!(matches!(err, DealError::Subscribe(_)));
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let chain = Arc::new(FakeChain::new());
    let p = cid("bafyShared");
    chain.set_state(&p, 3);
    let module = module(&chain);

    let first = collect(module.watch(CancelSignal::new(), vec![p.clone()]).await.unwrap());
    let second = collect(module.watch(CancelSignal::new(), vec![p.clone()]).await.unwrap());
    assert_eq!(chain.subscriber_count(), 2);

    tick_and_settle(&chain, 2).await;
    chain.close_notifications();

    let first = tokio::time::timeout(DEADLINE, first).await.unwrap().unwrap();
    let second = tokio::time::timeout(DEADLINE, second).await.unwrap().unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
}
