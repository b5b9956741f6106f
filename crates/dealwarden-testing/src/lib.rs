//! Testing utilities for dealwarden.
//!
//! - [`FakeChain`]: in-memory [`ChainApi`](dealwarden::ChainApi) with
//!   scriptable deal states, rejections and head-change ticks
//! - [`ScriptedRedoer`]: [`DealRedoer`](dealwarden::DealRedoer) that records
//!   calls and fails on demand
//! - [`wait_until`]: poll a condition with a deadline

mod chain;
mod redoer;

pub use chain::FakeChain;
pub use redoer::ScriptedRedoer;

use std::time::Duration;

/// Mainnet id address for `n`, e.g. `f01000`.
pub fn id_address(n: u64) -> String {
    format!("f0{n}")
}

/// Poll `cond` every few milliseconds until it holds or `deadline` passes.
///
/// Returns whether the condition was met.
pub async fn wait_until<F>(deadline: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = tokio::time::Instant::now();
    loop {
        if cond() {
            return true;
        }
        if start.elapsed() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
