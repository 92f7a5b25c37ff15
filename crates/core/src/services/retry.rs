//! Retrying block fetcher.
//!
//! Chain fetches are the only retried operation in the pipeline. The
//! policy is deliberately dumb: fixed delay, infinite retries, never skip
//! a block. A node outage therefore stalls the loop instead of leaving a
//! gap in the indexed data.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::metrics::record_fetch_retry;
use crate::models::Block;
use crate::ports::ChainClient;

/// Fixed delay between fetch attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(12);

/// Clock seam for the retry loop.
///
/// Production uses [`TokioSleeper`]; tests inject a recording fake so the
/// retry behavior is observable without waiting wall-clock time.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by the tokio timer.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Fetch states, kept explicit so the transition rules are in one place.
enum FetchState {
    Fetching,
    BackingOff,
}

/// Fetches a block, retrying indefinitely on any chain error.
///
/// Cancellation-safe: callers wrap this in `select!` with their shutdown
/// signal.
pub async fn fetch_with_retry(
    client: &dyn ChainClient,
    sleeper: &dyn Sleeper,
    number: u64,
    delay: Duration,
) -> Block {
    let mut state = FetchState::Fetching;
    let mut attempt = 0u32;
    loop {
        state = match state {
            FetchState::Fetching => match client.get_block(number).await {
                Ok(block) => return block,
                Err(e) => {
                    attempt += 1;
                    record_fetch_retry();
                    warn!(
                        block = number,
                        attempt,
                        retry_in_s = delay.as_secs(),
                        error = %e,
                        "⚠️  Block fetch failed, retrying..."
                    );
                    FetchState::BackingOff
                }
            },
            FetchState::BackingOff => {
                sleeper.sleep(delay).await;
                FetchState::Fetching
            }
        };
    }
}
