//! Balance reading seam and the retry wrapper for external calls.
//!
//! The concrete reader lives outside this crate (RPC transport, archive node,
//! indexer). Everything network-facing in the planner goes through
//! [`with_retry`]: bounded attempts, exponential backoff, final attempt
//! surfaced raw.

use async_trait::async_trait;
use ethers::types::{Address, U256};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::RetryPolicy;
use crate::errors::BalanceError;
use crate::types::TokenInfo;

/// Current balance of a token for one wallet on one chain, optionally at a
/// pinned historical block.
#[async_trait]
pub trait BalanceReader: Send + Sync + std::fmt::Debug {
    async fn balance_of(
        &self,
        chain_id: u64,
        wallet: Address,
        token: &TokenInfo,
        block: Option<u64>,
    ) -> Result<U256, BalanceError>;
}

/// Run `call` with bounded retries and exponential backoff. The last attempt
/// runs without a catch so the caller sees the real error.
pub async fn with_retry<T, E, F, Fut>(label: &str, policy: &RetryPolicy, call: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = Duration::from_millis(policy.base_delay_ms);
    let max_delay = Duration::from_millis(policy.max_delay_ms);
    let attempts = policy.max_attempts.max(1);

    for attempt in 1..attempts {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(%label, attempt, error = %err, "external call failed, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(max_delay);
            }
        }
    }
    call().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy { max_attempts: 4, base_delay_ms: 10, max_delay_ms: 50 };
        let result: Result<u32, String> = with_retry("test", &policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn surfaces_last_error_after_exhaustion() {
        let policy = RetryPolicy { max_attempts: 3, base_delay_ms: 10, max_delay_ms: 50 };
        let result: Result<u32, String> =
            with_retry("test", &policy, || async { Err("down".to_string()) }).await;
        assert_eq!(result.unwrap_err(), "down");
    }
}
