//! Automatic retry for optimistic-concurrency conflicts.
//!
//! Only [`Error::StaleState`](parley_core::Error::StaleState) is retried: it
//! signals a benign race, and re-running the operation re-reads the document
//! and re-validates the transition against whatever won.

use std::{future::Future, time::Duration};

use parley_core::Result;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total attempts, including the first.
  pub attempts:   u32,
  /// Delay before the first retry; doubled after each further conflict.
  pub base_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self { Self { attempts: 3, base_delay: Duration::from_millis(20) } }
}

pub async fn retry_on_stale<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T>>,
{
  let mut attempt = 0;
  loop {
    attempt += 1;
    match op().await {
      Err(err) if err.is_retryable() && attempt < policy.attempts => {
        let delay = policy.base_delay.saturating_mul(2u32.saturating_pow(attempt - 1));
        warn!(attempt, ?delay, error = %err, "stale write, retrying");
        tokio::time::sleep(delay).await;
      }
      outcome => return outcome,
    }
  }
}
