//! Retry wrapper for fallible operations.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

/// Classifies errors worth another attempt.
pub trait Retriable {
  fn is_retriable(&self) -> bool;
}

/// How many extra attempts an operation gets, and the pause between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
  /// Attempts beyond the first.
  pub retries: u32,
  pub delay: Duration,
}

impl RetryBudget {
  pub fn new(retries: u32, delay: Duration) -> Self {
    Self { retries, delay }
  }

  /// A single attempt.
  pub fn none() -> Self {
    Self::new(0, Duration::ZERO)
  }

  /// Total number of attempts allowed.
  pub fn attempts(&self) -> u32 {
    self.retries.saturating_add(1)
  }
}

/// Run `op` until it succeeds, fails with a non-retriable error, or the
/// budget is spent. `op` receives the 1-based attempt number. The error of
/// the last attempt is returned.
pub async fn run_with_retry<T, E, F, Fut>(
  operation: &str,
  budget: RetryBudget,
  mut op: F,
) -> Result<T, E>
where
  F: FnMut(u32) -> Fut,
  Fut: Future<Output = Result<T, E>>,
  E: Retriable + fmt::Display,
{
  let attempts = budget.attempts();
  let mut attempt = 1;

  loop {
    match op(attempt).await {
      Ok(value) => {
        if attempt > 1 {
          info!(operation, attempt, "operation succeeded after retry");
        }
        return Ok(value);
      }
      Err(e) if attempt < attempts && e.is_retriable() => {
        warn!(operation, attempt, attempts, error = %e, "attempt failed, retrying");
        if !budget.delay.is_zero() {
          tokio::time::sleep(budget.delay).await;
        }
        attempt += 1;
      }
      Err(e) => return Err(e),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};

  #[derive(Debug)]
  struct Flaky {
    retriable: bool,
  }

  impl fmt::Display for Flaky {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "flaky (retriable: {})", self.retriable)
    }
  }

  impl Retriable for Flaky {
    fn is_retriable(&self) -> bool {
      self.retriable
    }
  }

  #[tokio::test]
  async fn test_exhausts_budget() {
    for retries in [0u32, 1, 3] {
      let calls = AtomicU32::new(0);
      let counter = &calls;
      let result: Result<(), Flaky> =
        run_with_retry("op", RetryBudget::new(retries, Duration::ZERO), move |_| async move {
          counter.fetch_add(1, Ordering::SeqCst);
          Err(Flaky { retriable: true })
        })
        .await;

      assert!(result.is_err());
      assert_eq!(calls.load(Ordering::SeqCst), retries + 1);
    }
  }

  #[tokio::test]
  async fn test_non_retriable_stops_immediately() {
    let calls = AtomicU32::new(0);
    let counter = &calls;
    let result: Result<(), Flaky> =
      run_with_retry("op", RetryBudget::new(5, Duration::ZERO), move |_| async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(Flaky { retriable: false })
      })
      .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_succeeds_on_later_attempt() {
    let result: Result<u32, Flaky> =
      run_with_retry("op", RetryBudget::new(3, Duration::ZERO), |attempt| async move {
        if attempt < 3 {
          Err(Flaky { retriable: true })
        } else {
          Ok(attempt)
        }
      })
      .await;

    assert_eq!(result.unwrap(), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_waits_between_attempts() {
    let start = tokio::time::Instant::now();
    let _: Result<(), Flaky> =
      run_with_retry("op", RetryBudget::new(2, Duration::from_secs(30)), |_| async {
        Err(Flaky { retriable: true })
      })
      .await;

    assert!(start.elapsed() >= Duration::from_secs(60));
  }
}
