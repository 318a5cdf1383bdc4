//! Scoped exclusive access to one infobase.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use crate::control::ClusterControl;
use crate::error::ClusterError;
use crate::types::LockRequest;

/// How a lease is taken.
#[derive(Debug, Clone)]
pub struct LeaseOptions {
  pub request: LockRequest,
  /// Pause between denying new sessions and terminating existing ones, so
  /// that scheduled jobs already running get to finish their current step.
  pub terminate_delay: Duration,
}

/// Exclusive access to one unit: sessions and scheduled jobs denied,
/// pre-existing sessions terminated.
///
/// Release it with [`release`](Self::release) or
/// [`release_quietly`](Self::release_quietly). A lease dropped without
/// either (a panic or a cancelled future) schedules the unlock on the
/// current runtime instead.
pub struct LockLease {
  cluster: Arc<dyn ClusterControl>,
  unit: String,
  released: bool,
}

impl LockLease {
  /// Lock `unit` and drop its sessions.
  ///
  /// When any step fails after the lock call was issued, an unlock is
  /// attempted before the error is returned; a failure of that unlock is
  /// logged and swallowed.
  #[instrument(name = "lease_acquire", skip_all, fields(unit = %unit))]
  pub async fn acquire(
    cluster: Arc<dyn ClusterControl>,
    unit: &str,
    options: &LeaseOptions,
  ) -> Result<Self, ClusterError> {
    let lease = Self {
      cluster,
      unit: unit.to_string(),
      released: false,
    };

    if let Err(e) = lease.cluster.lock(unit, &options.request).await {
      warn!(error = %e, "lock failed, attempting compensating unlock");
      lease.release_quietly().await;
      return Err(e);
    }
    debug!(delay = ?options.terminate_delay, "unit locked, waiting before terminating sessions");

    if !options.terminate_delay.is_zero() {
      tokio::time::sleep(options.terminate_delay).await;
    }

    match lease.cluster.terminate_sessions(unit).await {
      Ok(terminated) => {
        info!(terminated, "exclusive access acquired");
        Ok(lease)
      }
      Err(e) => {
        warn!(error = %e, "session termination failed, releasing lock");
        lease.release_quietly().await;
        Err(e)
      }
    }
  }

  pub fn unit(&self) -> &str {
    &self.unit
  }

  /// Unlock the unit, reporting failure.
  pub async fn release(mut self) -> Result<(), ClusterError> {
    self.released = true;
    let result = self.cluster.unlock(&self.unit).await;
    match &result {
      Ok(()) => info!(unit = %self.unit, "unit unlocked"),
      Err(e) => error!(unit = %self.unit, error = %e, "failed to unlock unit"),
    }
    result
  }

  /// Unlock the unit on a cleanup path. Failure is logged only.
  pub async fn release_quietly(self) {
    let _ = self.release().await;
  }
}

impl Drop for LockLease {
  fn drop(&mut self) {
    if self.released {
      return;
    }
    let unit = std::mem::take(&mut self.unit);
    let cluster = self.cluster.clone();
    warn!(unit = %unit, "lease dropped while held, scheduling unlock");
    match tokio::runtime::Handle::try_current() {
      Ok(handle) => {
        handle.spawn(async move {
          if let Err(e) = cluster.unlock(&unit).await {
            error!(unit = %unit, error = %e, "failed to unlock unit after abandoned lease");
          }
        });
      }
      Err(_) => error!(unit = %unit, "no runtime to unlock unit, it stays locked"),
    }
  }
}

/// Run `op` while holding exclusive access to `unit`.
///
/// The unit is unlocked on every exit path. When `op` fails, its error is
/// returned and an unlock failure is only logged. When `op` succeeds but the
/// unlock fails, the unlock error is returned: the unit may be left
/// inaccessible and the run must report it.
pub async fn with_exclusive_access<T, E, F, Fut>(
  cluster: Arc<dyn ClusterControl>,
  unit: &str,
  options: &LeaseOptions,
  op: F,
) -> Result<T, E>
where
  F: FnOnce() -> Fut,
  Fut: Future<Output = Result<T, E>>,
  E: From<ClusterError>,
{
  let lease = LockLease::acquire(cluster, unit, options).await?;
  match op().await {
    Ok(value) => {
      lease.release().await?;
      Ok(value)
    }
    Err(e) => {
      lease.release_quietly().await;
      Err(e)
    }
  }
}
