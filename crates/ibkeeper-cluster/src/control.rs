use async_trait::async_trait;
use ibkeeper_task::Worklist;
use tracing::info;

use crate::error::ClusterError;
use crate::types::{LockRequest, UnitInfo, UnitMetadata};

/// Cluster operations the run depends on.
///
/// Implementations may assume calls arrive one at a time when wrapped in a
/// [`SerialCluster`](crate::SerialCluster), except
/// [`unit_metadata`](Self::unit_metadata), which may run alongside them.
#[async_trait]
pub trait ClusterControl: Send + Sync {
  /// Names of every infobase registered in the cluster.
  async fn list_units(&self) -> Result<Vec<String>, ClusterError>;

  /// Deny new sessions and scheduled jobs and set the bypass code and
  /// message. Locking an already locked unit succeeds.
  async fn lock(&self, unit: &str, request: &LockRequest) -> Result<(), ClusterError>;

  /// Drop every session of the unit. Returns how many were terminated.
  async fn terminate_sessions(&self, unit: &str) -> Result<usize, ClusterError>;

  /// Clear the session and job denial set by [`lock`](Self::lock).
  async fn unlock(&self, unit: &str) -> Result<(), ClusterError>;

  async fn unit_info(&self, unit: &str) -> Result<UnitInfo, ClusterError>;

  /// Name and version of the configuration, read with the given login.
  ///
  /// Must not touch state shared with the other calls.
  async fn unit_metadata(
    &self,
    unit: &str,
    user: &str,
    password: &str,
  ) -> Result<UnitMetadata, ClusterError>;
}

/// Query the cluster once and apply the include/exclude policy.
pub async fn discover_worklist(
  cluster: &dyn ClusterControl,
  include: &[String],
  exclude: &[String],
) -> Result<Worklist, ClusterError> {
  let discovered = cluster.list_units().await?;
  let total = discovered.len();
  let worklist = Worklist::filter(discovered, include, exclude);
  info!(discovered = total, selected = worklist.len(), "worklist computed");
  Ok(worklist)
}
