use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ibkeeper_cluster::{ClusterControl, Designer, LeaseOptions, LockRequest};
use ibkeeper_command::{CommandExecutor, CommandSpec};
use ibkeeper_config::Settings;
use tokio_util::sync::CancellationToken;

use crate::error::OpsError;

/// What every unit task needs: settings, the cluster, a way to run
/// commands, and the run's cancellation token.
#[derive(Clone)]
pub struct OpsContext {
  pub settings: Arc<Settings>,
  pub cluster: Arc<dyn ClusterControl>,
  pub executor: Arc<dyn CommandExecutor>,
  pub cancel: CancellationToken,
}

impl OpsContext {
  pub fn new(
    settings: Arc<Settings>,
    cluster: Arc<dyn ClusterControl>,
    executor: Arc<dyn CommandExecutor>,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      settings,
      cluster,
      executor,
      cancel,
    }
  }

  /// Lease parameters from the cluster settings.
  pub fn lease_options(&self) -> LeaseOptions {
    let cluster = &self.settings.cluster;
    LeaseOptions {
      request: LockRequest {
        permission_code: cluster.permission_code.clone(),
        message: cluster.lock_message.clone(),
      },
      terminate_delay: cluster.terminate_delay(),
    }
  }

  /// Log file an operation on `unit` writes.
  pub fn command_log(&self, unit: &str, operation: &str) -> PathBuf {
    self
      .settings
      .backup
      .command_log_dir
      .join(format!("{}_{}.log", unit, operation))
  }

  /// Designer for `unit` logged in with the unit's credentials.
  pub fn designer(&self, unit: &str, operation: &str, timeout: Duration) -> Designer {
    let cluster = &self.settings.cluster;
    Designer::new(
      &cluster.platform_path,
      &cluster.server,
      unit,
      self.settings.credentials.for_unit(unit),
      self.command_log(unit, operation),
      timeout,
    )
  }

  pub async fn execute(&self, unit: &str, spec: &CommandSpec) -> Result<String, OpsError> {
    if self.cancel.is_cancelled() {
      return Err(OpsError::Cancelled);
    }
    let output = self.executor.execute(unit, spec, &self.cancel).await?;
    Ok(output.output)
  }

  /// Password for a database login, keyed by `user@host`.
  pub fn database_password(&self, user: &str, host: &str) -> Result<String, OpsError> {
    self
      .settings
      .credentials
      .database_password(user, host)
      .map(str::to_string)
      .ok_or_else(|| {
        OpsError::Configuration(format!("no database password registered for {}@{}", user, host))
      })
  }
}

/// Split a `host[:port]` database server into its parts.
pub(crate) fn split_host_port(server: &str) -> (&str, Option<&str>) {
  match server.rsplit_once(':') {
    Some((host, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
      (host, Some(port))
    }
    _ => (server, None),
  }
}
