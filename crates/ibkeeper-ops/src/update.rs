use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use ibkeeper_cluster::{UnitMetadata, with_exclusive_access};
use ibkeeper_command::{RetryBudget, run_with_retry};
use ibkeeper_task::{TaskKind, TaskResult, UnitTask, fields};
use tracing::{debug, info, instrument, warn};

use crate::context::OpsContext;
use crate::error::OpsError;

/// Update package file name inside a version directory.
pub const PACKAGE_FILE: &str = "1cv8.cfu";
/// Optional file naming the version a package leads to.
pub const TARGET_FILE: &str = "target.txt";

/// An update applicable to one configuration version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePackage {
  pub path: PathBuf,
  pub from_version: String,
  /// Version the package declares it leads to, when known.
  pub target_version: Option<String>,
}

/// Look up the package for `config_name` at `version`:
/// `<updates_dir>/<config_name>/<version>/1cv8.cfu`.
pub async fn find_package(
  updates_dir: &Path,
  config_name: &str,
  version: &str,
) -> Result<Option<UpdatePackage>, OpsError> {
  let dir = updates_dir.join(config_name).join(version);
  let path = dir.join(PACKAGE_FILE);
  match tokio::fs::metadata(&path).await {
    Ok(metadata) if metadata.is_file() => {}
    Ok(_) => return Ok(None),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
    Err(e) => return Err(OpsError::io(path, e)),
  }

  let target_path = dir.join(TARGET_FILE);
  let target_version = match tokio::fs::read_to_string(&target_path).await {
    Ok(content) => Some(content.trim().to_string()).filter(|v| !v.is_empty()),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
    Err(e) => return Err(OpsError::io(target_path, e)),
  };

  Ok(Some(UpdatePackage {
    path,
    from_version: version.to_string(),
    target_version,
  }))
}

/// Brings a unit's configuration up to date by applying packages one after
/// another.
///
/// After each package the version is read back; a package that leaves the
/// version unchanged stops the chain with a failure. The chain ends with
/// success when no package matches the current version, or after
/// `update.max_chain` packages.
pub struct UpdateTask {
  ctx: OpsContext,
}

impl UpdateTask {
  pub fn new(ctx: OpsContext) -> Self {
    Self { ctx }
  }

  async fn metadata(&self, unit: &str) -> Result<UnitMetadata, OpsError> {
    let credential = self.ctx.settings.credentials.for_unit(unit);
    Ok(
      self
        .ctx
        .cluster
        .unit_metadata(unit, &credential.user, &credential.password)
        .await?,
    )
  }

  async fn apply(&self, unit: &str, package: &UpdatePackage) -> Result<(), OpsError> {
    let settings = &self.ctx.settings.update;
    let spec = self
      .ctx
      .designer(unit, "update", settings.timeout())
      .update_configuration(&package.path);
    let budget = RetryBudget::new(settings.retries, settings.retry_delay());
    let ctx = &self.ctx;
    let spec = &spec;
    let options = ctx.lease_options();
    let options = &options;

    run_with_retry("update", budget, move |_| async move {
      with_exclusive_access(ctx.cluster.clone(), unit, options, || ctx.execute(unit, spec)).await
    })
    .await?;
    Ok(())
  }

  /// Returns the final version and the versions passed through.
  async fn update(&self, unit: &str) -> Result<(String, Vec<String>), OpsError> {
    let settings = &self.ctx.settings.update;
    let mut current = self.metadata(unit).await?;
    let mut applied = Vec::new();

    for step in 0..settings.max_chain {
      if self.ctx.cancel.is_cancelled() {
        return Err(OpsError::Cancelled);
      }
      let Some(package) =
        find_package(&settings.updates_dir, &current.config_name, &current.config_version).await?
      else {
        debug!(version = %current.config_version, "no update package applies");
        break;
      };

      info!(
        step,
        from = %package.from_version,
        to = package.target_version.as_deref().unwrap_or("?"),
        "applying update"
      );
      self.apply(unit, &package).await?;

      let after = self.metadata(unit).await?;
      if after.config_version == current.config_version {
        return Err(OpsError::NoProgress {
          version: after.config_version,
        });
      }
      if let Some(target) = &package.target_version
        && target != &after.config_version
      {
        warn!(expected = %target, actual = %after.config_version, "update reached an unexpected version");
      }
      applied.push(after.config_version.clone());
      current = after;
    }

    Ok((current.config_version, applied))
  }
}

#[async_trait]
impl UnitTask for UpdateTask {
  fn kind(&self) -> TaskKind {
    TaskKind::Update
  }

  #[instrument(name = "update", skip_all, fields(unit = %unit_id))]
  async fn run(&self, unit_id: &str) -> TaskResult {
    let started_at = Utc::now();
    match self.update(unit_id).await {
      Ok((version, applied)) => {
        let message = if applied.is_empty() {
          format!("up to date at {}", version)
        } else {
          format!("updated to {} via {} package(s)", version, applied.len())
        };
        info!(version = %version, applied = applied.len(), "update complete");
        TaskResult::success(unit_id, TaskKind::Update, message)
          .started_at(started_at)
          .with(fields::CONFIG_VERSION, version)
          .with(fields::APPLIED_VERSIONS, applied)
      }
      Err(e) => {
        warn!(error = %e, "update failed");
        TaskResult::failure(unit_id, TaskKind::Update, e.to_string()).started_at(started_at)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  use ibkeeper_cluster::{Dbms, MemoryCluster, UnitInfo};
  use ibkeeper_command::{CommandSpec, ScriptedExecutor};
  use ibkeeper_config::Settings;
  use tokio_util::sync::CancellationToken;

  fn write_package(root: &Path, from: &str, to: Option<&str>) {
    let dir = root.join("Accounting").join(from);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(PACKAGE_FILE), b"cfu").unwrap();
    if let Some(to) = to {
      std::fs::write(dir.join(TARGET_FILE), format!("{}\n", to)).unwrap();
    }
  }

  fn cluster(version: &str) -> Arc<MemoryCluster> {
    let cluster = MemoryCluster::new();
    cluster.add_unit(UnitInfo {
      name: "payroll".to_string(),
      dbms: Dbms::MsSqlServer,
      db_server: "db01".to_string(),
      db_name: "payroll".to_string(),
      db_user: "sa".to_string(),
    });
    cluster.set_metadata(
      "payroll",
      UnitMetadata {
        config_name: "Accounting".to_string(),
        config_version: version.to_string(),
      },
    );
    Arc::new(cluster)
  }

  /// Applying a package moves the unit to the version in its `target.txt`.
  fn applying(cluster: Arc<MemoryCluster>) -> ScriptedExecutor {
    ScriptedExecutor::new(move |unit, spec: &CommandSpec| {
      let package = spec
        .args
        .iter()
        .position(|a| a == "/UpdateCfg")
        .map(|i| PathBuf::from(&spec.args[i + 1]));
      if let Some(target) = package
        .and_then(|p| std::fs::read_to_string(p.with_file_name(TARGET_FILE)).ok())
      {
        cluster.set_metadata(
          unit,
          UnitMetadata {
            config_name: "Accounting".to_string(),
            config_version: target.trim().to_string(),
          },
        );
      }
      Ok(String::new())
    })
  }

  fn context(updates: &Path, cluster: Arc<MemoryCluster>, executor: Arc<ScriptedExecutor>) -> OpsContext {
    let mut settings = Settings::default();
    settings.update.updates_dir = updates.to_path_buf();
    settings.update.retry_delay_secs = 0;
    settings.cluster.terminate_delay_secs = 0;
    OpsContext::new(Arc::new(settings), cluster, executor, CancellationToken::new())
  }

  #[tokio::test]
  async fn test_find_package() {
    let updates = tempfile::tempdir().unwrap();
    write_package(updates.path(), "3.0.1", Some("3.0.2"));

    let package = find_package(updates.path(), "Accounting", "3.0.1")
      .await
      .unwrap()
      .unwrap();
    assert_eq!(package.target_version.as_deref(), Some("3.0.2"));
    assert!(
      find_package(updates.path(), "Accounting", "3.0.2")
        .await
        .unwrap()
        .is_none()
    );
  }

  #[tokio::test]
  async fn test_chain_applies_until_no_package() {
    let updates = tempfile::tempdir().unwrap();
    write_package(updates.path(), "3.0.1", Some("3.0.2"));
    write_package(updates.path(), "3.0.2", Some("3.0.3"));

    let cluster = cluster("3.0.1");
    let executor = Arc::new(applying(cluster.clone()));
    let task = UpdateTask::new(context(updates.path(), cluster.clone(), executor.clone()));
    let result = task.run("payroll").await;

    assert!(result.succeeded, "{}", result.message);
    assert_eq!(result.extra_str(fields::CONFIG_VERSION), Some("3.0.3"));
    assert_eq!(executor.calls().len(), 2);
    let state = cluster.state("payroll").unwrap();
    assert_eq!(state.lock_calls, 2);
    assert_eq!(state.unlock_calls, 2);
  }

  #[tokio::test]
  async fn test_no_op_update_stops_chain() {
    let updates = tempfile::tempdir().unwrap();
    write_package(updates.path(), "3.0.1", None);

    let cluster = cluster("3.0.1");
    let executor = Arc::new(applying(cluster.clone()));
    let task = UpdateTask::new(context(updates.path(), cluster.clone(), executor.clone()));
    let result = task.run("payroll").await;

    assert!(!result.succeeded);
    assert!(result.message.starts_with("update did not change version"));
    assert_eq!(executor.calls().len(), 1);
    assert!(!cluster.state("payroll").unwrap().sessions_deny);
  }

  #[tokio::test]
  async fn test_up_to_date_unit() {
    let updates = tempfile::tempdir().unwrap();
    let cluster = cluster("3.0.9");
    let executor = Arc::new(applying(cluster.clone()));
    let task = UpdateTask::new(context(updates.path(), cluster.clone(), executor.clone()));
    let result = task.run("payroll").await;

    assert!(result.succeeded);
    assert_eq!(result.message, "up to date at 3.0.9");
    assert_eq!(cluster.state("payroll").unwrap().lock_calls, 0);
  }

  #[tokio::test]
  async fn test_chain_bounded() {
    let updates = tempfile::tempdir().unwrap();
    // A cycle: 1 -> 2 -> 1 -> ...
    write_package(updates.path(), "1", Some("2"));
    write_package(updates.path(), "2", Some("1"));

    let cluster = cluster("1");
    let executor = Arc::new(applying(cluster.clone()));
    let task = UpdateTask::new(context(updates.path(), cluster, executor.clone()));
    let result = task.run("payroll").await;

    assert!(result.succeeded);
    assert_eq!(executor.calls().len(), 10);
  }
}
