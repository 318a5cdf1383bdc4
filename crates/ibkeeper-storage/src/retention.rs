//! Deletion of expired backup artifacts.
//!
//! Every pass keeps going past a failed deletion: the failure is logged and
//! counted, the remaining candidates are still processed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ibkeeper_task::{TaskKind, TaskResult, UnitTask, fields};
use tracing::{debug, info, instrument, warn};

use crate::artifact;
use crate::error::StorageError;
use crate::store::ObjectStore;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// What one rotation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationReport {
  /// Paths or keys deleted.
  pub deleted: Vec<String>,
  /// Deletions that failed.
  pub failed: usize,
}

impl RotationReport {
  fn merge(&mut self, other: RotationReport) {
    self.deleted.extend(other.deleted);
    self.failed += other.failed;
  }
}

/// Point in time before which artifacts are expired.
pub fn cutoff(now: SystemTime, retention_days: u32) -> SystemTime {
  DAY
    .checked_mul(retention_days)
    .and_then(|age| now.checked_sub(age))
    .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Delete `unit`'s artifacts under `root` modified before `cutoff`.
///
/// A missing unit directory means there is nothing to rotate.
#[instrument(skip_all, fields(unit = %unit, root = %root.display()))]
pub async fn rotate_local(root: &Path, unit: &str, cutoff: SystemTime) -> Result<RotationReport, StorageError> {
  let dir = artifact::unit_dir(root, unit);
  let mut entries = match tokio::fs::read_dir(&dir).await {
    Ok(entries) => entries,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
      debug!("no artifact directory");
      return Ok(RotationReport::default());
    }
    Err(e) => return Err(StorageError::io(dir, e)),
  };

  let mut report = RotationReport::default();
  while let Some(entry) = entries
    .next_entry()
    .await
    .map_err(|e| StorageError::io(&dir, e))?
  {
    let path = entry.path();
    let is_artifact = path
      .file_name()
      .and_then(|n| n.to_str())
      .is_some_and(|name| artifact::belongs_to(name, unit));
    if !is_artifact {
      continue;
    }

    let modified = match entry.metadata().await.and_then(|m| {
      if m.is_file() {
        m.modified().map(Some)
      } else {
        Ok(None)
      }
    }) {
      Ok(Some(modified)) => modified,
      Ok(None) => continue,
      Err(e) => {
        warn!(path = %path.display(), error = %e, "cannot read artifact metadata");
        report.failed += 1;
        continue;
      }
    };
    if modified >= cutoff {
      continue;
    }

    match tokio::fs::remove_file(&path).await {
      Ok(()) => {
        info!(path = %path.display(), "expired artifact deleted");
        report.deleted.push(path.display().to_string());
      }
      Err(e) => {
        warn!(path = %path.display(), error = %e, "failed to delete expired artifact");
        report.failed += 1;
      }
    }
  }
  Ok(report)
}

/// Delete `unit`'s remote objects under `prefix` modified before `cutoff`.
#[instrument(skip_all, fields(unit = %unit))]
pub async fn rotate_remote(
  store: &dyn ObjectStore,
  prefix: &str,
  unit: &str,
  cutoff: DateTime<Utc>,
) -> Result<RotationReport, StorageError> {
  let unit_prefix = artifact::remote_prefix(prefix, unit);
  let objects = store.list(&unit_prefix).await?;

  let mut report = RotationReport::default();
  for object in objects {
    let name = object.key.rsplit('/').next().unwrap_or_default();
    if !artifact::belongs_to(name, unit) || object.last_modified >= cutoff {
      continue;
    }
    match store.delete(&object.key).await {
      Ok(()) => {
        info!(key = %object.key, "expired object deleted");
        report.deleted.push(object.key);
      }
      Err(e) => {
        warn!(key = %object.key, error = %e, "failed to delete expired object");
        report.failed += 1;
      }
    }
  }
  Ok(report)
}

/// Remote side of a rotation.
pub struct RemoteRetention {
  pub store: Arc<dyn ObjectStore>,
  pub prefix: String,
  pub retention_days: u32,
}

/// Runs retention for one unit: the backup directory, every replication
/// path and, when configured, remote storage.
pub struct RotationTask {
  local_roots: Vec<PathBuf>,
  retention_days: u32,
  remote: Option<RemoteRetention>,
}

impl RotationTask {
  pub fn new(local_roots: Vec<PathBuf>, retention_days: u32) -> Self {
    Self {
      local_roots,
      retention_days,
      remote: None,
    }
  }

  pub fn with_remote(mut self, remote: RemoteRetention) -> Self {
    self.remote = Some(remote);
    self
  }
}

#[async_trait]
impl UnitTask for RotationTask {
  fn kind(&self) -> TaskKind {
    TaskKind::Rotation
  }

  async fn run(&self, unit_id: &str) -> TaskResult {
    let started_at = Utc::now();
    let now = SystemTime::now();
    let local_cutoff = cutoff(now, self.retention_days);

    let mut report = RotationReport::default();
    let mut errors = Vec::new();

    for root in &self.local_roots {
      match rotate_local(root, unit_id, local_cutoff).await {
        Ok(pass) => report.merge(pass),
        Err(e) => errors.push(e.to_string()),
      }
    }

    if let Some(remote) = &self.remote {
      let remote_cutoff = DateTime::<Utc>::from(cutoff(now, remote.retention_days));
      match rotate_remote(remote.store.as_ref(), &remote.prefix, unit_id, remote_cutoff).await {
        Ok(pass) => report.merge(pass),
        Err(e) => errors.push(e.to_string()),
      }
    }

    if report.failed > 0 {
      errors.push(format!("{} deletion(s) failed", report.failed));
    }

    let result = if errors.is_empty() {
      TaskResult::success(
        unit_id,
        TaskKind::Rotation,
        format!("{} expired artifact(s) deleted", report.deleted.len()),
      )
    } else {
      TaskResult::failure(unit_id, TaskKind::Rotation, errors.join("; "))
    };
    result
      .started_at(started_at)
      .with(fields::DELETED, report.deleted)
  }
}
