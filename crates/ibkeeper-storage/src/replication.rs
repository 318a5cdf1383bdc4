use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use ibkeeper_task::{FollowUpTask, TaskKind, TaskResult, fields};
use tracing::{info, instrument, warn};

use crate::artifact;
use crate::error::StorageError;

/// Copies the artifact of a successful backup to every replication path.
///
/// Each destination is copied independently; one failing copy does not stop
/// the others. The result succeeds only when every destination got a copy.
pub struct ReplicationTask {
  destinations: Vec<PathBuf>,
}

impl ReplicationTask {
  pub fn new(destinations: Vec<PathBuf>) -> Self {
    Self { destinations }
  }
}

async fn copy_to(source: &Path, root: &Path, unit: &str, file_name: &str) -> Result<PathBuf, StorageError> {
  let dir = artifact::unit_dir(root, unit);
  tokio::fs::create_dir_all(&dir)
    .await
    .map_err(|e| StorageError::io(&dir, e))?;
  let target = dir.join(file_name);
  tokio::fs::copy(source, &target)
    .await
    .map_err(|e| StorageError::io(&target, e))?;
  Ok(target)
}

#[async_trait]
impl FollowUpTask for ReplicationTask {
  fn kind(&self) -> TaskKind {
    TaskKind::Replication
  }

  #[instrument(name = "replication", skip_all, fields(unit = %primary.unit_id))]
  async fn run(&self, primary: &TaskResult) -> TaskResult {
    let started_at = Utc::now();
    let unit = primary.unit_id.as_str();

    let Some(source) = primary.artifact_path() else {
      return TaskResult::failure(unit, TaskKind::Replication, StorageError::MissingArtifact.to_string())
        .started_at(started_at);
    };
    let Some(file_name) = source.file_name().and_then(|n| n.to_str()) else {
      return TaskResult::failure(
        unit,
        TaskKind::Replication,
        format!("artifact path has no file name: {}", source.display()),
      )
      .started_at(started_at);
    };

    let copies = join_all(
      self
        .destinations
        .iter()
        .map(|root| copy_to(&source, root, unit, file_name)),
    )
    .await;

    let mut copied = Vec::new();
    let mut failed = Vec::new();
    for (root, outcome) in self.destinations.iter().zip(copies) {
      match outcome {
        Ok(target) => copied.push(target.display().to_string()),
        Err(e) => {
          warn!(destination = %root.display(), error = %e, "replication copy failed");
          failed.push(format!("{}: {}", root.display(), e));
        }
      }
    }
    info!(copied = copied.len(), failed = failed.len(), "artifact replicated");

    let result = if failed.is_empty() {
      TaskResult::success(
        unit,
        TaskKind::Replication,
        format!("copied to {} destination(s)", copied.len()),
      )
    } else {
      TaskResult::failure(unit, TaskKind::Replication, failed.join("; "))
    };
    result
      .started_at(started_at)
      .with(fields::REPLICATED_TO, copied)
      .with(fields::REPLICATION_FAILED, failed)
  }
}
