use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use ibkeeper_command::{RetryBudget, run_with_retry};
use ibkeeper_task::{FollowUpTask, TaskKind, TaskResult, fields};
use tracing::{info, instrument, warn};

use crate::artifact;
use crate::error::StorageError;
use crate::store::ObjectStore;

/// Uploads the artifact of a successful backup to remote storage.
///
/// The whole upload is retried on transient errors with its own budget,
/// independent of the backup's.
pub struct UploadTask {
  store: Arc<dyn ObjectStore>,
  prefix: String,
  budget: RetryBudget,
}

impl UploadTask {
  pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>, budget: RetryBudget) -> Self {
    Self {
      store,
      prefix: prefix.into(),
      budget,
    }
  }
}

#[async_trait]
impl FollowUpTask for UploadTask {
  fn kind(&self) -> TaskKind {
    TaskKind::Upload
  }

  #[instrument(name = "upload", skip_all, fields(unit = %primary.unit_id))]
  async fn run(&self, primary: &TaskResult) -> TaskResult {
    let started_at = Utc::now();
    let unit = primary.unit_id.as_str();

    let Some(path) = primary.artifact_path() else {
      return TaskResult::failure(unit, TaskKind::Upload, StorageError::MissingArtifact.to_string())
        .started_at(started_at);
    };
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
      return TaskResult::failure(
        unit,
        TaskKind::Upload,
        format!("artifact path has no file name: {}", path.display()),
      )
      .started_at(started_at);
    };
    let key = artifact::object_key(&self.prefix, unit, file_name);

    let store = self.store.as_ref();
    let local = path.as_path();
    let key_ref = key.as_str();
    let attempts = AtomicU32::new(0);
    let attempts_ref = &attempts;
    let clock = Instant::now();

    let outcome = run_with_retry("upload", self.budget, move |attempt| {
      attempts_ref.store(attempt, Ordering::Relaxed);
      store.upload(local, key_ref)
    })
    .await;
    let elapsed_ms = clock.elapsed().as_millis() as u64;
    let attempts = attempts.load(Ordering::Relaxed);

    match outcome {
      Ok(bytes) => {
        info!(key = %key, bytes, elapsed_ms, "artifact uploaded");
        TaskResult::success(unit, TaskKind::Upload, format!("uploaded to {}", key))
          .started_at(started_at)
          .with(fields::UPLOADED_BYTES, bytes)
          .with(fields::OBJECT_KEY, key.as_str())
          .with(fields::ELAPSED_MS, elapsed_ms)
          .with(fields::ATTEMPTS, attempts)
      }
      Err(e) => {
        warn!(key = %key, attempts, error = %e, "upload failed");
        TaskResult::failure(unit, TaskKind::Upload, e.to_string())
          .started_at(started_at)
          .with(fields::OBJECT_KEY, key.as_str())
          .with(fields::ATTEMPTS, attempts)
      }
    }
  }
}
