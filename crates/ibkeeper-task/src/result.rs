//! Task outcome records.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known keys of [`TaskResult::extra`].
pub mod fields {
  /// Path of the artifact a backup produced.
  pub const ARTIFACT_PATH: &str = "artifact_path";
  /// Size of that artifact in bytes.
  pub const ARTIFACT_BYTES: &str = "artifact_bytes";
  /// How the backup was taken (`platform` or `pg_dump`).
  pub const METHOD: &str = "method";
  /// Bytes transferred by an upload.
  pub const UPLOADED_BYTES: &str = "uploaded_bytes";
  /// Remote key an artifact was uploaded to.
  pub const OBJECT_KEY: &str = "object_key";
  /// Wall time of the operation in milliseconds.
  pub const ELAPSED_MS: &str = "elapsed_ms";
  /// Destinations a replication copied to.
  pub const REPLICATED_TO: &str = "replicated_to";
  /// Destinations a replication failed to copy to.
  pub const REPLICATION_FAILED: &str = "replication_failed";
  /// Configuration version after an update.
  pub const CONFIG_VERSION: &str = "config_version";
  /// Versions an update chain passed through.
  pub const APPLIED_VERSIONS: &str = "applied_versions";
  /// Files and objects deleted by rotation.
  pub const DELETED: &str = "deleted";
  /// Attempts an operation took.
  pub const ATTEMPTS: &str = "attempts";
}

/// What kind of work produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
  Backup,
  Maintenance,
  Update,
  Upload,
  Replication,
  Rotation,
}

impl TaskKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      TaskKind::Backup => "backup",
      TaskKind::Maintenance => "maintenance",
      TaskKind::Update => "update",
      TaskKind::Upload => "upload",
      TaskKind::Replication => "replication",
      TaskKind::Rotation => "rotation",
    }
  }
}

impl fmt::Display for TaskKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Outcome of one attempted unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
  /// Infobase the work was done for.
  pub unit_id: String,
  pub kind: TaskKind,
  pub succeeded: bool,
  /// Human-readable outcome; the error chain for failures.
  pub message: String,
  pub started_at: DateTime<Utc>,
  pub finished_at: DateTime<Utc>,
  /// Kind-specific payload, see [`fields`].
  #[serde(default)]
  pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TaskResult {
  /// A successful result stamped with the current time.
  pub fn success(unit_id: impl Into<String>, kind: TaskKind, message: impl Into<String>) -> Self {
    Self::new(unit_id, kind, true, message)
  }

  /// A failed result stamped with the current time.
  pub fn failure(unit_id: impl Into<String>, kind: TaskKind, message: impl Into<String>) -> Self {
    Self::new(unit_id, kind, false, message)
  }

  fn new(unit_id: impl Into<String>, kind: TaskKind, succeeded: bool, message: impl Into<String>) -> Self {
    let now = Utc::now();
    Self {
      unit_id: unit_id.into(),
      kind,
      succeeded,
      message: message.into(),
      started_at: now,
      finished_at: now,
      extra: serde_json::Map::new(),
    }
  }

  /// Set the start time; the finish time stays as constructed.
  pub fn started_at(mut self, started_at: DateTime<Utc>) -> Self {
    self.started_at = started_at;
    self
  }

  /// Attach a payload field.
  pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
    self.extra.insert(key.to_string(), value.into());
    self
  }

  pub fn extra_str(&self, key: &str) -> Option<&str> {
    self.extra.get(key).and_then(|v| v.as_str())
  }

  pub fn extra_u64(&self, key: &str) -> Option<u64> {
    self.extra.get(key).and_then(|v| v.as_u64())
  }

  /// The backup artifact this result points at, if any.
  pub fn artifact_path(&self) -> Option<PathBuf> {
    self.extra_str(fields::ARTIFACT_PATH).map(PathBuf::from)
  }

  pub fn duration(&self) -> Duration {
    (self.finished_at - self.started_at)
      .to_std()
      .unwrap_or_default()
  }
}
