use std::path::PathBuf;

use ibkeeper_cluster::ClusterError;
use ibkeeper_command::{CommandError, Retriable};
use ibkeeper_storage::StorageError;

/// Why a unit task failed.
#[derive(Debug, thiserror::Error)]
pub enum OpsError {
  /// Missing credentials or a setup the task cannot work with. Never retried.
  #[error("configuration error: {0}")]
  Configuration(String),

  /// The external operation failed.
  #[error(transparent)]
  Command(CommandError),

  /// Talking to the cluster failed.
  #[error(transparent)]
  Cluster(#[from] ClusterError),

  #[error(transparent)]
  Storage(#[from] StorageError),

  #[error("I/O error on '{}': {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// An update was applied but the configuration version stayed the same.
  #[error("update did not change version (still {version})")]
  NoProgress { version: String },

  #[error("cancelled")]
  Cancelled,
}

impl OpsError {
  pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    Self::Io {
      path: path.into(),
      source,
    }
  }
}

impl From<CommandError> for OpsError {
  fn from(e: CommandError) -> Self {
    match e {
      CommandError::Cancelled { .. } => OpsError::Cancelled,
      other => OpsError::Command(other),
    }
  }
}

impl Retriable for OpsError {
  fn is_retriable(&self) -> bool {
    match self {
      OpsError::Command(e) => e.is_retriable(),
      OpsError::Storage(e) => e.is_retriable(),
      OpsError::Configuration(_)
      | OpsError::Cluster(_)
      | OpsError::Io { .. }
      | OpsError::NoProgress { .. }
      | OpsError::Cancelled => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_taxonomy() {
    let failed = OpsError::from(CommandError::Failed {
      program: "1cv8".to_string(),
      exit_code: 1,
      output: String::new(),
    });
    assert!(failed.is_retriable());

    let cancelled = OpsError::from(CommandError::Cancelled {
      program: "1cv8".to_string(),
    });
    assert!(matches!(cancelled, OpsError::Cancelled));

    assert!(!OpsError::Configuration("no password".to_string()).is_retriable());
    assert!(!OpsError::from(ClusterError::WorkerGone).is_retriable());
  }
}
