use std::path::PathBuf;

use ibkeeper_command::Retriable;

/// Errors moving artifacts around.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
  #[error("I/O error on '{}': {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("object not found: {0}")]
  NotFound(String),

  #[error("invalid object key: {0}")]
  InvalidKey(String),

  /// The storage service rejected or failed a call.
  #[error("storage call '{operation}' failed: {message}")]
  Backend {
    operation: String,
    message: String,
    /// Timeouts, dispatch failures and 5xx answers.
    transient: bool,
  },

  #[error("result carries no artifact path")]
  MissingArtifact,
}

impl StorageError {
  pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    Self::Io {
      path: path.into(),
      source,
    }
  }
}

impl Retriable for StorageError {
  fn is_retriable(&self) -> bool {
    match self {
      StorageError::Io { source, .. } => source.kind() != std::io::ErrorKind::NotFound,
      StorageError::Backend { transient, .. } => *transient,
      StorageError::NotFound(_) | StorageError::InvalidKey(_) | StorageError::MissingArtifact => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_retriable_classification() {
    let missing = StorageError::io("/b/a.dt", std::io::Error::from(std::io::ErrorKind::NotFound));
    assert!(!missing.is_retriable());

    let reset = StorageError::io("/b/a.dt", std::io::Error::from(std::io::ErrorKind::ConnectionReset));
    assert!(reset.is_retriable());

    let throttled = StorageError::Backend {
      operation: "put object".to_string(),
      message: "503 slow down".to_string(),
      transient: true,
    };
    assert!(throttled.is_retriable());
    assert!(!StorageError::MissingArtifact.is_retriable());
  }
}
