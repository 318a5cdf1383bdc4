use std::time::Duration;

use crate::retry::Retriable;

/// Errors from running an external command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
  /// The process could not be started at all.
  #[error("failed to start '{program}': {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  /// The process exited with a non-zero code.
  #[error("'{program}' exited with code {exit_code}: {output}")]
  Failed {
    program: String,
    exit_code: i32,
    output: String,
  },

  /// The process ran past its timeout and was terminated.
  #[error("'{program}' timed out after {timeout:?}: {output}")]
  TimedOut {
    program: String,
    timeout: Duration,
    output: String,
  },

  /// The run was cancelled and the process was terminated.
  #[error("'{program}' cancelled")]
  Cancelled { program: String },

  /// Waiting on the process failed.
  #[error("i/o error while running '{program}': {source}")]
  Io {
    program: String,
    #[source]
    source: std::io::Error,
  },
}

impl CommandError {
  /// Output captured before the failure, if any.
  pub fn output(&self) -> Option<&str> {
    match self {
      CommandError::Failed { output, .. } | CommandError::TimedOut { output, .. } => Some(output),
      _ => None,
    }
  }
}

impl Retriable for CommandError {
  fn is_retriable(&self) -> bool {
    matches!(
      self,
      CommandError::Failed { .. } | CommandError::TimedOut { .. } | CommandError::Io { .. }
    )
  }
}
