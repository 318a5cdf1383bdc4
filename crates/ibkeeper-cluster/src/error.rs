/// Errors talking to the cluster.
///
/// All variants are communication failures from the point of view of a unit
/// task: the unit fails, the run goes on.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
  /// The administration call could not be made or was rejected.
  #[error("cluster call '{operation}' failed: {message}")]
  Call { operation: String, message: String },

  /// The cluster does not know the infobase.
  #[error("infobase '{0}' not found in cluster")]
  UnitNotFound(String),

  /// The cluster answered with something that could not be understood.
  #[error("unexpected cluster response to '{operation}': {message}")]
  Protocol { operation: String, message: String },

  /// The serialized worker is no longer running.
  #[error("cluster worker stopped")]
  WorkerGone,
}

impl ClusterError {
  pub(crate) fn call(operation: &str, message: impl Into<String>) -> Self {
    Self::Call {
      operation: operation.to_string(),
      message: message.into(),
    }
  }

  pub(crate) fn protocol(operation: &str, message: impl Into<String>) -> Self {
    Self::Protocol {
      operation: operation.to_string(),
      message: message.into(),
    }
  }
}
