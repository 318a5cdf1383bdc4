use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;

/// One stored object as reported by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
  pub key: String,
  pub size: u64,
  pub last_modified: DateTime<Utc>,
}

/// Remote artifact storage.
///
/// Keys use `/` as separator whatever the backend.
#[async_trait]
pub trait ObjectStore: Send + Sync {
  /// Store the file at `local` under `key`, replacing any existing object.
  /// Returns the number of bytes transferred.
  async fn upload(&self, local: &Path, key: &str) -> Result<u64, StorageError>;

  /// Every object whose key starts with `prefix`.
  async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError>;

  async fn delete(&self, key: &str) -> Result<(), StorageError>;
}
