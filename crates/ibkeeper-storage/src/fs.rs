use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;

use crate::error::StorageError;
use crate::store::{ObjectInfo, ObjectStore};

/// Filesystem-based object store.
///
/// Each object is stored at `{base_path}/{key}`. Parent directories are
/// created automatically. Useful for a mounted share or NAS as the remote.
pub struct FsObjectStore {
  base_path: PathBuf,
}

impl FsObjectStore {
  /// Create a new filesystem store with the given base path.
  pub fn new(base_path: impl Into<PathBuf>) -> Self {
    Self {
      base_path: base_path.into(),
    }
  }

  fn key_to_path(&self, key: &str) -> Result<PathBuf, StorageError> {
    let relative = Path::new(key);
    let escapes = relative
      .components()
      .any(|c| !matches!(c, Component::Normal(_)));
    if key.is_empty() || escapes {
      return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(self.base_path.join(relative))
  }

  fn path_to_key(&self, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(&self.base_path).ok()?;
    let parts: Vec<&str> = relative
      .components()
      .map(|c| c.as_os_str().to_str())
      .collect::<Option<_>>()?;
    Some(parts.join("/"))
  }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
  async fn upload(&self, local: &Path, key: &str) -> Result<u64, StorageError> {
    let path = self.key_to_path(key)?;

    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)
        .await
        .map_err(|e| StorageError::io(parent, e))?;
    }

    fs::copy(local, &path)
      .await
      .map_err(|e| StorageError::io(local, e))
  }

  async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
    let mut objects = Vec::new();
    let mut pending = vec![self.base_path.clone()];

    while let Some(dir) = pending.pop() {
      let mut entries = match fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
        Err(e) => return Err(StorageError::io(dir, e)),
      };

      while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StorageError::io(&dir, e))?
      {
        let path = entry.path();
        let metadata = entry
          .metadata()
          .await
          .map_err(|e| StorageError::io(&path, e))?;
        if metadata.is_dir() {
          pending.push(path);
          continue;
        }

        let Some(key) = self.path_to_key(&path) else {
          continue;
        };
        if !key.starts_with(prefix) {
          continue;
        }
        let modified = metadata
          .modified()
          .map_err(|e| StorageError::io(&path, e))?;
        objects.push(ObjectInfo {
          key,
          size: metadata.len(),
          last_modified: DateTime::<Utc>::from(modified),
        });
      }
    }

    objects.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(objects)
  }

  async fn delete(&self, key: &str) -> Result<(), StorageError> {
    let path = self.key_to_path(key)?;
    fs::remove_file(&path).await.map_err(|e| {
      if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
      } else {
        StorageError::io(path, e)
      }
    })
  }
}
