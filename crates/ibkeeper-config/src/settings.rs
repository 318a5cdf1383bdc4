//! Settings schema and loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::credentials::{Credential, CredentialSettings};
use crate::error::ConfigError;

/// Environment variable prefix for the overlay applied after the file is read.
const ENV_PREFIX: &str = "IBKEEPER_";

/// Top-level settings for one process run.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
  /// Restricts the worklist to a single unit when no include list is set.
  pub debug: bool,
  pub cluster: ClusterSettings,
  pub credentials: CredentialSettings,
  pub backup: BackupSettings,
  pub maintenance: MaintenanceSettings,
  pub update: UpdateSettings,
  pub upload: UploadSettings,
  pub notify: NotifySettings,
  pub log: LogSettings,
}

/// Cluster access and the lock protocol.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
  /// Path to the `rac` administration utility.
  pub rac_path: PathBuf,
  /// Address of the `ras` administration server, e.g. `srv01:1545`.
  pub address: String,
  /// Cluster administrator, when the cluster requires one.
  pub admin: Option<Credential>,
  /// Host name used in infobase connection strings (`/S host\name`).
  pub server: String,
  /// Path to the platform executable (`1cv8`).
  pub platform_path: PathBuf,
  /// Timeout for a single administration call.
  pub call_timeout_secs: u64,
  /// Pause between denying sessions and terminating the remaining ones.
  pub terminate_delay_secs: u64,
  pub permission_code: String,
  pub lock_message: String,
  pub include: Vec<String>,
  pub exclude: Vec<String>,
}

impl Default for ClusterSettings {
  fn default() -> Self {
    Self {
      rac_path: PathBuf::from("rac"),
      address: "localhost:1545".to_string(),
      admin: None,
      server: "localhost".to_string(),
      platform_path: PathBuf::from("1cv8"),
      call_timeout_secs: 60,
      terminate_delay_secs: 5,
      permission_code: "0000".to_string(),
      lock_message: "Scheduled maintenance is in progress".to_string(),
      include: Vec::new(),
      exclude: Vec::new(),
    }
  }
}

impl ClusterSettings {
  pub fn call_timeout(&self) -> Duration {
    Duration::from_secs(self.call_timeout_secs)
  }

  pub fn terminate_delay(&self) -> Duration {
    Duration::from_secs(self.terminate_delay_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
  pub destination: PathBuf,
  pub concurrency: usize,
  pub retries: u32,
  pub retry_delay_secs: u64,
  pub timeout_secs: u64,
  /// Use `pg_dump` instead of a platform export for PostgreSQL infobases.
  pub native_dump: bool,
  pub pg_dump_path: PathBuf,
  /// Extra directories every fresh artifact is copied to.
  pub replication_paths: Vec<PathBuf>,
  pub replication_concurrency: usize,
  pub retention_days: u32,
  /// Where the platform writes its per-command `/Out` logs.
  pub command_log_dir: PathBuf,
}

impl Default for BackupSettings {
  fn default() -> Self {
    Self {
      destination: PathBuf::from("backups"),
      concurrency: 2,
      retries: 1,
      retry_delay_secs: 30,
      timeout_secs: 4 * 60 * 60,
      native_dump: false,
      pg_dump_path: PathBuf::from("pg_dump"),
      replication_paths: Vec::new(),
      replication_concurrency: 2,
      retention_days: 30,
      command_log_dir: PathBuf::from("logs/commands"),
    }
  }
}

impl BackupSettings {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  pub fn retry_delay(&self) -> Duration {
    Duration::from_secs(self.retry_delay_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaintenanceSettings {
  pub concurrency: usize,
  pub retries: u32,
  pub retry_delay_secs: u64,
  pub timeout_secs: u64,
  /// Event log records older than this are removed.
  pub event_log_retention_days: u32,
  /// Run `vacuumdb` against PostgreSQL infobases.
  pub vacuum: bool,
  pub vacuumdb_path: PathBuf,
}

impl Default for MaintenanceSettings {
  fn default() -> Self {
    Self {
      concurrency: 4,
      retries: 1,
      retry_delay_secs: 30,
      timeout_secs: 60 * 60,
      event_log_retention_days: 90,
      vacuum: false,
      vacuumdb_path: PathBuf::from("vacuumdb"),
    }
  }
}

impl MaintenanceSettings {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  pub fn retry_delay(&self) -> Duration {
    Duration::from_secs(self.retry_delay_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpdateSettings {
  pub concurrency: usize,
  pub retries: u32,
  pub retry_delay_secs: u64,
  pub timeout_secs: u64,
  /// Root of the update packages, laid out as `<config>/<from_version>/1cv8.cfu`.
  pub updates_dir: PathBuf,
  /// Maximum number of packages applied to one unit in a single run.
  pub max_chain: u32,
}

impl Default for UpdateSettings {
  fn default() -> Self {
    Self {
      concurrency: 1,
      retries: 1,
      retry_delay_secs: 30,
      timeout_secs: 2 * 60 * 60,
      updates_dir: PathBuf::from("updates"),
      max_chain: 10,
    }
  }
}

impl UpdateSettings {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  pub fn retry_delay(&self) -> Duration {
    Duration::from_secs(self.retry_delay_secs)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadBackend {
  S3,
  Fs,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
  pub enabled: bool,
  pub backend: UploadBackend,
  pub bucket: String,
  pub prefix: String,
  pub endpoint: Option<String>,
  pub region: Option<String>,
  /// Root directory when `backend = "fs"`.
  pub root: PathBuf,
  pub concurrency: usize,
  pub retries: u32,
  pub retry_delay_secs: u64,
  /// Artifacts at or above this size go through multipart upload.
  pub multipart_threshold_mb: u64,
  pub part_size_mb: u64,
  pub retention_days: u32,
}

impl Default for UploadSettings {
  fn default() -> Self {
    Self {
      enabled: false,
      backend: UploadBackend::S3,
      bucket: String::new(),
      prefix: "backups".to_string(),
      endpoint: None,
      region: None,
      root: PathBuf::from("remote"),
      concurrency: 2,
      retries: 3,
      retry_delay_secs: 10,
      multipart_threshold_mb: 64,
      part_size_mb: 16,
      retention_days: 30,
    }
  }
}

impl UploadSettings {
  pub fn retry_delay(&self) -> Duration {
    Duration::from_secs(self.retry_delay_secs)
  }

  pub fn multipart_threshold_bytes(&self) -> u64 {
    self.multipart_threshold_mb * 1024 * 1024
  }

  pub fn part_size_bytes(&self) -> u64 {
    self.part_size_mb * 1024 * 1024
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifySettings {
  pub enabled: bool,
  pub smtp_host: String,
  pub smtp_port: u16,
  pub user: String,
  pub password: String,
  pub from: String,
  pub to: Vec<String>,
  pub subject_prefix: String,
}

impl Default for NotifySettings {
  fn default() -> Self {
    Self {
      enabled: false,
      smtp_host: "localhost".to_string(),
      smtp_port: 587,
      user: String::new(),
      password: String::new(),
      from: String::new(),
      to: Vec::new(),
      subject_prefix: "[ibkeeper]".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
  pub dir: PathBuf,
  pub level: String,
}

impl Default for LogSettings {
  fn default() -> Self {
    Self {
      dir: PathBuf::from("logs"),
      level: "info".to_string(),
    }
  }
}

impl Settings {
  /// Load settings from a file and the process environment.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_toml_str(&content)?
      .with_env(std::env::vars())?
      .validated()
  }

  /// Parse settings from TOML text without consulting the environment.
  pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
    Ok(toml::from_str(content)?)
  }

  /// Apply `IBKEEPER_*` overrides. Unknown variables are ignored.
  pub fn with_env<I>(mut self, vars: I) -> Result<Self, ConfigError>
  where
    I: IntoIterator<Item = (String, String)>,
  {
    for (name, value) in vars {
      let Some(key) = name.strip_prefix(ENV_PREFIX) else {
        continue;
      };
      match key {
        "DEBUG" => self.debug = parse_flag(&name, &value)?,
        "LOG_LEVEL" => self.log.level = value,
        "CONCURRENCY" => {
          let concurrency = value
            .parse::<usize>()
            .map_err(|e| ConfigError::invalid(&name, e.to_string()))?;
          self.backup.concurrency = concurrency;
          self.maintenance.concurrency = concurrency;
          self.update.concurrency = concurrency;
        }
        _ => {}
      }
    }
    Ok(self)
  }

  /// Reject settings that would make a run meaningless.
  pub fn validated(self) -> Result<Self, ConfigError> {
    for (key, value) in [
      ("backup.concurrency", self.backup.concurrency),
      ("maintenance.concurrency", self.maintenance.concurrency),
      ("update.concurrency", self.update.concurrency),
      ("upload.concurrency", self.upload.concurrency),
      ("backup.replication_concurrency", self.backup.replication_concurrency),
    ] {
      if value == 0 {
        return Err(ConfigError::invalid(key, "must be at least 1"));
      }
    }
    if self.upload.enabled && self.upload.backend == UploadBackend::S3 && self.upload.bucket.is_empty()
    {
      return Err(ConfigError::invalid("upload.bucket", "required when upload is enabled"));
    }
    if self.upload.part_size_mb < 5 {
      return Err(ConfigError::invalid(
        "upload.part_size_mb",
        "multipart parts must be at least 5 MB",
      ));
    }
    if self.notify.enabled && (self.notify.from.is_empty() || self.notify.to.is_empty()) {
      return Err(ConfigError::invalid(
        "notify",
        "'from' and 'to' are required when notification is enabled",
      ));
    }
    Ok(self)
  }
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ConfigError> {
  match value.to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Ok(true),
    "0" | "false" | "no" | "off" | "" => Ok(false),
    other => Err(ConfigError::invalid(name, format!("expected a boolean, got '{}'", other))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = r#"
    [cluster]
    address = "srv01:1545"
    server = "srv01"
    exclude = ["Scratch"]

    [credentials.default]
    user = "backup"
    password = "secret"

    [credentials.units.Payroll]
    user = "admin"
    password = "p4ss"

    [backup]
    destination = "/srv/backups"
    concurrency = 3
    replication_paths = ["/mnt/replica"]

    [upload]
    enabled = true
    bucket = "infobase-backups"
  "#;

  fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
  }

  #[test]
  fn test_parse_sample_with_defaults() {
    let settings = Settings::from_toml_str(SAMPLE).unwrap().validated().unwrap();

    assert_eq!(settings.cluster.address, "srv01:1545");
    assert_eq!(settings.cluster.exclude, vec!["Scratch".to_string()]);
    assert_eq!(settings.cluster.terminate_delay(), Duration::from_secs(5));
    assert_eq!(settings.backup.concurrency, 3);
    assert_eq!(settings.backup.retries, 1);
    assert_eq!(settings.upload.backend, UploadBackend::S3);
    assert_eq!(settings.credentials.for_unit("payroll").user, "admin");
    assert_eq!(settings.maintenance.event_log_retention_days, 90);
  }

  #[test]
  fn test_empty_document_is_valid() {
    let settings = Settings::from_toml_str("").unwrap().validated().unwrap();
    assert!(!settings.debug);
    assert!(!settings.upload.enabled);
  }

  #[test]
  fn test_env_overlay() {
    let settings = Settings::from_toml_str(SAMPLE)
      .unwrap()
      .with_env(env(&[
        ("IBKEEPER_DEBUG", "yes"),
        ("IBKEEPER_CONCURRENCY", "6"),
        ("IBKEEPER_LOG_LEVEL", "debug"),
        ("PATH", "/usr/bin"),
      ]))
      .unwrap();

    assert!(settings.debug);
    assert_eq!(settings.backup.concurrency, 6);
    assert_eq!(settings.update.concurrency, 6);
    assert_eq!(settings.log.level, "debug");
  }

  #[test]
  fn test_env_overlay_rejects_bad_number() {
    let err = Settings::default()
      .with_env(env(&[("IBKEEPER_CONCURRENCY", "many")]))
      .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));
  }

  #[test]
  fn test_zero_concurrency_rejected() {
    let err = Settings::from_toml_str("[backup]\nconcurrency = 0")
      .unwrap()
      .validated()
      .unwrap_err();
    assert!(err.to_string().contains("backup.concurrency"));
  }

  #[test]
  fn test_upload_requires_bucket() {
    let err = Settings::from_toml_str("[upload]\nenabled = true")
      .unwrap()
      .validated()
      .unwrap_err();
    assert!(err.to_string().contains("upload.bucket"));
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.toml");
    std::fs::write(&path, SAMPLE).unwrap();

    let settings = Settings::load(&path).unwrap();
    assert_eq!(settings.backup.destination, PathBuf::from("/srv/backups"));
  }

  #[test]
  fn test_load_missing_file() {
    let err = Settings::load(Path::new("/nonexistent/ibkeeper.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
  }
}
