//! ibkeeper Config
//!
//! Settings are read once at process start: a TOML file, then a small
//! environment overlay, then validation. The resulting [`Settings`] value is
//! shared behind an `Arc` and never mutated for the rest of the run.
//!
//! ```toml
//! [cluster]
//! address = "srv01:1545"
//! server = "srv01"
//! exclude = ["scratch"]
//!
//! [credentials.default]
//! user = "backup"
//! password = "secret"
//!
//! [backup]
//! destination = "/srv/backups"
//! concurrency = 2
//! retries = 1
//! ```

mod credentials;
mod error;
mod settings;

pub use credentials::{Credential, CredentialSettings};
pub use error::ConfigError;
pub use settings::{
  BackupSettings, ClusterSettings, LogSettings, MaintenanceSettings, NotifySettings, Settings,
  UpdateSettings, UploadBackend, UploadSettings,
};
