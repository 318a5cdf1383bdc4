use std::path::PathBuf;

/// Errors raised while loading or validating settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  /// The settings file could not be read.
  #[error("failed to read settings file '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// The settings file is not valid TOML for the settings schema.
  #[error("failed to parse settings: {0}")]
  Parse(#[from] toml::de::Error),

  /// A value is present but unusable.
  #[error("invalid setting '{key}': {message}")]
  InvalidValue { key: String, message: String },
}

impl ConfigError {
  pub(crate) fn invalid(key: &str, message: impl Into<String>) -> Self {
    Self::InvalidValue {
      key: key.to_string(),
      message: message.into(),
    }
  }
}
