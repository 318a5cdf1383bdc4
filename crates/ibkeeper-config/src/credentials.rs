//! Credential registry for infobases and database servers.

use std::collections::HashMap;

use serde::Deserialize;

/// A user/password pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Credential {
  #[serde(default)]
  pub user: String,
  #[serde(default)]
  pub password: String,
}

impl Credential {
  pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
    Self {
      user: user.into(),
      password: password.into(),
    }
  }
}

/// Credentials used to open infobases and their databases.
///
/// Infobase credentials fall back to `default` when a unit has no entry of
/// its own. Database passwords are keyed by `user@host` and have no fallback.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CredentialSettings {
  pub default: Credential,
  pub units: HashMap<String, Credential>,
  pub databases: HashMap<String, String>,
}

impl CredentialSettings {
  /// Credentials for an infobase, matched case-insensitively by name.
  pub fn for_unit(&self, unit: &str) -> &Credential {
    self
      .units
      .iter()
      .find(|(name, _)| name.eq_ignore_ascii_case(unit))
      .map(|(_, credential)| credential)
      .unwrap_or(&self.default)
  }

  /// Password for a database login, looked up by `user@host`.
  pub fn database_password(&self, user: &str, host: &str) -> Option<&str> {
    let key = format!("{}@{}", user, host);
    self
      .databases
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(&key))
      .map(|(_, password)| password.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn registry() -> CredentialSettings {
    CredentialSettings {
      default: Credential::new("backup", "fallback"),
      units: HashMap::from([("Payroll".to_string(), Credential::new("admin", "p4ss"))]),
      databases: HashMap::from([("postgres@db01".to_string(), "pgsecret".to_string())]),
    }
  }

  #[test]
  fn test_unit_credentials_case_insensitive() {
    let registry = registry();
    assert_eq!(registry.for_unit("payroll").user, "admin");
    assert_eq!(registry.for_unit("PAYROLL").password, "p4ss");
  }

  #[test]
  fn test_unit_credentials_fall_back_to_default() {
    let registry = registry();
    assert_eq!(registry.for_unit("warehouse"), &Credential::new("backup", "fallback"));
  }

  #[test]
  fn test_database_password_lookup() {
    let registry = registry();
    assert_eq!(registry.database_password("postgres", "db01"), Some("pgsecret"));
    assert_eq!(registry.database_password("postgres", "db02"), None);
  }
}
