//! Platform designer command lines.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ibkeeper_command::CommandSpec;
use ibkeeper_config::Credential;

/// Builds `1cv8 DESIGNER` invocations against one server infobase.
///
/// Every invocation writes its messages to the `/Out` log so that the
/// command runner can fold them into the result.
#[derive(Debug, Clone)]
pub struct Designer {
  platform_path: PathBuf,
  server: String,
  unit: String,
  credential: Credential,
  log_path: PathBuf,
  timeout: Duration,
}

impl Designer {
  pub fn new(
    platform_path: impl Into<PathBuf>,
    server: &str,
    unit: &str,
    credential: &Credential,
    log_path: impl AsRef<Path>,
    timeout: Duration,
  ) -> Self {
    Self {
      platform_path: platform_path.into(),
      server: server.to_string(),
      unit: unit.to_string(),
      credential: credential.clone(),
      log_path: log_path.as_ref().to_path_buf(),
      timeout,
    }
  }

  /// Designer command running the given batch actions.
  pub fn command<I, S>(&self, actions: I) -> CommandSpec
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let mut spec = CommandSpec::new(&self.platform_path, self.timeout)
      .arg("DESIGNER")
      .arg("/S")
      .arg(format!("{}\\{}", self.server, self.unit));
    if !self.credential.user.is_empty() {
      spec = spec.arg("/N").arg(&self.credential.user);
    }
    if !self.credential.password.is_empty() {
      spec = spec.arg("/P").arg(&self.credential.password);
    }
    spec
      .args(["/DisableStartupDialogs", "/DisableStartupMessages"])
      .args(actions)
      .arg("/Out")
      .arg(self.log_path.display().to_string())
      .log_path(&self.log_path)
  }

  /// Export the whole infobase to a `.dt` file.
  pub fn dump_infobase(&self, target: &Path) -> CommandSpec {
    self.command(["/DumpIB".to_string(), target.display().to_string()])
  }

  /// Load a configuration update and apply it to the database.
  pub fn update_configuration(&self, package: &Path) -> CommandSpec {
    self.command([
      "/UpdateCfg".to_string(),
      package.display().to_string(),
      "/UpdateDBCfg".to_string(),
      "-Server".to_string(),
    ])
  }

  /// Drop event log records older than `before` (`YYYY-MM-DD`).
  pub fn reduce_event_log(&self, before: &str) -> CommandSpec {
    self.command(["/ReduceEventLogSize".to_string(), before.to_string()])
  }

  /// Dump the configuration objects named in `list_file` to `target_dir`.
  pub fn dump_config_objects(&self, target_dir: &Path, list_file: &Path) -> CommandSpec {
    self.command([
      "/DumpConfigToFiles".to_string(),
      target_dir.display().to_string(),
      "-listFile".to_string(),
      list_file.display().to_string(),
    ])
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn designer(credential: Credential) -> Designer {
    Designer::new(
      "/opt/1cv8/bin/1cv8",
      "srv01",
      "payroll",
      &credential,
      "/var/log/ibkeeper/payroll.log",
      Duration::from_secs(600),
    )
  }

  #[test]
  fn test_dump_command_line() {
    let spec = designer(Credential::new("admin", "secret")).dump_infobase(Path::new("/b/p.dt"));
    assert_eq!(
      spec.args,
      vec![
        "DESIGNER",
        "/S",
        "srv01\\payroll",
        "/N",
        "admin",
        "/P",
        "secret",
        "/DisableStartupDialogs",
        "/DisableStartupMessages",
        "/DumpIB",
        "/b/p.dt",
        "/Out",
        "/var/log/ibkeeper/payroll.log",
      ]
    );
    assert_eq!(spec.log_path, Some(PathBuf::from("/var/log/ibkeeper/payroll.log")));
    assert_eq!(spec.timeout, Duration::from_secs(600));
  }

  #[test]
  fn test_empty_password_omitted() {
    let spec = designer(Credential::new("admin", "")).reduce_event_log("2026-01-01");
    assert!(spec.args.contains(&"/N".to_string()));
    assert!(!spec.args.contains(&"/P".to_string()));
    assert!(spec.args.contains(&"/ReduceEventLogSize".to_string()));
  }
}
