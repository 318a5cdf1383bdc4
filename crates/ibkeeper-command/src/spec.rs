use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default time a terminated process gets to exit before it is killed.
const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(10);

/// Description of one external process invocation.
#[derive(Clone)]
pub struct CommandSpec {
  pub program: PathBuf,
  pub args: Vec<String>,
  /// Variables added to the inherited environment.
  pub env: Vec<(String, String)>,
  /// Log file the process writes; read back after it exits.
  pub log_path: Option<PathBuf>,
  pub timeout: Duration,
  /// How long a gracefully terminated process may take to exit.
  pub kill_grace: Duration,
}

impl CommandSpec {
  pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      env: Vec::new(),
      log_path: None,
      timeout,
      kill_grace: DEFAULT_KILL_GRACE,
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.push((key.into(), value.into()));
    self
  }

  pub fn log_path(mut self, path: impl AsRef<Path>) -> Self {
    self.log_path = Some(path.as_ref().to_path_buf());
    self
  }

  pub fn kill_grace(mut self, grace: Duration) -> Self {
    self.kill_grace = grace;
    self
  }

  /// Program name for messages.
  pub fn program_name(&self) -> String {
    self
      .program
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| self.program.display().to_string())
  }
}

// Arguments and environment values routinely carry passwords, so only the
// shape of the command is printed.
impl fmt::Debug for CommandSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CommandSpec")
      .field("program", &self.program)
      .field("args", &self.args.len())
      .field("env", &self.env.iter().map(|(k, _)| k).collect::<Vec<_>>())
      .field("log_path", &self.log_path)
      .field("timeout", &self.timeout)
      .finish()
  }
}
