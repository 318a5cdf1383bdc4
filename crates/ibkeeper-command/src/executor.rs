use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::CommandError;
use crate::runner::{CommandOutput, run_command};
use crate::spec::CommandSpec;

/// Runs external commands on behalf of a unit.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
  async fn execute(
    &self,
    unit: &str,
    spec: &CommandSpec,
    cancel: &CancellationToken,
  ) -> Result<CommandOutput, CommandError>;
}

/// Executes commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

#[async_trait]
impl CommandExecutor for ProcessExecutor {
  async fn execute(
    &self,
    unit: &str,
    spec: &CommandSpec,
    cancel: &CancellationToken,
  ) -> Result<CommandOutput, CommandError> {
    run_command(unit, spec, cancel).await
  }
}

type Script = dyn Fn(&str, &CommandSpec) -> Result<String, CommandError> + Send + Sync;

/// Answers commands from a closure instead of spawning processes.
///
/// Every call is recorded with the unit it ran for. Used by tests to drive
/// task code through success, failure and timeout paths.
pub struct ScriptedExecutor {
  script: Box<Script>,
  calls: Mutex<Vec<(String, CommandSpec)>>,
}

impl ScriptedExecutor {
  /// `script` returns the captured output or the error to report.
  pub fn new<F>(script: F) -> Self
  where
    F: Fn(&str, &CommandSpec) -> Result<String, CommandError> + Send + Sync + 'static,
  {
    Self {
      script: Box::new(script),
      calls: Mutex::new(Vec::new()),
    }
  }

  /// Every command succeeds with empty output.
  pub fn succeeding() -> Self {
    Self::new(|_, _| Ok(String::new()))
  }

  pub fn calls(&self) -> Vec<(String, CommandSpec)> {
    self.lock_calls().clone()
  }

  /// Number of commands run for `unit`.
  pub fn calls_for(&self, unit: &str) -> usize {
    self.lock_calls().iter().filter(|(u, _)| u == unit).count()
  }

  fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<(String, CommandSpec)>> {
    self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
  async fn execute(
    &self,
    unit: &str,
    spec: &CommandSpec,
    cancel: &CancellationToken,
  ) -> Result<CommandOutput, CommandError> {
    if cancel.is_cancelled() {
      return Err(CommandError::Cancelled {
        program: spec.program_name(),
      });
    }
    self.lock_calls().push((unit.to_string(), spec.clone()));
    let output = (self.script)(unit, spec)?;
    Ok(CommandOutput {
      exit_code: 0,
      output,
      elapsed: Duration::ZERO,
    })
  }
}
