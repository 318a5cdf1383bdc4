//! ibkeeper Command
//!
//! Runs one external operation per call:
//!
//! - [`CommandSpec`] describes the process: program, arguments, environment
//!   overrides, the log file the process writes and its timeout.
//! - [`run_command`] spawns it, enforces the timeout (graceful termination,
//!   then a forced kill), folds the process log into the captured output
//!   (the last 16 KiB of each stream and of the log) and classifies a
//!   non-zero exit code as [`CommandError::Failed`].
//! - [`CommandExecutor`] is the seam task code calls through;
//!   [`ProcessExecutor`] is the real implementation, [`ScriptedExecutor`]
//!   answers from a closure.
//! - [`run_with_retry`] re-runs an operation while it fails with a
//!   [`Retriable`] error and budget remains.

mod error;
mod executor;
mod retry;
mod runner;
mod spec;

pub use error::CommandError;
pub use executor::{CommandExecutor, ProcessExecutor, ScriptedExecutor};
pub use retry::{Retriable, RetryBudget, run_with_retry};
pub use runner::{CommandOutput, run_command};
pub use spec::CommandSpec;
