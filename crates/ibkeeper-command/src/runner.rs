//! External process execution.

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use std::io::SeekFrom;

use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::CommandError;
use crate::spec::CommandSpec;

/// Upper bound on draining stdout/stderr after the process is gone. A
/// grandchild that inherited the pipes can keep them open indefinitely.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Bytes kept from the end of stdout, of stderr and of the process log.
/// Earlier output is read and discarded.
const OUTPUT_TAIL_BYTES: usize = 16 * 1024;

/// Result of a process that exited with code 0.
#[derive(Debug, Clone)]
pub struct CommandOutput {
  pub exit_code: i32,
  /// Process log followed by stdout and stderr.
  pub output: String,
  pub elapsed: Duration,
}

enum Outcome {
  Exited(std::io::Result<ExitStatus>),
  TimedOut,
  Cancelled,
}

/// Run one external command for `unit`.
///
/// The process log named by `spec.log_path` is removed before the start so
/// that the content read back afterwards belongs to this run only.
#[instrument(
  name = "run_command",
  skip_all,
  fields(unit = %unit, program = %spec.program_name())
)]
pub async fn run_command(
  unit: &str,
  spec: &CommandSpec,
  cancel: &CancellationToken,
) -> Result<CommandOutput, CommandError> {
  let program = spec.program_name();

  if let Some(log_path) = &spec.log_path {
    prepare_log(log_path).await;
  }

  let mut command = Command::new(&spec.program);
  command
    .args(&spec.args)
    .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

  let started = Instant::now();
  let mut child = command.spawn().map_err(|source| CommandError::Spawn {
    program: program.clone(),
    source,
  })?;
  debug!(pid = ?child.id(), "process started");

  let stdout = child
    .stdout
    .take()
    .map(|pipe| tokio::spawn(read_tail(pipe, OUTPUT_TAIL_BYTES)));
  let stderr = child
    .stderr
    .take()
    .map(|pipe| tokio::spawn(read_tail(pipe, OUTPUT_TAIL_BYTES)));

  let outcome = tokio::select! {
    status = child.wait() => Outcome::Exited(status),
    _ = tokio::time::sleep(spec.timeout) => Outcome::TimedOut,
    _ = cancel.cancelled() => Outcome::Cancelled,
  };

  match outcome {
    Outcome::TimedOut => warn!(timeout = ?spec.timeout, "process timed out, terminating"),
    Outcome::Cancelled => info!("run cancelled, terminating process"),
    Outcome::Exited(_) => {}
  }
  if !matches!(outcome, Outcome::Exited(_)) {
    terminate(&mut child, spec.kill_grace).await;
  }

  let output = collect_output(spec, stdout, stderr).await;
  let elapsed = started.elapsed();

  match outcome {
    Outcome::Exited(Ok(status)) => {
      let exit_code = status.code().unwrap_or(-1);
      debug!(exit_code, elapsed_ms = elapsed.as_millis() as u64, "process exited");
      if status.success() {
        Ok(CommandOutput {
          exit_code,
          output,
          elapsed,
        })
      } else {
        Err(CommandError::Failed {
          program,
          exit_code,
          output,
        })
      }
    }
    Outcome::Exited(Err(source)) => Err(CommandError::Io { program, source }),
    Outcome::TimedOut => Err(CommandError::TimedOut {
      program,
      timeout: spec.timeout,
      output,
    }),
    Outcome::Cancelled => Err(CommandError::Cancelled { program }),
  }
}

async fn prepare_log(log_path: &std::path::Path) {
  if let Some(parent) = log_path.parent()
    && let Err(e) = fs::create_dir_all(parent).await
  {
    warn!(path = %parent.display(), error = %e, "failed to create log directory");
  }
  match fs::remove_file(log_path).await {
    Ok(()) => {}
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
    Err(e) => warn!(path = %log_path.display(), error = %e, "failed to remove stale process log"),
  }
}

/// Ask the process to stop, then kill it if it does not exit within `grace`.
/// Failures are logged, never returned.
async fn terminate(child: &mut Child, grace: Duration) {
  if request_termination(child) {
    match tokio::time::timeout(grace, child.wait()).await {
      Ok(Ok(status)) => {
        info!(?status, "process terminated");
        return;
      }
      Ok(Err(e)) => warn!(error = %e, "failed waiting for terminated process"),
      Err(_) => warn!(grace = ?grace, "process ignored termination request"),
    }
  }

  match child.kill().await {
    Ok(()) => info!("process killed"),
    Err(e) => warn!(error = %e, "failed to kill process"),
  }
}

#[cfg(unix)]
fn request_termination(child: &Child) -> bool {
  use nix::sys::signal::{Signal, kill};
  use nix::unistd::Pid;

  let Some(pid) = child.id() else {
    return false;
  };
  match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
    Ok(()) => true,
    Err(e) => {
      warn!(pid, error = %e, "failed to send SIGTERM");
      false
    }
  }
}

#[cfg(not(unix))]
fn request_termination(_child: &Child) -> bool {
  false
}

/// The end of a stream and how much came before it.
#[derive(Debug, Default)]
struct Tail {
  bytes: Vec<u8>,
  omitted: u64,
}

impl Tail {
  fn keep_last(&mut self, limit: usize) {
    if self.bytes.len() > limit {
      let excess = self.bytes.len() - limit;
      self.bytes.drain(..excess);
      self.omitted += excess as u64;
    }
  }

  fn into_text(self) -> String {
    let text = decode(&self.bytes);
    if self.omitted == 0 {
      text
    } else {
      format!("[{} bytes omitted]\n{}", self.omitted, text)
    }
  }
}

/// Read `reader` to the end, keeping only the last `limit` bytes.
async fn read_tail<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> Tail {
  let mut tail = Tail::default();
  let mut chunk = vec![0u8; 8 * 1024];
  loop {
    match reader.read(&mut chunk).await {
      Ok(0) => break,
      Ok(n) => {
        tail.bytes.extend_from_slice(&chunk[..n]);
        if tail.bytes.len() > limit * 2 {
          tail.keep_last(limit);
        }
      }
      Err(e) => {
        debug!(error = %e, "stopped reading process output");
        break;
      }
    }
  }
  tail.keep_last(limit);
  tail
}

async fn drain(handle: Option<JoinHandle<Tail>>) -> String {
  let Some(handle) = handle else {
    return String::new();
  };
  match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, handle).await {
    Ok(Ok(tail)) => tail.into_text(),
    Ok(Err(e)) => {
      debug!(error = %e, "output reader failed");
      String::new()
    }
    Err(_) => {
      debug!("output pipe still open, giving up");
      String::new()
    }
  }
}

/// Last `limit` bytes of the process log.
async fn read_log_tail(path: &std::path::Path, limit: usize) -> std::io::Result<Tail> {
  let mut file = fs::File::open(path).await?;
  let skip = file.metadata().await?.len().saturating_sub(limit as u64);
  if skip > 0 {
    file.seek(SeekFrom::Start(skip)).await?;
  }
  let mut tail = read_tail(file, limit).await;
  tail.omitted += skip;
  Ok(tail)
}

async fn collect_output(
  spec: &CommandSpec,
  stdout: Option<JoinHandle<Tail>>,
  stderr: Option<JoinHandle<Tail>>,
) -> String {
  let log = match &spec.log_path {
    Some(path) => match read_log_tail(path, OUTPUT_TAIL_BYTES).await {
      Ok(tail) => tail.into_text(),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
      Err(e) => {
        warn!(path = %path.display(), error = %e, "failed to read process log");
        String::new()
      }
    },
    None => String::new(),
  };
  let stdout = drain(stdout).await;
  let stderr = drain(stderr).await;

  [log, stdout, stderr]
    .iter()
    .map(|part| part.trim())
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join("\n")
}

fn decode(bytes: &[u8]) -> String {
  let text = String::from_utf8_lossy(bytes);
  text.trim_start_matches('\u{feff}').to_string()
}
