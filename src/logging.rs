use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const LOG_FILE_PREFIX: &str = "ibkeeper.log";

const NOISY_TARGETS: &[&str] = &["aws_config", "aws_smithy_runtime", "aws_smithy_http", "hyper", "h2", "rustls", "lettre"];

/// `RUST_LOG` wins over the configured level; third-party chatter is kept at
/// `warn` either way.
fn env_filter(level: &str) -> Result<EnvFilter> {
  let base = std::env::var("RUST_LOG")
    .ok()
    .filter(|value| !value.trim().is_empty())
    .unwrap_or_else(|| level.to_string());

  let mut directives = vec![base];
  directives.extend(NOISY_TARGETS.iter().map(|target| format!("{}=warn", target)));
  let filter = directives.join(",");
  EnvFilter::try_new(&filter).with_context(|| format!("invalid log filter '{}'", filter))
}

/// Install the console layer and a daily rolling file under `dir`.
///
/// Keep the returned guard alive until exit or buffered lines are lost.
pub fn init(dir: &Path, level: &str) -> Result<WorkerGuard> {
  std::fs::create_dir_all(dir).with_context(|| format!("failed to create log directory {}", dir.display()))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX));

  let console = tracing_subscriber::fmt::layer()
    .with_writer(std::io::stderr)
    .with_target(false)
    .with_filter(env_filter(level)?);
  let file = tracing_subscriber::fmt::layer()
    .with_ansi(false)
    .with_writer(writer)
    .with_filter(env_filter(level)?);

  tracing_subscriber::registry()
    .with(console)
    .with(file)
    .try_init()
    .context("logging already initialized")?;
  Ok(guard)
}
