mod logging;
mod run;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ibkeeper_config::Settings;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::run::{App, Operation};

/// ibkeeper - backup, maintenance and update runner for cluster infobases
#[derive(Parser)]
#[command(name = "ibkeeper")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the settings file (default: ~/.ibkeeper/settings.toml)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Back up every unit, then replicate and upload the artifacts
  Backup,
  /// Apply pending configuration updates
  Update,
  /// Trim event logs and vacuum databases
  Maintenance,
  /// Delete expired backups locally, in replicas and remotely
  Rotate,
}

impl Commands {
  fn operation(&self) -> Operation {
    match self {
      Commands::Backup => Operation::Backup,
      Commands::Update => Operation::Update,
      Commands::Maintenance => Operation::Maintenance,
      Commands::Rotate => Operation::Rotate,
    }
  }
}

fn default_config_path() -> Result<PathBuf> {
  Ok(
    dirs::home_dir()
      .context("could not determine home directory")?
      .join(".ibkeeper")
      .join("settings.toml"),
  )
}

/// Unit failures are reported, not turned into an exit status: a scheduler
/// running this unattended should only alarm on what the report says.
fn main() {
  let cli = Cli::parse();
  if let Err(e) = run(cli) {
    eprintln!("ibkeeper: {:#}", e);
  }
}

/// Errors before logging is up are returned; later ones are logged.
fn run(cli: Cli) -> Result<()> {
  let config = match cli.config {
    Some(path) => path,
    None => default_config_path()?,
  };
  let settings = Settings::load(&config).with_context(|| format!("failed to load settings from {}", config.display()))?;
  let _guard = logging::init(&settings.log.dir, &settings.log.level)?;

  if let Err(e) = execute(cli.command.operation(), settings) {
    error!("run aborted: {:#}", e);
  }
  Ok(())
}

fn execute(operation: Operation, settings: Settings) -> Result<()> {
  let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
  runtime.block_on(async move {
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupted, cancelling run");
        interrupt.cancel();
      }
    });

    let app = App::from_settings(Arc::new(settings), cancel)?;
    app.run(operation).await?;
    Ok(())
  })
}
