use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Local, Utc};
use ibkeeper_cluster::{Dbms, UnitInfo, with_exclusive_access};
use ibkeeper_command::{CommandSpec, RetryBudget, run_with_retry};
use ibkeeper_storage::artifact;
use ibkeeper_task::{TaskKind, TaskResult, UnitTask, fields};
use tracing::{debug, info, instrument, warn};

use crate::context::{OpsContext, split_host_port};
use crate::error::OpsError;

/// How an artifact is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
  /// Platform export to a `.dt` file.
  Platform,
  /// Native `pg_dump` custom-format dump.
  PgDump,
}

impl Method {
  fn as_str(&self) -> &'static str {
    match self {
      Method::Platform => "platform",
      Method::PgDump => "pg_dump",
    }
  }

  fn extension(&self) -> &'static str {
    match self {
      Method::Platform => artifact::PLATFORM_EXTENSION,
      Method::PgDump => artifact::DUMP_EXTENSION,
    }
  }
}

struct Artifact {
  path: PathBuf,
  bytes: u64,
  method: Method,
}

/// Backs up one unit under exclusive access.
///
/// PostgreSQL units are dumped with `pg_dump` when `backup.native_dump` is
/// set; everything else goes through the platform export. The whole
/// lock, export, unlock sequence is retried, so a retry takes the lock again.
pub struct BackupTask {
  ctx: OpsContext,
}

impl BackupTask {
  pub fn new(ctx: OpsContext) -> Self {
    Self { ctx }
  }

  async fn backup(&self, unit: &str) -> Result<Artifact, OpsError> {
    if self.ctx.cancel.is_cancelled() {
      return Err(OpsError::Cancelled);
    }
    let settings = &self.ctx.settings.backup;

    let native = if settings.native_dump {
      let info = self.ctx.cluster.unit_info(unit).await?;
      (info.dbms == Dbms::PostgreSql).then_some(info)
    } else {
      None
    };
    let method = if native.is_some() {
      Method::PgDump
    } else {
      Method::Platform
    };

    let dir = artifact::unit_dir(&settings.destination, unit);
    tokio::fs::create_dir_all(&dir)
      .await
      .map_err(|e| OpsError::io(&dir, e))?;
    let target = dir.join(artifact::file_name(
      unit,
      Local::now().naive_local(),
      method.extension(),
    ));

    let spec = match &native {
      Some(info) => self.pg_dump_command(info, &target)?,
      None => self
        .ctx
        .designer(unit, "backup", settings.timeout())
        .dump_infobase(&target),
    };
    debug!(method = method.as_str(), target = %target.display(), "backup command prepared");

    let budget = RetryBudget::new(settings.retries, settings.retry_delay());
    let ctx = &self.ctx;
    let spec = &spec;
    let options = ctx.lease_options();
    let options = &options;
    let outcome = run_with_retry("backup", budget, move |attempt| async move {
      debug!(attempt, "backup attempt");
      with_exclusive_access(ctx.cluster.clone(), unit, options, || ctx.execute(unit, spec)).await
    })
    .await;

    if let Err(e) = outcome {
      remove_partial(&target).await;
      return Err(e);
    }

    let bytes = tokio::fs::metadata(&target)
      .await
      .map_err(|e| OpsError::io(&target, e))?
      .len();
    Ok(Artifact {
      path: target,
      bytes,
      method,
    })
  }

  fn pg_dump_command(&self, info: &UnitInfo, target: &Path) -> Result<CommandSpec, OpsError> {
    let settings = &self.ctx.settings.backup;
    let password = self.ctx.database_password(&info.db_user, &info.db_server)?;
    let (host, port) = split_host_port(&info.db_server);

    let mut spec = CommandSpec::new(&settings.pg_dump_path, settings.timeout())
      .arg(format!("--host={}", host))
      .arg(format!("--username={}", info.db_user))
      .args(["--format=custom", "--no-password", "--verbose"])
      .arg(format!("--file={}", target.display()))
      .env("PGPASSWORD", password);
    if let Some(port) = port {
      spec = spec.arg(format!("--port={}", port));
    }
    Ok(spec.arg(&info.db_name))
  }
}

async fn remove_partial(target: &Path) {
  match tokio::fs::remove_file(target).await {
    Ok(()) => debug!(path = %target.display(), "partial artifact removed"),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
    Err(e) => warn!(path = %target.display(), error = %e, "failed to remove partial artifact"),
  }
}

#[async_trait]
impl UnitTask for BackupTask {
  fn kind(&self) -> TaskKind {
    TaskKind::Backup
  }

  #[instrument(name = "backup", skip_all, fields(unit = %unit_id))]
  async fn run(&self, unit_id: &str) -> TaskResult {
    let started_at = Utc::now();
    match self.backup(unit_id).await {
      Ok(artifact) => {
        info!(path = %artifact.path.display(), bytes = artifact.bytes, "backup complete");
        TaskResult::success(
          unit_id,
          TaskKind::Backup,
          format!("backed up to {}", artifact.path.display()),
        )
        .started_at(started_at)
        .with(fields::ARTIFACT_PATH, artifact.path.display().to_string())
        .with(fields::ARTIFACT_BYTES, artifact.bytes)
        .with(fields::METHOD, artifact.method.as_str())
      }
      Err(e) => {
        warn!(error = %e, "backup failed");
        TaskResult::failure(unit_id, TaskKind::Backup, e.to_string()).started_at(started_at)
      }
    }
  }
}
