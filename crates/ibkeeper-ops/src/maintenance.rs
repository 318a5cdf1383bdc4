use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Local, Utc};
use ibkeeper_cluster::Dbms;
use ibkeeper_command::{CommandSpec, RetryBudget, run_with_retry};
use ibkeeper_task::{TaskKind, TaskResult, UnitTask};
use tracing::{info, instrument, warn};

use crate::context::{OpsContext, split_host_port};
use crate::error::OpsError;

/// Routine upkeep that does not need exclusive access: trimming the event
/// log and, for PostgreSQL units, `vacuumdb --analyze`.
pub struct MaintenanceTask {
  ctx: OpsContext,
}

impl MaintenanceTask {
  pub fn new(ctx: OpsContext) -> Self {
    Self { ctx }
  }

  async fn maintain(&self, unit: &str) -> Result<Vec<String>, OpsError> {
    let settings = &self.ctx.settings.maintenance;
    let budget = RetryBudget::new(settings.retries, settings.retry_delay());
    let mut done = Vec::new();

    let before = (Local::now() - ChronoDuration::days(i64::from(settings.event_log_retention_days)))
      .format("%Y-%m-%d")
      .to_string();
    let reduce = self
      .ctx
      .designer(unit, "maintenance", settings.timeout())
      .reduce_event_log(&before);
    self.run_step("reduce event log", unit, &reduce, budget).await?;
    done.push(format!("event log trimmed before {}", before));

    if settings.vacuum {
      let info = self.ctx.cluster.unit_info(unit).await?;
      if info.dbms == Dbms::PostgreSql {
        let password = self.ctx.database_password(&info.db_user, &info.db_server)?;
        let (host, port) = split_host_port(&info.db_server);
        let mut vacuum = CommandSpec::new(&settings.vacuumdb_path, settings.timeout())
          .arg(format!("--host={}", host))
          .arg(format!("--username={}", info.db_user))
          .args(["--no-password", "--analyze"])
          .arg(format!("--dbname={}", info.db_name))
          .env("PGPASSWORD", password);
        if let Some(port) = port {
          vacuum = vacuum.arg(format!("--port={}", port));
        }
        self.run_step("vacuum", unit, &vacuum, budget).await?;
        done.push("database vacuumed".to_string());
      } else {
        info!(dbms = %info.dbms, "vacuum skipped for non-PostgreSQL unit");
      }
    }

    Ok(done)
  }

  async fn run_step(
    &self,
    step: &str,
    unit: &str,
    spec: &CommandSpec,
    budget: RetryBudget,
  ) -> Result<(), OpsError> {
    let ctx = &self.ctx;
    run_with_retry(step, budget, move |_| ctx.execute(unit, spec)).await?;
    info!(step, "maintenance step complete");
    Ok(())
  }
}

#[async_trait]
impl UnitTask for MaintenanceTask {
  fn kind(&self) -> TaskKind {
    TaskKind::Maintenance
  }

  #[instrument(name = "maintenance", skip_all, fields(unit = %unit_id))]
  async fn run(&self, unit_id: &str) -> TaskResult {
    let started_at = Utc::now();
    match self.maintain(unit_id).await {
      Ok(done) => TaskResult::success(unit_id, TaskKind::Maintenance, done.join("; ")).started_at(started_at),
      Err(e) => {
        warn!(error = %e, "maintenance failed");
        TaskResult::failure(unit_id, TaskKind::Maintenance, e.to_string()).started_at(started_at)
      }
    }
  }
}
