use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use ibkeeper_cluster::{ClusterControl, RacClient, SerialCluster, discover_worklist};
use ibkeeper_command::{CommandExecutor, ProcessExecutor, RetryBudget};
use ibkeeper_config::{Settings, UploadBackend, UploadSettings};
use ibkeeper_ops::{BackupTask, MaintenanceTask, OpsContext, UpdateTask};
use ibkeeper_orchestrator::{Orchestrator, RunOutcome};
use ibkeeper_report::{Notifier, Summary, UploadSummary, analyze, analyze_uploads, notifier_for, render_html};
use ibkeeper_storage::{
  FsObjectStore, ObjectStore, RemoteRetention, ReplicationTask, RotationTask, S3Store, UploadTask,
};
use ibkeeper_task::{TaskKind, UnitTask, Worklist};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What a run does to every unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
  Backup,
  Update,
  Maintenance,
  Rotate,
}

impl fmt::Display for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Operation::Backup => "backup",
      Operation::Update => "update",
      Operation::Maintenance => "maintenance",
      Operation::Rotate => "rotate",
    })
  }
}

/// What one run produced, after analysis.
pub struct RunReport {
  pub outcome: RunOutcome,
  pub summary: Summary,
  pub uploads: Option<UploadSummary>,
  pub html: String,
}

/// Collaborators shared by every unit of a run.
pub struct App {
  settings: Arc<Settings>,
  cluster: Arc<dyn ClusterControl>,
  executor: Arc<dyn CommandExecutor>,
  notifier: Arc<dyn Notifier>,
  cancel: CancellationToken,
}

impl App {
  /// Production wiring: real processes, `rac` serialized behind one worker,
  /// notification as configured.
  pub fn from_settings(settings: Arc<Settings>, cancel: CancellationToken) -> Result<Self> {
    let executor: Arc<dyn CommandExecutor> = Arc::new(ProcessExecutor);
    let rac = RacClient::new(&settings, executor.clone(), cancel.clone());
    let cluster: Arc<dyn ClusterControl> = Arc::new(SerialCluster::spawn(rac));
    let notifier = notifier_for(&settings.notify).context("failed to set up notification")?;
    Ok(Self::new(settings, cluster, executor, notifier, cancel))
  }

  pub fn new(
    settings: Arc<Settings>,
    cluster: Arc<dyn ClusterControl>,
    executor: Arc<dyn CommandExecutor>,
    notifier: Arc<dyn Notifier>,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      settings,
      cluster,
      executor,
      notifier,
      cancel,
    }
  }

  fn ops_context(&self) -> OpsContext {
    OpsContext::new(
      self.settings.clone(),
      self.cluster.clone(),
      self.executor.clone(),
      self.cancel.clone(),
    )
  }

  /// Units this run targets. In debug mode without an include list only the
  /// first discovered unit is kept.
  pub async fn worklist(&self) -> Result<Worklist> {
    let cluster = &self.settings.cluster;
    let worklist = discover_worklist(self.cluster.as_ref(), &cluster.include, &cluster.exclude)
      .await
      .context("failed to list cluster units")?;
    if self.settings.debug && cluster.include.is_empty() {
      info!("debug mode, restricting run to the first unit");
      return Ok(worklist.truncated(1));
    }
    Ok(worklist)
  }

  async fn remote_store(&self) -> Arc<dyn ObjectStore> {
    let upload = &self.settings.upload;
    match upload.backend {
      UploadBackend::S3 => Arc::new(S3Store::from_settings(upload).await),
      UploadBackend::Fs => Arc::new(FsObjectStore::new(&upload.root)),
    }
  }

  async fn orchestrate(&self, operation: Operation) -> (Orchestrator, Arc<dyn UnitTask>) {
    let settings = &self.settings;
    let orchestrator = |concurrency| Orchestrator::new(concurrency).with_cancellation(self.cancel.clone());

    match operation {
      Operation::Backup => {
        let mut orchestrator = orchestrator(settings.backup.concurrency);
        if !settings.backup.replication_paths.is_empty() {
          orchestrator = orchestrator.with_follow_up(
            Arc::new(ReplicationTask::new(settings.backup.replication_paths.clone())),
            settings.backup.replication_concurrency,
          );
        }
        if settings.upload.enabled {
          let upload = upload_task(&settings.upload, self.remote_store().await);
          orchestrator = orchestrator.with_follow_up(Arc::new(upload), settings.upload.concurrency);
        }
        (orchestrator, Arc::new(BackupTask::new(self.ops_context())))
      }
      Operation::Update => (
        orchestrator(settings.update.concurrency),
        Arc::new(UpdateTask::new(self.ops_context())),
      ),
      Operation::Maintenance => (
        orchestrator(settings.maintenance.concurrency),
        Arc::new(MaintenanceTask::new(self.ops_context())),
      ),
      Operation::Rotate => {
        let mut roots = vec![settings.backup.destination.clone()];
        roots.extend(settings.backup.replication_paths.iter().cloned());
        let mut task = RotationTask::new(roots, settings.backup.retention_days);
        if settings.upload.enabled {
          task = task.with_remote(RemoteRetention {
            store: self.remote_store().await,
            prefix: settings.upload.prefix.clone(),
            retention_days: settings.upload.retention_days,
          });
        }
        (orchestrator(settings.maintenance.concurrency), Arc::new(task))
      }
    }
  }

  /// Run `operation` over the worklist, analyze the results and notify.
  ///
  /// Unit failures end up in the report; only setup failures are errors.
  pub async fn run(&self, operation: Operation) -> Result<RunReport> {
    let worklist = self.worklist().await?;
    let (orchestrator, task) = self.orchestrate(operation).await;
    let outcome = orchestrator.run_all(&worklist, task).await;

    let summary = analyze(&outcome.primary, &worklist, outcome.started_at, outcome.finished_at);
    let upload_results = outcome.follow_ups_of(TaskKind::Upload);
    let uploads = (operation == Operation::Backup && self.settings.upload.enabled)
      .then(|| analyze_uploads(&upload_results));

    let html = render_html(
      &operation.to_string(),
      &summary,
      &outcome.primary,
      uploads.as_ref().map(|u| (u, upload_results.as_slice())),
    )
    .context("failed to render report")?;

    let subject = format!("{}: {}", operation, summary.headline());
    info!(%operation, outcome = %summary.headline(), "run finished");
    if let Err(e) = self.notifier.send(&subject, &html).await {
      warn!(error = %e, "failed to send report");
    }

    Ok(RunReport {
      outcome,
      summary,
      uploads,
      html,
    })
  }
}

fn upload_task(settings: &UploadSettings, store: Arc<dyn ObjectStore>) -> UploadTask {
  UploadTask::new(
    store,
    settings.prefix.clone(),
    RetryBudget::new(settings.retries, settings.retry_delay()),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::Path;
  use std::sync::Mutex;

  use async_trait::async_trait;
  use ibkeeper_cluster::{Dbms, MemoryCluster, UnitInfo};
  use ibkeeper_command::{CommandError, CommandSpec, ScriptedExecutor};
  use ibkeeper_report::NotifyError;
  use ibkeeper_task::fields;

  #[derive(Default)]
  struct Outbox(Mutex<Vec<(String, String)>>);

  #[async_trait]
  impl Notifier for Outbox {
    async fn send(&self, subject: &str, html: &str) -> Result<(), NotifyError> {
      self
        .0
        .lock()
        .unwrap()
        .push((subject.to_string(), html.to_string()));
      Ok(())
    }
  }

  fn cluster(units: &[&str]) -> Arc<MemoryCluster> {
    let cluster = MemoryCluster::new();
    for unit in units {
      cluster.add_unit(UnitInfo {
        name: unit.to_string(),
        dbms: Dbms::MsSqlServer,
        db_server: "db01".to_string(),
        db_name: unit.to_string(),
        db_user: "sa".to_string(),
      });
    }
    Arc::new(cluster)
  }

  /// Writes the export target, failing for `broken`.
  fn exporting(broken: &'static str) -> ScriptedExecutor {
    ScriptedExecutor::new(move |unit, spec: &CommandSpec| {
      if unit == broken {
        return Err(CommandError::Failed {
          program: spec.program_name(),
          exit_code: 1,
          output: "infobase is damaged".to_string(),
        });
      }
      if let Some(i) = spec.args.iter().position(|a| a == "/DumpIB") {
        std::fs::write(Path::new(&spec.args[i + 1]), b"dt").unwrap();
      }
      Ok(String::new())
    })
  }

  fn settings(dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.backup.destination = dir.join("backups");
    settings.backup.command_log_dir = dir.join("logs");
    settings.backup.concurrency = 2;
    settings.backup.retries = 0;
    settings.cluster.terminate_delay_secs = 0;
    settings.upload.enabled = true;
    settings.upload.backend = UploadBackend::Fs;
    settings.upload.root = dir.join("remote");
    settings.upload.retry_delay_secs = 0;
    settings
  }

  #[tokio::test]
  async fn test_backup_run_reports_and_notifies() {
    let dir = tempfile::tempdir().unwrap();
    let outbox = Arc::new(Outbox::default());
    let app = App::new(
      Arc::new(settings(dir.path())),
      cluster(&["a", "b", "c"]),
      Arc::new(exporting("b")),
      outbox.clone(),
      CancellationToken::new(),
    );

    let report = app.run(Operation::Backup).await.unwrap();

    assert_eq!(report.summary.headline(), "2 succeeded; 1 failed");
    let uploads = report.uploads.unwrap();
    assert_eq!(uploads.succeeded, 2);
    assert_eq!(uploads.total_bytes, 4);
    let uploaded: Vec<_> = report
      .outcome
      .follow_ups_of(TaskKind::Upload)
      .iter()
      .filter_map(|r| r.extra_str(fields::OBJECT_KEY).map(str::to_string))
      .collect();
    assert_eq!(uploaded.len(), 2);
    assert!(uploaded.iter().all(|key| !key.contains("/b/")));

    let sent = outbox.0.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "backup: 2 succeeded; 1 failed");
    assert!(sent[0].1.contains("infobase is damaged"));
  }

  #[tokio::test]
  async fn test_debug_mode_keeps_first_unit() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(dir.path());
    settings.debug = true;
    let app = App::new(
      Arc::new(settings),
      cluster(&["a", "b", "c"]),
      Arc::new(ScriptedExecutor::succeeding()),
      Arc::new(Outbox::default()),
      CancellationToken::new(),
    );

    let worklist = app.worklist().await.unwrap();
    assert_eq!(worklist.units(), ["a".to_string()]);
  }
}
