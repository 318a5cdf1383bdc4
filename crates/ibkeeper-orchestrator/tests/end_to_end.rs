//! Backup run over a small fleet: one unit's export keeps failing, the
//! others are backed up and uploaded.

use std::path::Path;
use std::sync::Arc;

use ibkeeper_cluster::{Dbms, MemoryCluster, UnitInfo};
use ibkeeper_command::{CommandError, CommandSpec, RetryBudget, ScriptedExecutor};
use ibkeeper_config::Settings;
use ibkeeper_ops::{BackupTask, OpsContext};
use ibkeeper_orchestrator::Orchestrator;
use ibkeeper_report::{analyze, analyze_uploads};
use ibkeeper_storage::{FsObjectStore, UploadTask};
use ibkeeper_task::{TaskKind, Worklist};
use tokio_util::sync::CancellationToken;

fn fleet(units: &[&str]) -> Arc<MemoryCluster> {
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

/// Writes the export target for every unit except `broken`, which exits 1.
fn exporter(broken: &'static str) -> ScriptedExecutor {
  ScriptedExecutor::new(move |unit, spec: &CommandSpec| {
    if unit == broken {
      return Err(CommandError::Failed {
        program: spec.program_name(),
        exit_code: 1,
        output: "database is locked by another process".to_string(),
      });
    }
    let target = spec
      .args
      .iter()
      .position(|a| a == "/DumpIB")
      .map(|i| spec.args[i + 1].clone())
      .expect("backup command names its target");
    std::fs::write(Path::new(&target), b"infobase-dump").expect("write artifact");
    Ok(String::new())
  })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_backup_with_one_failing_unit() {
  let dir = tempfile::tempdir().unwrap();
  let mut settings = Settings::default();
  settings.backup.destination = dir.path().join("backups");
  settings.backup.command_log_dir = dir.path().join("logs");
  settings.backup.retries = 2;
  settings.backup.retry_delay_secs = 0;
  settings.cluster.terminate_delay_secs = 0;

  let cluster = fleet(&["a", "b", "c"]);
  let executor = Arc::new(exporter("b"));
  let ctx = OpsContext::new(
    Arc::new(settings),
    cluster.clone(),
    executor.clone(),
    CancellationToken::new(),
  );

  let remote = dir.path().join("remote");
  let upload = UploadTask::new(
    Arc::new(FsObjectStore::new(&remote)),
    "backups",
    RetryBudget::none(),
  );
  let worklist = Worklist::new(["a", "b", "c"]);
  let outcome = Orchestrator::new(2)
    .with_follow_up(Arc::new(upload), 2)
    .run_all(&worklist, Arc::new(BackupTask::new(ctx)))
    .await;

  assert_eq!(outcome.primary.len(), 3);
  assert!(outcome.missing.is_empty());
  let failed: Vec<_> = outcome
    .primary
    .iter()
    .filter(|r| !r.succeeded)
    .map(|r| r.unit_id.as_str())
    .collect();
  assert_eq!(failed, ["b"]);
  assert!(outcome.primary.iter().all(|r| r.kind == TaskKind::Backup));

  let summary = analyze(&outcome.primary, &worklist, outcome.started_at, outcome.finished_at);
  assert_eq!(summary.headline(), "2 succeeded; 1 failed");
  assert!(summary.failed[0].message.contains("database is locked"));

  let mut uploaded: Vec<_> = outcome
    .follow_ups_of(TaskKind::Upload)
    .iter()
    .map(|r| r.unit_id.clone())
    .collect();
  uploaded.sort();
  assert_eq!(uploaded, ["a", "c"]);
  let uploads = analyze_uploads(&outcome.follow_ups_of(TaskKind::Upload));
  assert_eq!(uploads.succeeded, 2);
  assert_eq!(uploads.total_bytes, 2 * b"infobase-dump".len() as u64);
  assert!(remote.join("backups/a").is_dir());
  assert!(!remote.join("backups/b").exists());

  // "b" was tried three times, each attempt under its own lock.
  assert_eq!(executor.calls_for("b"), 3);
  for unit in ["a", "b", "c"] {
    let state = cluster.state(unit).unwrap();
    assert_eq!(state.lock_calls, state.unlock_calls, "{}", unit);
    assert!(!state.sessions_deny, "{} left locked", unit);
  }
  assert_eq!(cluster.state("b").unwrap().lock_calls, 3);

  // No partial artifact is left behind for the failed unit.
  let leftovers = std::fs::read_dir(dir.path().join("backups/b"))
    .map(|entries| entries.count())
    .unwrap_or(0);
  assert_eq!(leftovers, 0);
}
