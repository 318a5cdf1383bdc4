use std::any::Any;
use std::sync::Arc;

use chrono::Utc;
use ibkeeper_task::{FollowUpTask, TaskKind, TaskResult, UnitTask, Worklist};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::outcome::RunOutcome;

/// A follow-up and the gate bounding how many run at once.
struct FollowUpStage {
  task: Arc<dyn FollowUpTask>,
  gate: Arc<Semaphore>,
}

/// Runs a unit task over a worklist with bounded parallelism.
///
/// Each unit is run at most once at a time, in its own tokio task, behind a
/// shared admission gate. Follow-up stages start as soon as a primary result
/// succeeds, each behind its own gate, while the remaining units keep
/// running.
pub struct Orchestrator {
  concurrency: usize,
  follow_ups: Vec<FollowUpStage>,
  cancel: CancellationToken,
}

impl Orchestrator {
  pub fn new(concurrency: usize) -> Self {
    Self {
      concurrency: concurrency.max(1),
      follow_ups: Vec::new(),
      cancel: CancellationToken::new(),
    }
  }

  /// Run `task` for every successful primary result, at most `concurrency`
  /// at a time.
  pub fn with_follow_up(mut self, task: Arc<dyn FollowUpTask>, concurrency: usize) -> Self {
    self.follow_ups.push(FollowUpStage {
      task,
      gate: Arc::new(Semaphore::new(concurrency.max(1))),
    });
    self
  }

  /// Stop admitting units once `cancel` fires. Units not yet started get a
  /// failed result.
  pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }

  /// Run `task` over `worklist` and wait for every follow-up to finish.
  pub async fn run_all(&self, worklist: &Worklist, task: Arc<dyn UnitTask>) -> RunOutcome {
    let started_at = Utc::now();
    info!(
      kind = %task.kind(),
      units = worklist.len(),
      concurrency = self.concurrency,
      "run started"
    );

    let gate = Arc::new(Semaphore::new(self.concurrency));
    let mut follow_ups = JoinSet::new();

    let mut primary = self
      .drive(worklist.units(), &task, &gate, &mut follow_ups)
      .await;

    let missing = worklist.missing_from(&primary);
    if !missing.is_empty() && !self.cancel.is_cancelled() {
      warn!(missing = ?missing, "units produced no result, driving them once more");
      let redriven = self.drive(&missing, &task, &gate, &mut follow_ups).await;
      primary.extend(redriven);
    }
    let missing = worklist.missing_from(&primary);
    if !missing.is_empty() {
      error!(missing = ?missing, "units still without a result");
    }

    let mut follow_up_results = Vec::new();
    while let Some(joined) = follow_ups.join_next().await {
      match joined {
        Ok(result) => follow_up_results.push(result),
        Err(e) => error!(error = %e, "follow-up task lost"),
      }
    }

    let outcome = RunOutcome {
      primary,
      follow_ups: follow_up_results,
      missing,
      started_at,
      finished_at: Utc::now(),
    };
    info!(
      succeeded = outcome.succeeded(),
      failed = outcome.failed(),
      missing = outcome.missing.len(),
      follow_ups = outcome.follow_ups.len(),
      "run finished"
    );
    outcome
  }

  /// One pass over `units` in a fresh join set.
  async fn drive(
    &self,
    units: &[String],
    task: &Arc<dyn UnitTask>,
    gate: &Arc<Semaphore>,
    follow_ups: &mut JoinSet<TaskResult>,
  ) -> Vec<TaskResult> {
    let kind = task.kind();
    let mut set = JoinSet::new();

    for unit in units {
      let unit = unit.clone();
      let task = task.clone();
      let gate = gate.clone();
      let cancel = self.cancel.clone();

      set.spawn(async move {
        let permit = tokio::select! {
          biased;
          _ = cancel.cancelled() => None,
          permit = gate.acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
          return Some(TaskResult::failure(unit, kind, "cancelled before start"));
        };
        run_isolated(task, unit).await
      });
    }

    let mut results = Vec::with_capacity(units.len());
    while let Some(joined) = set.join_next().await {
      match joined {
        Ok(Some(result)) => {
          if result.succeeded {
            for stage in &self.follow_ups {
              self.spawn_follow_up(follow_ups, stage, result.clone());
            }
          }
          results.push(result);
        }
        Ok(None) => {}
        Err(e) => error!(error = %e, "unit task lost"),
      }
    }
    results
  }

  fn spawn_follow_up(&self, set: &mut JoinSet<TaskResult>, stage: &FollowUpStage, primary: TaskResult) {
    let task = stage.task.clone();
    let gate = stage.gate.clone();
    let cancel = self.cancel.clone();

    set.spawn(async move {
      let unit = primary.unit_id.clone();
      let kind = task.kind();
      let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        permit = gate.acquire_owned() => permit.ok(),
      };
      let Some(_permit) = permit else {
        return TaskResult::failure(unit, kind, "cancelled before start");
      };

      let inner = tokio::spawn(async move { task.run(&primary).await });
      match inner.await {
        Ok(result) => result,
        Err(e) => crashed(&unit, kind, e),
      }
    });
  }
}

/// Run one unit in its own task so that a panic is contained.
///
/// Returns `None` when the task handed back a result for another unit: the
/// unit counts as missing.
async fn run_isolated(task: Arc<dyn UnitTask>, unit: String) -> Option<TaskResult> {
  let kind = task.kind();
  let inner_unit = unit.clone();
  let inner = tokio::spawn(async move { task.run(&inner_unit).await });

  match inner.await {
    Ok(result) if result.unit_id == unit => Some(result),
    Ok(result) => {
      error!(unit = %unit, reported = %result.unit_id, "task reported a result for another unit, discarded");
      None
    }
    Err(e) => Some(crashed(&unit, kind, e)),
  }
}

fn crashed(unit: &str, kind: TaskKind, e: JoinError) -> TaskResult {
  let message = if e.is_panic() {
    format!("task panicked: {}", panic_message(e.into_panic()))
  } else {
    format!("task aborted: {}", e)
  };
  error!(unit = %unit, kind = %kind, message = %message, "unit task crashed");
  TaskResult::failure(unit, kind, message)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;
  use std::sync::Mutex;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  use async_trait::async_trait;

  /// A unit task driven by a closure, tracking calls and peak parallelism.
  struct Scripted<F> {
    behaviour: F,
    calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
  }

  fn scripted<F>(behaviour: F) -> Arc<Scripted<F>>
  where
    F: Fn(&str, usize) -> TaskResult + Send + Sync,
  {
    Arc::new(Scripted {
      behaviour,
      calls: Mutex::new(HashMap::new()),
      in_flight: AtomicUsize::new(0),
      peak: AtomicUsize::new(0),
    })
  }

  impl<F> Scripted<F> {
    fn calls(&self, unit: &str) -> usize {
      self.calls.lock().unwrap().get(unit).copied().unwrap_or(0)
    }
  }

  #[async_trait]
  impl<F> UnitTask for Scripted<F>
  where
    F: Fn(&str, usize) -> TaskResult + Send + Sync,
  {
    fn kind(&self) -> TaskKind {
      TaskKind::Backup
    }

    async fn run(&self, unit_id: &str) -> TaskResult {
      let call = {
        let mut calls = self.calls.lock().unwrap();
        let count = calls.entry(unit_id.to_string()).or_default();
        *count += 1;
        *count
      };
      let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
      self.peak.fetch_max(now, Ordering::SeqCst);
      tokio::time::sleep(Duration::from_millis(5)).await;
      self.in_flight.fetch_sub(1, Ordering::SeqCst);
      (self.behaviour)(unit_id, call)
    }
  }

  /// Follow-up recording the units it ran for.
  #[derive(Default)]
  struct Recorder {
    units: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
  }

  #[async_trait]
  impl FollowUpTask for Recorder {
    fn kind(&self) -> TaskKind {
      TaskKind::Upload
    }

    async fn run(&self, primary: &TaskResult) -> TaskResult {
      let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
      self.peak.fetch_max(now, Ordering::SeqCst);
      tokio::time::sleep(Duration::from_millis(5)).await;
      self.in_flight.fetch_sub(1, Ordering::SeqCst);
      self.units.lock().unwrap().push(primary.unit_id.clone());
      TaskResult::success(&primary.unit_id, TaskKind::Upload, "uploaded")
    }
  }

  fn worklist(n: usize) -> Worklist {
    Worklist::new((0..n).map(|i| format!("unit{:02}", i)))
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_all_succeed_within_concurrency() {
    let task = scripted(|unit, _| TaskResult::success(unit, TaskKind::Backup, "ok"));
    let outcome = Orchestrator::new(3).run_all(&worklist(20), task.clone()).await;

    assert_eq!(outcome.primary.len(), 20);
    assert!(outcome.primary.iter().all(|r| r.succeeded));
    assert!(outcome.missing.is_empty());
    assert!(task.peak.load(Ordering::SeqCst) <= 3);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_every_unit_panics() {
    let task = scripted(|unit, _| -> TaskResult { panic!("{} exploded", unit) });
    let outcome = Orchestrator::new(4).run_all(&worklist(10), task).await;

    assert_eq!(outcome.primary.len(), 10);
    assert!(outcome.primary.iter().all(|r| !r.succeeded));
    assert!(outcome.missing.is_empty());
    let first = outcome.primary.iter().find(|r| r.unit_id == "unit03").unwrap();
    assert_eq!(first.message, "task panicked: unit03 exploded");
  }

  #[tokio::test]
  async fn test_every_unit_fails() {
    let task = scripted(|unit, _| TaskResult::failure(unit, TaskKind::Backup, "exit code 1"));
    let outcome = Orchestrator::new(2).run_all(&worklist(5), task).await;

    assert_eq!(outcome.primary.len(), 5);
    assert_eq!(outcome.failed(), 5);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_follow_ups_only_for_successes() {
    let task = scripted(|unit, _| {
      if unit == "b" {
        TaskResult::failure(unit, TaskKind::Backup, "exit code 1")
      } else {
        TaskResult::success(unit, TaskKind::Backup, "ok")
      }
    });
    let recorder = Arc::new(Recorder::default());
    let outcome = Orchestrator::new(2)
      .with_follow_up(recorder.clone(), 1)
      .run_all(&Worklist::new(["a", "b", "c"]), task)
      .await;

    assert_eq!(outcome.primary.len(), 3);
    assert_eq!(outcome.succeeded(), 2);
    let mut uploaded = recorder.units.lock().unwrap().clone();
    uploaded.sort();
    assert_eq!(uploaded, vec!["a", "c"]);
    assert_eq!(outcome.follow_ups_of(TaskKind::Upload).len(), 2);
    assert_eq!(recorder.peak.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_missing_unit_is_redriven_once() {
    let task = scripted(|unit, call| {
      if unit == "b" && call == 1 {
        TaskResult::success("somebody-else", TaskKind::Backup, "ok")
      } else {
        TaskResult::success(unit, TaskKind::Backup, "ok")
      }
    });
    let outcome = Orchestrator::new(2)
      .run_all(&Worklist::new(["a", "b", "c"]), task.clone())
      .await;

    assert_eq!(outcome.primary.len(), 3);
    assert!(outcome.missing.is_empty());
    assert_eq!(task.calls("b"), 2);
    assert_eq!(task.calls("a"), 1);
  }

  #[tokio::test]
  async fn test_unit_missing_after_redrive_is_reported() {
    let task = scripted(|unit, _| {
      if unit == "b" {
        TaskResult::success("somebody-else", TaskKind::Backup, "ok")
      } else {
        TaskResult::success(unit, TaskKind::Backup, "ok")
      }
    });
    let outcome = Orchestrator::new(2)
      .run_all(&Worklist::new(["a", "b", "c"]), task.clone())
      .await;

    assert_eq!(outcome.primary.len(), 2);
    assert_eq!(outcome.missing, vec!["b".to_string()]);
    assert_eq!(task.calls("b"), 2);
  }

  #[tokio::test]
  async fn test_cancelled_run_admits_nothing() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let task = scripted(|unit, _| TaskResult::success(unit, TaskKind::Backup, "ok"));
    let outcome = Orchestrator::new(2)
      .with_cancellation(cancel)
      .run_all(&worklist(4), task.clone())
      .await;

    assert_eq!(outcome.primary.len(), 4);
    assert!(
      outcome
        .primary
        .iter()
        .all(|r| !r.succeeded && r.message == "cancelled before start")
    );
    assert_eq!(task.calls("unit00"), 0);
  }
}
