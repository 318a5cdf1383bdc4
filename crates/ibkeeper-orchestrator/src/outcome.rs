use chrono::{DateTime, Utc};
use ibkeeper_task::{TaskKind, TaskResult};

/// Everything one run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
  /// One result per unit that produced one, in completion order.
  pub primary: Vec<TaskResult>,
  /// Results of follow-up tasks, in completion order.
  pub follow_ups: Vec<TaskResult>,
  /// Worklist units with no primary result, even after the re-drive.
  pub missing: Vec<String>,
  pub started_at: DateTime<Utc>,
  pub finished_at: DateTime<Utc>,
}

impl RunOutcome {
  /// Follow-up results of one kind.
  pub fn follow_ups_of(&self, kind: TaskKind) -> Vec<TaskResult> {
    self
      .follow_ups
      .iter()
      .filter(|r| r.kind == kind)
      .cloned()
      .collect()
  }

  pub fn succeeded(&self) -> usize {
    self.primary.iter().filter(|r| r.succeeded).count()
  }

  pub fn failed(&self) -> usize {
    self.primary.len() - self.succeeded()
  }
}
