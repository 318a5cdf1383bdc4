use async_trait::async_trait;

use crate::result::{TaskKind, TaskResult};

/// A primary unit of work, run once per worklist entry.
///
/// Implementations report every failure as a failed [`TaskResult`]; they
/// never return errors. A panic is tolerated by the orchestrator and turned
/// into a failed result for the unit.
#[async_trait]
pub trait UnitTask: Send + Sync {
  /// The kind recorded on every result this task produces.
  fn kind(&self) -> TaskKind;

  /// Run the task for one unit.
  async fn run(&self, unit_id: &str) -> TaskResult;
}

/// Secondary work derived from a successful primary result.
#[async_trait]
pub trait FollowUpTask: Send + Sync {
  fn kind(&self) -> TaskKind;

  /// Run the follow-up for the unit named by `primary`.
  async fn run(&self, primary: &TaskResult) -> TaskResult;
}
