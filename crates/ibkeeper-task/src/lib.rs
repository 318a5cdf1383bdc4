//! ibkeeper Task
//!
//! The types every stage of a run agrees on:
//!
//! - [`TaskResult`] is the outcome of one unit of work. Primary tasks
//!   (backup, maintenance, update) produce one per unit; follow-up tasks
//!   (upload, replication) produce one per successful primary result.
//! - [`Worklist`] is the filtered, de-duplicated set of units one run targets.
//! - [`UnitTask`] and [`FollowUpTask`] are the seams the orchestrator drives.

mod result;
mod task;
mod worklist;

pub use result::{TaskKind, TaskResult, fields};
pub use task::{FollowUpTask, UnitTask};
pub use worklist::Worklist;
