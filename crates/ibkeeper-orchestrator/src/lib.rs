//! ibkeeper Orchestrator
//!
//! Runs one [`UnitTask`](ibkeeper_task::UnitTask) over a whole worklist.
//!
//! ```text
//!  worklist ──▶ admission gate (N) ──▶ unit task ──▶ result
//!                                          │
//!                         succeeded ───────┴──▶ follow-up gate (M) ──▶ upload
//!                                          └──▶ follow-up gate (K) ──▶ replication
//! ```
//!
//! Every unit runs in its own task: a panic or error in one unit becomes a
//! failed result for that unit and never touches the others. Units that end
//! up without any result are driven once more before being reported missing.

mod orchestrator;
mod outcome;

pub use orchestrator::Orchestrator;
pub use outcome::RunOutcome;
