//! ibkeeper Ops
//!
//! The per-unit task functions. Each one implements
//! [`UnitTask`](ibkeeper_task::UnitTask) and never returns an error: every
//! failure becomes a failed [`TaskResult`](ibkeeper_task::TaskResult).
//!
//! | task | exclusive access | retried |
//! |---|---|---|
//! | [`BackupTask`] | yes | whole lock bracket, except configuration errors |
//! | [`MaintenanceTask`] | no | each command |
//! | [`UpdateTask`] | yes, per package | each package |

mod backup;
mod context;
mod error;
mod maintenance;
mod update;

pub use backup::BackupTask;
pub use context::OpsContext;
pub use error::OpsError;
pub use maintenance::MaintenanceTask;
pub use update::{UpdatePackage, UpdateTask, find_package};
