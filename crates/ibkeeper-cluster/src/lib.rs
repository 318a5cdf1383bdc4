//! ibkeeper Cluster
//!
//! The boundary between the run and the cluster that hosts the infobases.
//!
//! ```text
//! ┌──────────────────────┐   lock / terminate / unlock   ┌──────────────────┐
//! │ LockLease            │ ────────────────────────────▶ │ SerialCluster    │
//! │  acquire → release   │                               │  one call at a   │
//! │  (unlock on drop)    │                               │  time, in order  │
//! └──────────────────────┘                               └────────┬─────────┘
//!                                                                 │
//!                                                                 ▼
//!                                                     ┌──────────────────────┐
//!                                                     │ ClusterControl impl  │
//!                                                     │  RacClient / Memory  │
//!                                                     └──────────────────────┘
//! ```
//!
//! Every transport implements [`ClusterControl`]. [`SerialCluster`] wraps one
//! so that calls from many concurrent unit tasks reach it strictly one after
//! another. [`LockLease`] pairs every successful lock with an unlock on each
//! exit path.

mod control;
mod error;
mod lease;
mod memory;
mod platform;
mod rac;
mod serial;
mod types;

pub use control::{ClusterControl, discover_worklist};
pub use error::ClusterError;
pub use lease::{LeaseOptions, LockLease, with_exclusive_access};
pub use memory::{MemoryCluster, MemoryUnitState};
pub use platform::Designer;
pub use rac::{RacClient, parse_records};
pub use serial::SerialCluster;
pub use types::{Dbms, LockRequest, UnitInfo, UnitMetadata};
