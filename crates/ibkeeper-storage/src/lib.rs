//! ibkeeper Storage
//!
//! Everything that happens to a backup artifact after it is written:
//!
//! - [`ObjectStore`] is the remote storage boundary, with an S3
//!   implementation ([`S3Store`], multipart above a size threshold) and a
//!   filesystem one ([`FsObjectStore`]).
//! - [`UploadTask`] and [`ReplicationTask`] are follow-ups run off successful
//!   backup results.
//! - [`retention`] deletes expired artifacts locally, on replicas and
//!   remotely; [`RotationTask`] runs it per unit.
//!
//! Artifacts live at `<root>/<unit>/<unit>_<timestamp>.<ext>` locally and at
//! `<prefix>/<unit>/<file>` remotely, see [`artifact`].

pub mod artifact;
mod error;
mod fs;
mod replication;
pub mod retention;
mod s3;
mod store;
mod upload;

pub use error::StorageError;
pub use fs::FsObjectStore;
pub use replication::ReplicationTask;
pub use retention::{RemoteRetention, RotationReport, RotationTask};
pub use s3::S3Store;
pub use store::{ObjectInfo, ObjectStore};
pub use upload::UploadTask;
