//! drift: object-store source connector core.
//!
//! Ingests objects from S3-compatible storage into a downstream record
//! stream. Given a set of configured roots, the pipeline repeatedly
//! discovers partition directories, manages one reader per partition, and
//! produces ordered, resumable batches of records whose offsets live in
//! the host's offset store.

pub mod clock;
pub mod config;
pub mod error;
pub mod location;
pub mod source;
pub mod storage;
pub mod task;

pub use clock::{Clock, ClockRef, SystemClock};
pub use config::{FormatKind, Route, SourceConfig};
pub use error::{ConfigError, StorageError, TaskError};
pub use location::{PathLocation, PathWithLine, RootLocation, SourceOffset, SourcePartitionKey};
pub use source::SourceData;
pub use storage::{ObjectStorage, ObjectStorageRef};
pub use task::{ContextOffsetFn, PollOutcome, SourceRecord, SourceTask};
