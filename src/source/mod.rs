//! Source-side discovery and read pipeline.
//!
//! Discovery walks the configured roots for partition directories
//! (`lister`, `searcher`), one `ReaderManager` per discovered partition
//! pumps records out of its objects (`reader`, `manager`), and the
//! `service` keeps the registry of managers that a poll fans out over.

pub mod lister;
pub mod manager;
pub mod partition;
pub mod reader;
pub mod searcher;
pub mod service;

pub use lister::{ContinueFrom, DirectoryFindConfig, DirectoryFindResult};
pub use manager::{PollBatch, PolledRecord, ReaderManager};
pub use partition::{owned_routes, PartitionExtractor};
pub use reader::{FormatReader, ResultReader, SourceData};
pub use searcher::{PartitionSearcher, PartitionSearcherResponse};
pub use service::{ManagerFactory, ReaderManagerService};
