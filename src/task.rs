//! Host-facing source task.
//!
//! The task walks `Clean → Open → Closed`. `start` parses the properties
//! and wires up storage, searcher, and the reader manager service; each
//! `poll` fans out over the managers and returns one bounded batch of
//! source records; `close` is terminal.
//!
//! Per-partition failures do not poison a poll: the outcome carries the
//! successful partitions' records plus the first error for inspection.
//! Authorization failures are fatal and fail the poll outright.

use std::collections::HashMap;
use std::sync::Arc;

use snafu::prelude::*;
use tracing::{info, warn};

use crate::clock::{ClockRef, SystemClock};
use crate::config::{FormatKind, SourceConfig};
use crate::error::{
    AlreadyStartedSnafu, ClosedSnafu, ConfigSnafu, NotStartedSnafu, StorageError, StorageSnafu,
    TaskError,
};
use crate::location::{PathLocation, PathWithLine, RootLocation, SourceOffset, SourcePartitionKey};
use crate::source::manager::{PollBatch, ReaderManager};
use crate::source::partition::{owned_routes, PartitionExtractor};
use crate::source::reader::SourceData;
use crate::source::searcher::PartitionSearcher;
use crate::source::service::{ManagerFactory, ReaderManagerService};
use crate::storage::{ObjectStorage, ObjectStorageRef};

/// Host-held committed offsets, looked up per partition when a manager is
/// first spawned.
pub type ContextOffsetFn = Box<dyn Fn(&SourcePartitionKey) -> Option<SourceOffset> + Send + Sync>;

/// One record handed to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub topic: String,
    /// Downstream partition number from the configured extractor, if any.
    pub partition: Option<i32>,
    pub source_partition: SourcePartitionKey,
    pub offset: SourceOffset,
    pub value: SourceData,
}

/// Result of one poll.
#[derive(Debug, Default)]
pub struct PollOutcome {
    pub records: Vec<SourceRecord>,
    /// First non-fatal per-partition failure encountered, if any.
    pub error: Option<StorageError>,
}

struct OpenState {
    service: ReaderManagerService,
    /// Per-root target topic, from the parsed routes.
    topics: HashMap<RootLocation, String>,
    extractor: Arc<PartitionExtractor>,
    max_poll_records: usize,
    block_first_poll: bool,
    first_poll_done: bool,
}

enum TaskState {
    Clean,
    Open(Box<OpenState>),
    Closed,
}

/// The source connector task.
pub struct SourceTask {
    state: TaskState,
    clock: ClockRef,
}

impl Default for SourceTask {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceTask {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: ClockRef) -> Self {
        Self {
            state: TaskState::Clean,
            clock,
        }
    }

    /// Start the task: parse properties, build the S3-backed storage, and
    /// assemble the discovery/read pipeline.
    pub async fn start(
        &mut self,
        props: &HashMap<String, String>,
        offset_fn: ContextOffsetFn,
    ) -> Result<(), TaskError> {
        self.ensure_clean()?;
        let config = SourceConfig::from_props(props).context(ConfigSnafu)?;

        let buckets: Vec<&str> = config.routes.iter().map(|r| r.root.bucket()).collect();
        let storage = ObjectStorage::connect(&config.aws, buckets, config.list_page_size)
            .context(ConfigSnafu)?;

        self.open(config, Arc::new(storage), offset_fn)
    }

    /// Start with a prebuilt storage capability. Used by tests and by
    /// hosts that carry their own client plumbing.
    pub async fn start_with_storage(
        &mut self,
        props: &HashMap<String, String>,
        storage: ObjectStorageRef,
        offset_fn: ContextOffsetFn,
    ) -> Result<(), TaskError> {
        self.ensure_clean()?;
        let config = SourceConfig::from_props(props).context(ConfigSnafu)?;
        self.open(config, storage, offset_fn)
    }

    /// Pull one bounded batch of records across all partitions.
    pub async fn poll(&mut self) -> Result<PollOutcome, TaskError> {
        let now_ms = self.clock.now().timestamp_millis();
        let open = match &mut self.state {
            TaskState::Open(open) => open,
            TaskState::Clean => return NotStartedSnafu.fail(),
            TaskState::Closed => return ClosedSnafu.fail(),
        };

        if open.block_first_poll && !open.first_poll_done {
            open.service
                .run_discovery_to_completion()
                .await
                .context(StorageSnafu)?;
        }
        open.first_poll_done = true;

        let mut outcome = PollOutcome::default();
        let limit = open.max_poll_records;

        let managers = open.service.reader_managers().await.context(StorageSnafu)?;
        for manager in managers {
            let remaining = limit - outcome.records.len();
            if remaining == 0 {
                break;
            }

            let root = manager.root().clone();
            match manager.poll(remaining).await {
                Ok(Some(batch)) => {
                    let topic = open.topics.get(&root).cloned().ok_or_else(|| {
                        TaskError::Invariant {
                            message: format!("no route metadata for root {root}"),
                        }
                    })?;
                    outcome
                        .records
                        .extend(convert_batch(batch, &topic, &open.extractor, now_ms));
                }
                Ok(None) => {}
                Err(e) if e.is_fatal() => return Err(e).context(StorageSnafu),
                Err(e) => {
                    warn!(root = %root, error = %e, "Partition poll failed, will retry");
                    outcome.error.get_or_insert(e);
                }
            }
        }

        Ok(outcome)
    }

    /// Close the task: close all managers, then drop the storage handle.
    /// Idempotent once closed.
    pub async fn close(&mut self) -> Result<(), TaskError> {
        match &mut self.state {
            TaskState::Clean => NotStartedSnafu.fail(),
            TaskState::Closed => Ok(()),
            TaskState::Open(open) => {
                open.service.close_all();
                self.state = TaskState::Closed;
                info!("Source task closed");
                Ok(())
            }
        }
    }

    fn ensure_clean(&self) -> Result<(), TaskError> {
        match self.state {
            TaskState::Clean => Ok(()),
            TaskState::Open(_) => AlreadyStartedSnafu.fail(),
            TaskState::Closed => ClosedSnafu.fail(),
        }
    }

    fn open(
        &mut self,
        config: SourceConfig,
        storage: ObjectStorageRef,
        offset_fn: ContextOffsetFn,
    ) -> Result<(), TaskError> {
        let routes = owned_routes(config.routes, config.task);
        let extractor =
            Arc::new(PartitionExtractor::from_settings(&config.extractor).context(ConfigSnafu)?);

        let topics: HashMap<RootLocation, String> = routes
            .iter()
            .map(|r| (r.root.clone(), r.topic.clone()))
            .collect();
        let formats: HashMap<RootLocation, FormatKind> = routes
            .iter()
            .map(|r| (r.root.clone(), r.format))
            .collect();
        let roots: Vec<RootLocation> = routes.iter().map(|r| r.root.clone()).collect();

        let searcher = PartitionSearcher::new(
            roots,
            config.search.clone(),
            storage.clone(),
            self.clock.clone(),
        );

        let factory_storage = storage.clone();
        let factory: ManagerFactory = Box::new(move |root, prefix| {
            let format = formats.get(root).copied().unwrap_or_default();
            let offset = offset_fn(&SourcePartitionKey {
                container: root.bucket().to_string(),
                prefix: prefix.to_string(),
            })
            .map(|o| PathWithLine::new(PathLocation::new(root.bucket(), o.path), o.line));
            ReaderManager::new(
                root.clone(),
                prefix,
                format,
                factory_storage.clone(),
                offset,
            )
        });

        let service = ReaderManagerService::new(
            searcher,
            factory,
            config.search.interval,
            self.clock.clone(),
        );

        info!(
            roots = topics.len(),
            max_poll_records = config.max_poll_records,
            block = config.search.block,
            "Source task started"
        );

        self.state = TaskState::Open(Box::new(OpenState {
            service,
            topics,
            extractor,
            max_poll_records: config.max_poll_records,
            block_first_poll: config.search.block,
            first_poll_done: false,
        }));
        Ok(())
    }
}

/// Convert one manager batch into host records.
fn convert_batch(
    batch: PollBatch,
    topic: &str,
    extractor: &PartitionExtractor,
    now_ms: i64,
) -> Vec<SourceRecord> {
    let PollBatch {
        origin,
        partition,
        records,
    } = batch;
    let kafka_partition = extractor.extract(origin.key());
    let source_partition = SourcePartitionKey {
        container: origin.bucket().to_string(),
        prefix: partition,
    };

    records
        .into_iter()
        .map(|record| SourceRecord {
            topic: topic.to_string(),
            partition: kafka_partition,
            source_partition: source_partition.clone(),
            offset: SourceOffset {
                path: origin.key().to_string(),
                line: record.line,
                ts: now_ms,
            },
            value: record.data,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::storage::test::in_memory;
    use bytes::Bytes;

    fn props(kcql: &str) -> HashMap<String, String> {
        HashMap::from([(config::KCQL.to_string(), kcql.to_string())])
    }

    fn no_offsets() -> ContextOffsetFn {
        Box::new(|_| None)
    }

    async fn seeded(objects: &[(&str, &str)]) -> ObjectStorageRef {
        let storage = Arc::new(in_memory("bucket", &[], 1000).await);
        for (key, content) in objects {
            storage
                .put(
                    &PathLocation::new("bucket", *key),
                    Bytes::from(content.to_string()),
                )
                .await
                .unwrap();
        }
        storage
    }

    #[tokio::test]
    async fn poll_before_start_fails() {
        let mut task = SourceTask::new();
        assert!(matches!(task.poll().await, Err(TaskError::NotStarted)));
    }

    #[tokio::test]
    async fn close_before_start_fails() {
        let mut task = SourceTask::new();
        assert!(matches!(task.close().await, Err(TaskError::NotStarted)));
    }

    #[tokio::test]
    async fn second_start_fails() {
        let storage = seeded(&[]).await;
        let mut task = SourceTask::new();
        task.start_with_storage(
            &props("INSERT INTO t SELECT * FROM bucket"),
            storage.clone(),
            no_offsets(),
        )
        .await
        .unwrap();

        let err = task
            .start_with_storage(
                &props("INSERT INTO t SELECT * FROM bucket"),
                storage,
                no_offsets(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::AlreadyStarted));
    }

    #[tokio::test]
    async fn closed_task_rejects_poll_and_start() {
        let storage = seeded(&[]).await;
        let mut task = SourceTask::new();
        task.start_with_storage(
            &props("INSERT INTO t SELECT * FROM bucket"),
            storage.clone(),
            no_offsets(),
        )
        .await
        .unwrap();

        task.close().await.unwrap();
        // Idempotent close.
        task.close().await.unwrap();

        assert!(matches!(task.poll().await, Err(TaskError::Closed)));
        let err = task
            .start_with_storage(
                &props("INSERT INTO t SELECT * FROM bucket"),
                storage,
                no_offsets(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Closed));
    }

    #[tokio::test]
    async fn invalid_config_fails_start() {
        let storage = seeded(&[]).await;
        let mut task = SourceTask::new();
        let err = task
            .start_with_storage(&HashMap::new(), storage, no_offsets())
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Config { .. }));
    }

    #[tokio::test]
    async fn poll_returns_records_with_offsets() {
        let storage = seeded(&[("prefix1/1.txt", "a\nb\n"), ("prefix2/2.txt", "c\n")]).await;
        let mut task = SourceTask::new();
        task.start_with_storage(
            &props("INSERT INTO events SELECT * FROM bucket"),
            storage,
            no_offsets(),
        )
        .await
        .unwrap();

        let outcome = task.poll().await.unwrap();
        assert!(outcome.error.is_none());
        assert_eq!(outcome.records.len(), 3);

        let first = &outcome.records[0];
        assert_eq!(first.topic, "events");
        assert_eq!(first.partition, None);
        assert_eq!(first.source_partition.container, "bucket");
        assert_eq!(first.source_partition.prefix, "prefix1/");
        assert_eq!(first.offset.path, "prefix1/1.txt");
        assert_eq!(first.offset.line, 0);
        assert_eq!(first.value, SourceData::Text("a".to_string()));
    }

    #[tokio::test]
    async fn poll_respects_global_record_cap() {
        let storage = seeded(&[("p/1.txt", "a\nb\nc\nd\ne\n")]).await;
        let mut task = SourceTask::new();
        let mut properties = props("INSERT INTO t SELECT * FROM bucket");
        properties.insert(config::MAX_POLL_RECORDS.to_string(), "2".to_string());

        task.start_with_storage(&properties, storage, no_offsets())
            .await
            .unwrap();

        let outcome = task.poll().await.unwrap();
        assert_eq!(outcome.records.len(), 2);

        let outcome = task.poll().await.unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[1].offset.line, 3);
    }

    #[tokio::test]
    async fn host_offsets_resume_partitions() {
        let content = (0..10).map(|i| format!("line-{i}\n")).collect::<String>();
        let storage = seeded(&[("prefix1/A.txt", content.as_str())]).await;
        let mut task = SourceTask::new();
        let mut properties = props("INSERT INTO t SELECT * FROM bucket");
        properties.insert(config::MAX_POLL_RECORDS.to_string(), "5".to_string());

        let offsets: ContextOffsetFn = Box::new(|partition| {
            assert_eq!(partition.container, "bucket");
            (partition.prefix == "prefix1/").then(|| SourceOffset {
                path: "prefix1/A.txt".to_string(),
                line: 3,
                ts: 0,
            })
        });

        task.start_with_storage(&properties, storage, offsets)
            .await
            .unwrap();

        let outcome = task.poll().await.unwrap();
        let lines: Vec<i64> = outcome.records.iter().map(|r| r.offset.line).collect();
        assert_eq!(lines, vec![4, 5, 6, 7, 8]);
    }

    #[tokio::test]
    async fn partition_failure_does_not_poison_other_partitions() {
        let storage = Arc::new(in_memory("bucket", &[], 1000).await);
        storage
            .put(
                &PathLocation::new("bucket", "bad/1.json"),
                Bytes::from_static(b"not json\n"),
            )
            .await
            .unwrap();
        storage
            .put(
                &PathLocation::new("bucket", "good/2.json"),
                Bytes::from_static(b"{\"ok\":true}\n"),
            )
            .await
            .unwrap();

        let mut task = SourceTask::new();
        task.start_with_storage(
            &props("INSERT INTO t SELECT * FROM bucket STOREAS json"),
            storage,
            no_offsets(),
        )
        .await
        .unwrap();

        let outcome = task.poll().await.unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].source_partition.prefix, "good/");
        assert!(matches!(
            outcome.error,
            Some(StorageError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn hierarchical_extractor_sets_partition_number() {
        let storage = seeded(&[("topic/3/100.txt", "a\n")]).await;
        let mut task = SourceTask::new();
        let mut properties = props("INSERT INTO t SELECT * FROM bucket");
        properties.insert(
            config::EXTRACTOR_TYPE.to_string(),
            "hierarchical".to_string(),
        );

        task.start_with_storage(&properties, storage, no_offsets())
            .await
            .unwrap();

        let outcome = task.poll().await.unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].partition, Some(3));
    }
}
