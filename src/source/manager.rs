//! Per-partition reader manager.
//!
//! One manager owns the read position for one (root, partition) pair. It
//! walks the partition's objects in key order, pumping records out of the
//! current object and advancing to the next on exhaustion. Offsets emitted
//! for a partition are strictly increasing under (key, line) within a run.

use tracing::debug;

use crate::config::FormatKind;
use crate::error::StorageError;
use crate::location::{PathLocation, PathWithLine, RootLocation};
use crate::source::reader::{ResultReader, SourceData};
use crate::storage::ObjectStorageRef;

/// One record surfaced by a manager poll.
#[derive(Debug, Clone, PartialEq)]
pub struct PolledRecord {
    pub line: i64,
    pub data: SourceData,
}

/// Records from one object surfaced by one poll.
#[derive(Debug, Clone, PartialEq)]
pub struct PollBatch {
    pub origin: PathLocation,
    pub partition: String,
    pub records: Vec<PolledRecord>,
}

enum ManagerState {
    /// No current reader; the next poll looks for the next object.
    Idle,
    /// A reader is open over the current object.
    Reading(ResultReader),
    /// Terminal.
    Closed,
}

/// Manages reading for one partition prefix under one root.
pub struct ReaderManager {
    root: RootLocation,
    partition: String,
    format: FormatKind,
    storage: ObjectStorageRef,
    state: ManagerState,
    /// Last (key, line) emitted or committed; the next object search is
    /// strictly after this key.
    committed: Option<PathWithLine>,
    /// Host-supplied offset, consumed by the first open so the committed
    /// object resumes mid-file.
    resume: Option<PathWithLine>,
    /// Consecutive polls that produced no records. Diagnostic only;
    /// managers are never retired.
    empty_polls: u32,
}

impl ReaderManager {
    /// Create a manager. `context_offset` is the host-held committed
    /// position for this partition, if any.
    pub fn new(
        root: RootLocation,
        partition: impl Into<String>,
        format: FormatKind,
        storage: ObjectStorageRef,
        context_offset: Option<PathWithLine>,
    ) -> Self {
        Self {
            root,
            partition: partition.into(),
            format,
            storage,
            state: ManagerState::Idle,
            committed: context_offset.clone(),
            resume: context_offset,
            empty_polls: 0,
        }
    }

    pub fn root(&self) -> &RootLocation {
        &self.root
    }

    /// The partition prefix this manager owns.
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Last offset emitted or committed for this partition.
    pub fn committed(&self) -> Option<&PathWithLine> {
        self.committed.as_ref()
    }

    pub fn empty_polls(&self) -> u32 {
        self.empty_polls
    }

    /// Pull up to `limit` records from the partition.
    ///
    /// A storage failure leaves the manager in its pre-failure state so the
    /// next poll retries; malformed records surface without being skipped.
    pub async fn poll(&mut self, limit: usize) -> Result<Option<PollBatch>, StorageError> {
        if matches!(self.state, ManagerState::Closed) {
            return Ok(None);
        }

        if matches!(self.state, ManagerState::Idle) {
            let Some((location, start_line)) = self.next_object().await? else {
                self.empty_polls += 1;
                return Ok(None);
            };
            let bytes = match self.storage.get(&location).await {
                Ok(bytes) => bytes,
                Err(e) if e.is_not_found() && self.resume.is_some() => {
                    // The committed object vanished externally; fall back to
                    // listing strictly after its key.
                    debug!(
                        partition = %self.partition,
                        object = %location,
                        "Committed object gone, advancing"
                    );
                    self.resume = None;
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };
            debug!(
                partition = %self.partition,
                object = %location,
                start_line,
                size = bytes.len(),
                "Opened object"
            );
            // The open succeeded; the host offset has been consumed.
            self.resume = None;
            let reader = self.format.open(bytes, location, start_line);
            self.state = ManagerState::Reading(ResultReader::new(reader));
        }

        let ManagerState::Reading(reader) = &mut self.state else {
            return Ok(None);
        };

        let records = reader.retrieve_results(limit)?;
        let origin = reader.location().clone();
        let exhausted = !reader.has_next();

        if exhausted {
            // Record the terminal position so the next search moves past
            // this object, then go idle.
            self.committed = Some(PathWithLine::new(origin.clone(), reader.current_line()));
            self.state = ManagerState::Idle;
            debug!(partition = %self.partition, object = %origin, "Object exhausted");
        }

        match records {
            Some(records) => {
                self.empty_polls = 0;
                if let Some(last) = records.last() {
                    self.committed = Some(PathWithLine::new(origin.clone(), last.0));
                    // Exhaustion already committed the same position.
                }
                Ok(Some(PollBatch {
                    origin,
                    partition: self.partition.clone(),
                    records: records
                        .into_iter()
                        .map(|(line, data)| PolledRecord { line, data })
                        .collect(),
                }))
            }
            None => {
                self.empty_polls += 1;
                Ok(None)
            }
        }
    }

    /// Close the manager. Terminal; subsequent polls return empty.
    pub fn close(&mut self) {
        if !matches!(self.state, ManagerState::Closed) {
            debug!(partition = %self.partition, "Closing reader manager");
            self.state = ManagerState::Closed;
        }
    }

    /// Find the next object to read: the host-committed object on first
    /// open, otherwise the first key strictly greater than the committed
    /// one under the partition prefix.
    async fn next_object(&self) -> Result<Option<(PathLocation, i64)>, StorageError> {
        if let Some(resume) = &self.resume {
            return Ok(Some((resume.location.clone(), resume.line + 1)));
        }

        let prefix = self.partition.trim_end_matches('/');
        let listing_root =
            RootLocation::new(self.root.bucket(), Some(prefix.to_string()), true);
        let after = self
            .committed
            .as_ref()
            .map(|c| c.location.key().to_string());

        // Fetch a couple of keys so a directory-marker entry can be skipped.
        let page = self.storage.list_page(&listing_root, after.as_deref(), 2).await?;
        let next = page
            .keys
            .into_iter()
            .find(|key| key != prefix && key.trim_end_matches('/') != prefix);

        Ok(next.map(|key| (self.root.resolve(key), 0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test::in_memory;
    use bytes::Bytes;
    use std::sync::Arc;

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

    fn manager(storage: ObjectStorageRef, offset: Option<PathWithLine>) -> ReaderManager {
        ReaderManager::new(
            RootLocation::new("bucket", None, true),
            "prefix1/",
            FormatKind::Text,
            storage,
            offset,
        )
    }

    fn texts(batch: &PollBatch) -> Vec<String> {
        batch
            .records
            .iter()
            .map(|r| match &r.data {
                SourceData::Text(t) => t.clone(),
                other => panic!("expected text, got {other:?}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn reads_objects_in_key_order_across_polls() {
        let storage = seeded(&[
            ("prefix1/1.txt", "a\nb\n"),
            ("prefix1/2.txt", "c\n"),
            ("other/9.txt", "x\n"),
        ])
        .await;
        let mut mgr = manager(storage, None);

        let batch = mgr.poll(10).await.unwrap().unwrap();
        assert_eq!(batch.origin.key(), "prefix1/1.txt");
        assert_eq!(texts(&batch), vec!["a", "b"]);
        assert_eq!(
            mgr.committed(),
            Some(&PathWithLine::new(
                PathLocation::new("bucket", "prefix1/1.txt"),
                1
            ))
        );

        let batch = mgr.poll(10).await.unwrap().unwrap();
        assert_eq!(batch.origin.key(), "prefix1/2.txt");
        assert_eq!(texts(&batch), vec!["c"]);

        assert!(mgr.poll(10).await.unwrap().is_none());
        assert_eq!(mgr.empty_polls(), 1);
    }

    #[tokio::test]
    async fn poll_limit_splits_one_object_across_polls() {
        let storage = seeded(&[("prefix1/1.txt", "a\nb\nc\nd\ne\n")]).await;
        let mut mgr = manager(storage, None);

        let batch = mgr.poll(2).await.unwrap().unwrap();
        assert_eq!(texts(&batch), vec!["a", "b"]);
        assert_eq!(batch.records.last().unwrap().line, 1);

        let batch = mgr.poll(2).await.unwrap().unwrap();
        assert_eq!(texts(&batch), vec!["c", "d"]);

        let batch = mgr.poll(2).await.unwrap().unwrap();
        assert_eq!(texts(&batch), vec!["e"]);
        assert_eq!(batch.records.last().unwrap().line, 4);

        assert!(mgr.poll(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resumes_from_host_offset_mid_object() {
        let content = (0..10).map(|i| format!("line-{i}\n")).collect::<String>();
        let storage = seeded(&[("prefix1/A.txt", content.as_str())]).await;

        let offset = PathWithLine::new(PathLocation::new("bucket", "prefix1/A.txt"), 3);
        let mut mgr = manager(storage, Some(offset));

        let batch = mgr.poll(5).await.unwrap().unwrap();
        assert_eq!(
            texts(&batch),
            vec!["line-4", "line-5", "line-6", "line-7", "line-8"]
        );
        assert_eq!(
            mgr.committed(),
            Some(&PathWithLine::new(
                PathLocation::new("bucket", "prefix1/A.txt"),
                8
            ))
        );
    }

    #[tokio::test]
    async fn resume_of_exhausted_object_advances_to_next_key() {
        let storage = seeded(&[
            ("prefix1/A.txt", "a\nb\n"),
            ("prefix1/B.txt", "c\n"),
        ])
        .await;

        // Offset points at the last line of A: nothing left there.
        let offset = PathWithLine::new(PathLocation::new("bucket", "prefix1/A.txt"), 1);
        let mut mgr = manager(storage, Some(offset));

        // First poll opens A past its end and finds it exhausted.
        assert!(mgr.poll(10).await.unwrap().is_none());

        // Next poll moves to B at line 0.
        let batch = mgr.poll(10).await.unwrap().unwrap();
        assert_eq!(batch.origin.key(), "prefix1/B.txt");
        assert_eq!(texts(&batch), vec!["c"]);
    }

    #[tokio::test]
    async fn vanished_committed_object_advances_to_next_key() {
        let storage = seeded(&[("prefix1/B.txt", "b\n")]).await;

        // The host-committed object was deleted externally.
        let offset = PathWithLine::new(PathLocation::new("bucket", "prefix1/A.txt"), 5);
        let mut mgr = manager(storage, Some(offset));

        assert!(mgr.poll(10).await.unwrap().is_none());

        let batch = mgr.poll(10).await.unwrap().unwrap();
        assert_eq!(batch.origin.key(), "prefix1/B.txt");
        assert_eq!(texts(&batch), vec!["b"]);
    }

    #[tokio::test]
    async fn emitted_offsets_are_strictly_increasing() {
        let storage = seeded(&[
            ("prefix1/1.txt", "a\nb\nc\n"),
            ("prefix1/2.txt", "d\ne\n"),
        ])
        .await;
        let mut mgr = manager(storage, None);

        let mut offsets = Vec::new();
        while let Some(batch) = mgr.poll(2).await.unwrap() {
            for record in &batch.records {
                offsets.push(PathWithLine::new(batch.origin.clone(), record.line));
            }
        }

        assert_eq!(offsets.len(), 5);
        for pair in offsets.windows(2) {
            assert!(pair[0] < pair[1], "offsets must increase: {pair:?}");
        }
    }

    #[tokio::test]
    async fn empty_partition_stays_idle() {
        let storage = seeded(&[("other/1.txt", "x\n")]).await;
        let mut mgr = manager(storage, None);

        assert!(mgr.poll(10).await.unwrap().is_none());
        assert!(mgr.poll(10).await.unwrap().is_none());
        assert_eq!(mgr.empty_polls(), 2);
    }

    #[tokio::test]
    async fn closed_manager_returns_empty() {
        let storage = seeded(&[("prefix1/1.txt", "a\n")]).await;
        let mut mgr = manager(storage, None);

        mgr.close();
        assert!(mgr.poll(10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_record_surfaces_and_reading_continues() {
        let storage = Arc::new(in_memory("bucket", &[], 1000).await);
        storage
            .put(
                &PathLocation::new("bucket", "prefix1/1.json"),
                Bytes::from_static(b"{\"a\":1}\nbroken\n{\"b\":2}\n"),
            )
            .await
            .unwrap();
        let mut mgr = ReaderManager::new(
            RootLocation::new("bucket", None, true),
            "prefix1/",
            FormatKind::Json,
            storage,
            None,
        );

        // Good record before the failure.
        let batch = mgr.poll(10).await.unwrap().unwrap();
        assert_eq!(batch.records.len(), 1);

        // The malformed line surfaces as an error, not silently skipped.
        let err = mgr.poll(10).await.unwrap_err();
        assert!(matches!(err, StorageError::Malformed { line: 1, .. }));

        // The manager stays on the same object and reads past the bad line.
        let batch = mgr.poll(10).await.unwrap().unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].line, 2);
    }
}
