//! Partition discovery across the configured roots.
//!
//! Runs the directory lister once per root each cycle, carrying per-root
//! state forward: known partitions become the exclusion set, and a paused
//! walk resumes from its continuation while a completed one restarts from
//! the beginning (the exclusion set dedupes the replay).

use chrono::Duration as ChronoDuration;
use indexmap::IndexSet;
use std::collections::HashSet;
use tracing::debug;

use crate::clock::ClockRef;
use crate::config::SearchSettings;
use crate::error::StorageError;
use crate::location::RootLocation;
use crate::source::lister::{DirectoryFindConfig, DirectoryFindResult};
use crate::storage::ObjectStorageRef;

/// Discovery state for one root after one cycle.
#[derive(Debug, Clone)]
pub struct PartitionSearcherResponse {
    pub root: RootLocation,
    pub observed_at: chrono::DateTime<chrono::Utc>,
    /// All partitions seen for this root so far, in discovery order.
    /// Only ever grows within a run.
    pub all_partitions: IndexSet<String>,
    pub result: DirectoryFindResult,
}

/// Orchestrates the lister across the configured roots.
pub struct PartitionSearcher {
    roots: Vec<RootLocation>,
    settings: SearchSettings,
    storage: ObjectStorageRef,
    clock: ClockRef,
}

impl PartitionSearcher {
    pub fn new(
        roots: Vec<RootLocation>,
        settings: SearchSettings,
        storage: ObjectStorageRef,
        clock: ClockRef,
    ) -> Self {
        Self {
            roots,
            settings,
            storage,
            clock,
        }
    }

    pub fn roots(&self) -> &[RootLocation] {
        &self.roots
    }

    /// Run one discovery cycle, producing one response per root.
    ///
    /// `previous` holds the responses from the prior cycle (empty on the
    /// first call). Each invocation is bounded by the configured pause
    /// settings, so this never blocks longer than one lister call per root.
    pub async fn search(
        &self,
        previous: &[PartitionSearcherResponse],
    ) -> Result<Vec<PartitionSearcherResponse>, StorageError> {
        let mut responses = Vec::with_capacity(self.roots.len());

        for root in &self.roots {
            let prev = previous.iter().find(|r| &r.root == root);

            let exclude: HashSet<String> = prev
                .map(|p| p.all_partitions.iter().cloned().collect())
                .unwrap_or_default();
            let continue_from = prev.and_then(|p| p.result.continuation());

            let cfg = DirectoryFindConfig {
                levels: self.settings.recurse_levels + 1,
                pause_after_count: match self.settings.pause_after_count {
                    0 => None,
                    n => Some(n),
                },
                deadline: match self.settings.pause_after_millis {
                    0 => None,
                    ms => Some(self.clock.now() + ChronoDuration::milliseconds(ms as i64)),
                },
            };

            let result = self
                .storage
                .find_directories(
                    root,
                    &cfg,
                    &exclude,
                    continue_from.as_ref(),
                    self.clock.as_ref(),
                )
                .await?;

            let mut all_partitions = prev
                .map(|p| p.all_partitions.clone())
                .unwrap_or_default();
            all_partitions.extend(result.prefixes().iter().cloned());

            debug!(
                root = %root,
                new = result.prefixes().len(),
                total = all_partitions.len(),
                completed = result.is_completed(),
                "Partition search cycle"
            );

            responses.push(PartitionSearcherResponse {
                root: root.clone(),
                observed_at: self.clock.now(),
                all_partitions,
                result,
            });
        }

        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::storage::test::in_memory;
    use std::sync::Arc;

    fn settings(pause_after_count: usize) -> SearchSettings {
        SearchSettings {
            pause_after_count,
            ..SearchSettings::default()
        }
    }

    #[tokio::test]
    async fn first_cycle_discovers_all_partitions() {
        let storage = Arc::new(
            in_memory("bucket", &["p1/a.txt", "p2/b.txt", "p3/c.txt"], 1000).await,
        );
        let roots = vec![RootLocation::new("bucket", None, true)];
        let searcher = PartitionSearcher::new(roots, settings(0), storage, Arc::new(SystemClock));

        let responses = searcher.search(&[]).await.unwrap();

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].all_partitions.len(), 3);
        assert!(responses[0].result.is_completed());
    }

    #[tokio::test]
    async fn paused_cycle_resumes_and_accumulates() {
        let storage = Arc::new(
            in_memory(
                "bucket",
                &[
                    "p1/1.txt", "p1/2.txt", "p2/3.txt", "p2/4.txt", "p3/5.txt", "p3/6.txt",
                    "p4/7.txt", "p4/8.txt",
                ],
                4,
            )
            .await,
        );
        let roots = vec![RootLocation::new("bucket", None, true)];
        let searcher = PartitionSearcher::new(roots, settings(1), storage, Arc::new(SystemClock));

        let first = searcher.search(&[]).await.unwrap();
        assert!(!first[0].result.is_completed());
        assert_eq!(first[0].all_partitions.len(), 2);

        let second = searcher.search(&first).await.unwrap();
        assert!(second[0].result.is_completed());
        assert_eq!(
            second[0]
                .all_partitions
                .iter()
                .cloned()
                .collect::<Vec<_>>(),
            vec!["p1/", "p2/", "p3/", "p4/"]
        );
    }

    #[tokio::test]
    async fn completed_cycle_restarts_with_exclusion() {
        let storage = Arc::new(in_memory("bucket", &["p1/a.txt", "p2/b.txt"], 1000).await);
        let roots = vec![RootLocation::new("bucket", None, true)];
        let searcher =
            PartitionSearcher::new(roots, settings(0), storage.clone(), Arc::new(SystemClock));

        let first = searcher.search(&[]).await.unwrap();
        assert_eq!(first[0].all_partitions.len(), 2);

        // A new partition appears between cycles.
        storage
            .put(
                &crate::location::PathLocation::new("bucket", "p9/new.txt"),
                bytes::Bytes::from_static(b"x"),
            )
            .await
            .unwrap();

        let second = searcher.search(&first).await.unwrap();
        assert!(second[0].result.is_completed());
        // Only the new partition was emitted this cycle; the set still grows.
        assert_eq!(second[0].result.prefixes().len(), 1);
        assert_eq!(second[0].all_partitions.len(), 3);
    }

    #[tokio::test]
    async fn multiple_roots_get_independent_state() {
        let storage = Arc::new(
            in_memory(
                "bucket",
                &["in1/p1/a.txt", "in1/p2/b.txt", "in2/q1/c.txt"],
                1000,
            )
            .await,
        );
        let roots = vec![
            RootLocation::new("bucket", Some("in1".to_string()), true),
            RootLocation::new("bucket", Some("in2".to_string()), true),
        ];
        let searcher = PartitionSearcher::new(roots, settings(0), storage, Arc::new(SystemClock));

        let responses = searcher.search(&[]).await.unwrap();

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].all_partitions.len(), 2);
        assert_eq!(responses[1].all_partitions.len(), 1);
        assert!(responses[1].all_partitions.contains("in2/q1/"));
    }
}
