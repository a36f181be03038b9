//! Registry of reader managers.
//!
//! Spawns one manager per discovered (root, partition) pair and hands them
//! out in a stable order. Discovery refreshes are debounced: a completed
//! search is not repeated until the configured interval elapses, while a
//! paused search always continues on the next call.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::clock::ClockRef;
use crate::error::StorageError;
use crate::location::RootLocation;
use crate::source::manager::ReaderManager;
use crate::source::searcher::{PartitionSearcher, PartitionSearcherResponse};

/// Builds a manager for a newly discovered (root, partition) pair.
pub type ManagerFactory = Box<dyn Fn(&RootLocation, &str) -> ReaderManager + Send + Sync>;

/// Owns the per-partition managers for one task.
pub struct ReaderManagerService {
    searcher: PartitionSearcher,
    factory: ManagerFactory,
    interval: Duration,
    clock: ClockRef,
    responses: Vec<PartitionSearcherResponse>,
    last_search: Option<DateTime<Utc>>,
    /// Keyed by (root index, partition prefix): iteration order is root
    /// order, then prefix lex. Partitions are never removed within a run.
    managers: BTreeMap<(usize, String), ReaderManager>,
}

impl ReaderManagerService {
    pub fn new(
        searcher: PartitionSearcher,
        factory: ManagerFactory,
        interval: Duration,
        clock: ClockRef,
    ) -> Self {
        Self {
            searcher,
            factory,
            interval,
            clock,
            responses: Vec::new(),
            last_search: None,
            managers: BTreeMap::new(),
        }
    }

    /// Refresh partition knowledge and return the managers in stable order.
    pub async fn reader_managers(
        &mut self,
    ) -> Result<impl Iterator<Item = &mut ReaderManager>, StorageError> {
        self.refresh(false).await?;
        Ok(self.managers.values_mut())
    }

    /// Drive discovery until every root reports a completed listing.
    pub async fn run_discovery_to_completion(&mut self) -> Result<(), StorageError> {
        loop {
            self.refresh(true).await?;
            if self
                .responses
                .iter()
                .all(|r| r.result.is_completed())
            {
                return Ok(());
            }
        }
    }

    /// Number of managers currently registered.
    pub fn manager_count(&self) -> usize {
        self.managers.len()
    }

    /// Close every manager. The registry stays intact so the close is
    /// observable, but all managers are terminal afterwards.
    pub fn close_all(&mut self) {
        info!(count = self.managers.len(), "Closing all reader managers");
        for manager in self.managers.values_mut() {
            manager.close();
        }
    }

    /// Run one discovery cycle unless debounced, then spawn managers for
    /// any partition not yet mapped.
    async fn refresh(&mut self, force: bool) -> Result<(), StorageError> {
        let now = self.clock.now();

        if !force && !self.due_for_search(now) {
            return Ok(());
        }

        let responses = self.searcher.search(&self.responses).await?;
        self.last_search = Some(now);
        self.responses = responses;

        for (root_index, response) in self.responses.iter().enumerate() {
            for prefix in &response.all_partitions {
                let key = (root_index, prefix.clone());
                if !self.managers.contains_key(&key) {
                    debug!(root = %response.root, partition = %prefix, "Spawning reader manager");
                    let manager = (self.factory)(&response.root, prefix);
                    self.managers.insert(key, manager);
                }
            }
        }

        Ok(())
    }

    fn due_for_search(&self, now: DateTime<Utc>) -> bool {
        // A paused or never-run search always continues.
        let completed =
            !self.responses.is_empty() && self.responses.iter().all(|r| r.result.is_completed());
        if !completed {
            return true;
        }
        match self.last_search {
            None => true,
            Some(last) => {
                let elapsed = (now - last)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                elapsed >= self.interval
            }
        }
    }
}
