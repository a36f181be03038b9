//! Paginated directory discovery.
//!
//! Derives partition prefixes from the flat listing by trimming each key at
//! the delimiter below the root prefix. A single invocation is bounded: it
//! pauses once enough new prefixes have accumulated or a wall-clock
//! deadline passes, returning a continuation that resumes the walk without
//! gaps or duplicates.

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use std::collections::HashSet;
use tracing::debug;

use crate::clock::Clock;
use crate::error::StorageError;
use crate::location::RootLocation;
use crate::storage::ObjectStorage;

/// Bounds for one discovery call.
#[derive(Debug, Clone, Default)]
pub struct DirectoryFindConfig {
    /// Directory depth of partition prefixes below the root prefix. 1 means
    /// immediate subdirectories.
    pub levels: u32,
    /// Pause once this many new prefixes have accumulated. `None` never
    /// pauses on count.
    pub pause_after_count: Option<usize>,
    /// Pause once the wall clock passes this instant.
    pub deadline: Option<DateTime<Utc>>,
}

/// Continuation for a paused discovery walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinueFrom {
    /// Last prefix inserted before the pause.
    pub last_prefix: Option<String>,
    /// Listing resumes strictly after this key.
    pub resume_after_key: String,
}

/// Outcome of one discovery call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryFindResult {
    /// The listing was exhausted.
    Completed { prefixes: IndexSet<String> },
    /// A pause bound was hit before the listing was exhausted. Always
    /// carries a non-empty continuation key.
    Paused {
        prefixes: IndexSet<String>,
        last_prefix: Option<String>,
        continuation_key: String,
    },
}

impl DirectoryFindResult {
    /// Prefixes discovered by this call, in discovery order.
    pub fn prefixes(&self) -> &IndexSet<String> {
        match self {
            DirectoryFindResult::Completed { prefixes }
            | DirectoryFindResult::Paused { prefixes, .. } => prefixes,
        }
    }

    /// Continuation to resume from, present only when paused.
    pub fn continuation(&self) -> Option<ContinueFrom> {
        match self {
            DirectoryFindResult::Completed { .. } => None,
            DirectoryFindResult::Paused {
                last_prefix,
                continuation_key,
                ..
            } => Some(ContinueFrom {
                last_prefix: last_prefix.clone(),
                resume_after_key: continuation_key.clone(),
            }),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, DirectoryFindResult::Completed { .. })
    }
}

impl ObjectStorage {
    /// Discover partition prefixes under `root`.
    ///
    /// Prefixes already present in `exclude` are never re-emitted. Keys
    /// without a delimiter below the discovery depth are ignored; a key
    /// that is itself a directory marker counts for its prefix only.
    /// Pause bounds are checked at page boundaries so one call issues a
    /// bounded number of listing requests.
    pub async fn find_directories(
        &self,
        root: &RootLocation,
        cfg: &DirectoryFindConfig,
        exclude: &HashSet<String>,
        continue_from: Option<&ContinueFrom>,
        clock: &dyn Clock,
    ) -> Result<DirectoryFindResult, StorageError> {
        let target_segments = root.prefix_depth() + cfg.levels.max(1) as usize;
        let mut found: IndexSet<String> = IndexSet::new();
        let mut after = continue_from.map(|c| c.resume_after_key.clone());

        if let Some(resume) = continue_from {
            debug!(root = %root, after = %resume.resume_after_key, "Resuming paused discovery");
        }

        loop {
            let page = self.list_page(root, after.as_deref(), self.page_size()).await?;

            for key in &page.keys {
                if let Some(prefix) = partition_prefix(key, target_segments) {
                    if !exclude.contains(&prefix) {
                        found.insert(prefix);
                    }
                }
            }

            let Some(next) = page.next else {
                debug!(root = %root, count = found.len(), "Discovery completed");
                return Ok(DirectoryFindResult::Completed { prefixes: found });
            };

            let pause_on_count = cfg
                .pause_after_count
                .is_some_and(|max| found.len() >= max);
            let pause_on_deadline = cfg.deadline.is_some_and(|d| clock.now() >= d);

            if pause_on_count || pause_on_deadline {
                debug!(
                    root = %root,
                    count = found.len(),
                    on_count = pause_on_count,
                    "Discovery paused"
                );
                return Ok(DirectoryFindResult::Paused {
                    last_prefix: found.last().cloned(),
                    prefixes: found,
                    continuation_key: next,
                });
            }

            after = Some(next);
        }
    }
}

/// Trim `key` to a partition prefix of exactly `target_segments` path
/// segments, or `None` when the key has no content below that depth.
fn partition_prefix(key: &str, target_segments: usize) -> Option<String> {
    let key = key.strip_suffix('/').unwrap_or(key);
    let segments: Vec<&str> = key.split('/').collect();
    if segments.len() <= target_segments {
        return None;
    }
    let mut prefix = segments[..target_segments].join("/");
    prefix.push('/');
    Some(prefix)
}
