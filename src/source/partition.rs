//! Partition number extraction and task distribution.
//!
//! The extractor maps an object key onto a downstream partition number.
//! With no extractor configured the whole object key is the partition
//! identity and no number is assigned. Task distribution assigns each
//! configured root to exactly one task index via a stable hash.

use regex::Regex;
use std::hash::{DefaultHasher, Hash, Hasher};

use crate::config::{ExtractorSettings, Route, TaskSlot};
use crate::error::{ConfigError, ExtractorRegexSnafu, InvalidPropertySnafu};
use crate::location::RootLocation;
use snafu::prelude::*;

/// Maps object keys to downstream partition numbers.
#[derive(Debug, Clone)]
pub enum PartitionExtractor {
    /// No extraction: the object key itself is the partition identity.
    WholeKey,
    /// The directory segment holding the object, parsed as a number.
    /// Matches `topic/<partition>/<offset>` style layouts.
    Hierarchical,
    /// Capture group 1 of the pattern, parsed as a number.
    Regex(Regex),
}

impl PartitionExtractor {
    /// Resolve the configured extractor.
    pub fn from_settings(settings: &ExtractorSettings) -> Result<Self, ConfigError> {
        match settings.kind.as_deref() {
            None => Ok(PartitionExtractor::WholeKey),
            Some("hierarchical") => Ok(PartitionExtractor::Hierarchical),
            Some("regex") => {
                let pattern = settings.pattern.as_deref().ok_or_else(|| {
                    InvalidPropertySnafu {
                        key: crate::config::EXTRACTOR_REGEX,
                        value: String::new(),
                        message: "required when extractor type is 'regex'".to_string(),
                    }
                    .build()
                })?;
                let regex = Regex::new(pattern).context(ExtractorRegexSnafu { pattern })?;
                Ok(PartitionExtractor::Regex(regex))
            }
            Some(other) => InvalidPropertySnafu {
                key: crate::config::EXTRACTOR_TYPE,
                value: other,
                message: "expected 'hierarchical' or 'regex'".to_string(),
            }
            .fail(),
        }
    }

    /// Extract the partition number from an object key, if any.
    pub fn extract(&self, key: &str) -> Option<i32> {
        match self {
            PartitionExtractor::WholeKey => None,
            PartitionExtractor::Hierarchical => {
                let mut segments = key.rsplit('/');
                let _file = segments.next()?;
                segments.next()?.parse().ok()
            }
            PartitionExtractor::Regex(regex) => {
                regex.captures(key)?.get(1)?.as_str().parse().ok()
            }
        }
    }
}

/// The task index that owns a root, under `task_count` tasks.
pub fn owner_index(root: &RootLocation, task_count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    root.bucket().hash(&mut hasher);
    root.prefix_with_slash().hash(&mut hasher);
    (hasher.finish() % task_count.max(1) as u64) as usize
}

/// Filter the configured routes down to those owned by this task slot.
pub fn owned_routes(routes: Vec<Route>, slot: TaskSlot) -> Vec<Route> {
    routes
        .into_iter()
        .filter(|route| owner_index(&route.root, slot.count) == slot.index)
        .collect()
}
