//! Locations and offsets in the object store.
//!
//! A `RootLocation` is a configured ingestion source, a `PathLocation`
//! names one object, and a `PathWithLine` identifies one record within an
//! object. `PathWithLine` ordering is the offset ordering: lexicographic on
//! key, then numeric on line.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A configured (bucket, optional prefix) ingestion source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RootLocation {
    bucket: String,
    prefix: Option<String>,
    allow_slashes: bool,
}

impl RootLocation {
    /// Create a root location. A trailing `/` on the prefix is dropped so
    /// depth arithmetic sees clean segments.
    pub fn new(bucket: impl Into<String>, prefix: Option<String>, allow_slashes: bool) -> Self {
        let prefix = prefix
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());
        Self {
            bucket: bucket.into(),
            prefix,
            allow_slashes,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Prefix including its trailing delimiter, or empty for a bare bucket.
    pub fn prefix_with_slash(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{p}/"),
            None => String::new(),
        }
    }

    pub fn allow_slashes(&self) -> bool {
        self.allow_slashes
    }

    /// Number of `/`-separated segments in the prefix.
    pub fn prefix_depth(&self) -> usize {
        match &self.prefix {
            Some(p) => p.split('/').count(),
            None => 0,
        }
    }

    /// Resolve an object key under this root into a full path.
    pub fn resolve(&self, key: impl Into<String>) -> PathLocation {
        PathLocation::new(self.bucket.clone(), key)
    }
}

impl fmt::Display for RootLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(p) => write!(f, "{}:{}", self.bucket, p),
            None => write!(f, "{}", self.bucket),
        }
    }
}

/// One object in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathLocation {
    bucket: String,
    key: String,
}

impl PathLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for PathLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// An offset: one record within one object.
///
/// Ordering is lexicographic on the key, then numeric on the line, which is
/// the emission order guaranteed per partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathWithLine {
    pub location: PathLocation,
    pub line: i64,
}

impl PathWithLine {
    pub fn new(location: PathLocation, line: i64) -> Self {
        Self { location, line }
    }
}

impl PartialOrd for PathWithLine {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PathWithLine {
    fn cmp(&self, other: &Self) -> Ordering {
        self.location
            .key
            .cmp(&other.location.key)
            .then(self.line.cmp(&other.line))
    }
}

/// Wire format of the host-held source partition key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePartitionKey {
    pub container: String,
    pub prefix: String,
}

/// Wire format of the host-held offset value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceOffset {
    pub path: String,
    pub line: i64,
    pub ts: i64,
}
