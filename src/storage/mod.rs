//! Object storage capability.
//!
//! Wraps one `object_store` client per configured bucket behind the small
//! set of operations the source pipeline needs: paginated flat listing,
//! head/get/put/delete, and delimiter-based directory discovery (the
//! latter implemented in `source::lister` atop `list_page`).
//!
//! Listing contract: pages are returned in lexicographic key order. S3
//! listings are ordered by the service; the in-memory and local backends
//! used in tests are ordered as well.

mod s3;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::AwsSettings;
use crate::error::{ConfigError, StorageError};
use crate::location::{PathLocation, RootLocation};

/// A reference-counted storage handle, shared read-only across components.
pub type ObjectStorageRef = Arc<ObjectStorage>;

/// Metadata returned by `head`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// One page of a flat listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Object keys in lexicographic order.
    pub keys: Vec<String>,
    /// Marker to continue from, absent when the listing is exhausted.
    pub next: Option<String>,
}

/// Storage capability over the configured buckets.
pub struct ObjectStorage {
    stores: HashMap<String, Arc<dyn ObjectStore>>,
    page_size: usize,
}

impl std::fmt::Debug for ObjectStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut buckets: Vec<&str> = self.stores.keys().map(String::as_str).collect();
        buckets.sort_unstable();
        write!(f, "ObjectStorage<{}>", buckets.join(","))
    }
}

impl ObjectStorage {
    /// Build S3-backed storage for the given buckets.
    pub fn connect<'a>(
        aws: &AwsSettings,
        buckets: impl IntoIterator<Item = &'a str>,
        page_size: usize,
    ) -> Result<Self, ConfigError> {
        let mut stores: HashMap<String, Arc<dyn ObjectStore>> = HashMap::new();
        for bucket in buckets {
            if !stores.contains_key(bucket) {
                stores.insert(bucket.to_string(), s3::build_store(aws, bucket)?);
            }
        }
        Ok(Self { stores, page_size })
    }

    /// Create an empty capability; attach backends with [`with_store`].
    ///
    /// [`with_store`]: ObjectStorage::with_store
    pub fn new(page_size: usize) -> Self {
        Self {
            stores: HashMap::new(),
            page_size,
        }
    }

    /// Attach a backend for a bucket. Used by tests and by hosts that carry
    /// their own client plumbing.
    pub fn with_store(mut self, bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.stores.insert(bucket.into(), store);
        self
    }

    /// Default page size for flat listings.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn store(&self, bucket: &str) -> Result<&Arc<dyn ObjectStore>, StorageError> {
        self.stores.get(bucket).ok_or_else(|| StorageError::NotFound {
            what: format!("bucket '{bucket}'"),
        })
    }

    /// One page of the flat listing under `root`, strictly after `after_key`.
    ///
    /// Returns up to `max` keys plus a continuation marker when more remain.
    pub async fn list_page(
        &self,
        root: &RootLocation,
        after_key: Option<&str>,
        max: usize,
    ) -> Result<ListPage, StorageError> {
        let store = self.store(root.bucket())?;
        let prefix = root.prefix().map(Path::from);
        let root_prefix = root.prefix_with_slash();

        let mut stream = match after_key {
            Some(after) => {
                let offset = Path::from(after);
                store.list_with_offset(prefix.as_ref(), &offset)
            }
            None => store.list(prefix.as_ref()),
        };

        let mut keys = Vec::with_capacity(max.min(1024));
        let mut next = None;
        while let Some(item) = stream.next().await {
            let meta = item.map_err(|e| StorageError::classify_listing(e, &root_prefix))?;
            if keys.len() == max {
                // One more object exists, so the page is a partial view.
                next = keys.last().cloned();
                break;
            }
            keys.push(meta.location.to_string());
        }

        debug!(
            root = %root,
            after = after_key.unwrap_or(""),
            count = keys.len(),
            exhausted = next.is_none(),
            "Listed page"
        );

        Ok(ListPage { keys, next })
    }

    /// Size and modification time of one object.
    pub async fn head(&self, path: &PathLocation) -> Result<ObjectHead, StorageError> {
        let store = self.store(path.bucket())?;
        let meta = store
            .head(&Path::from(path.key()))
            .await
            .map_err(StorageError::classify)?;
        Ok(ObjectHead {
            size: meta.size as u64,
            last_modified: meta.last_modified,
        })
    }

    /// Fetch the full contents of one object.
    pub async fn get(&self, path: &PathLocation) -> Result<Bytes, StorageError> {
        let store = self.store(path.bucket())?;
        let result = store
            .get(&Path::from(path.key()))
            .await
            .map_err(StorageError::classify)?;
        result.bytes().await.map_err(StorageError::classify)
    }

    /// Write one object. Exercised by the sink collaborator and by tests.
    pub async fn put(&self, path: &PathLocation, bytes: Bytes) -> Result<(), StorageError> {
        let store = self.store(path.bucket())?;
        store
            .put(&Path::from(path.key()), PutPayload::from(bytes))
            .await
            .map_err(StorageError::classify)?;
        Ok(())
    }

    /// Delete a batch of keys from one bucket.
    pub async fn delete(&self, bucket: &str, keys: &[String]) -> Result<(), StorageError> {
        let store = self.store(bucket)?;
        for key in keys {
            match store.delete(&Path::from(key.as_str())).await {
                Ok(()) => {}
                // A concurrently removed key is not a failure of the batch.
                Err(object_store::Error::NotFound { .. }) => {
                    debug!(bucket = %bucket, key = %key, "Delete target already gone");
                }
                Err(e) => return Err(StorageError::classify(e)),
            }
        }
        Ok(())
    }
}
