pub mod memory;
pub mod s3;

use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use tokio::io::AsyncRead;

use crate::config::{StoreConfig, TransferConfig};
use crate::error::{DriverError, Result};

use self::memory::MemoryStore;
use self::s3::S3Store;

/// Default page size for listings, matching S3's own cap
pub const DEFAULT_MAX_KEYS: usize = 1000;

/// Streaming object body
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Stream of objects produced by a recursive listing
pub type ObjectStream<'a> = Pin<Box<dyn Stream<Item = Result<ObjectMeta>> + Send + 'a>>;

/// Metadata for a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<SystemTime>,
}

/// Parameters of a prefix listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub prefix: String,
    /// Group keys past the prefix up to this delimiter into common prefixes
    pub delimiter: Option<String>,
    pub continuation: Option<String>,
    pub max_keys: Option<usize>,
}

impl ListQuery {
    /// One level of a directory: delimiter `/`
    pub fn directory(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            delimiter: Some("/".to_string()),
            ..Self::default()
        }
    }

    /// Every key under the prefix, no grouping
    pub fn recursive(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    pub fn max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = Some(max_keys);
        self
    }

    pub fn after(mut self, token: Option<String>) -> Self {
        self.continuation = token;
        self
    }
}

/// One page of a listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    /// Immediate subdirectories (only with a delimiter), slash-terminated
    pub common_prefixes: Vec<String>,
    /// Objects directly matching the query
    pub contents: Vec<ObjectMeta>,
    /// Set when the store truncated the page
    pub next_token: Option<String>,
}

impl ListingPage {
    pub fn key_count(&self) -> usize {
        self.common_prefixes.len() + self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key_count() == 0
    }
}

/// Object store client consumed by the adapter.
///
/// Implementations own retries, authentication and the wire protocol. They
/// must be safe to share between sessions issuing requests concurrently.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List one page of keys under a prefix
    async fn list_objects(&self, query: &ListQuery) -> Result<ListingPage>;

    /// Metadata of a single object; `NotFound` if absent
    async fn head_object(&self, key: &str) -> Result<ObjectMeta>;

    /// Open an object for streaming; `NotFound` if absent
    async fn get_object(&self, key: &str) -> Result<(ObjectMeta, ObjectReader)>;

    /// Create or replace an object with a known body
    async fn put_object(&self, key: &str, body: Bytes) -> Result<()>;

    /// Create or replace an object from a stream of unknown length.
    ///
    /// Returns the number of bytes stored.
    async fn upload(&self, key: &str, body: ObjectReader) -> Result<u64>;

    /// Server-side copy; `NotFound` if the source is absent
    async fn copy_object(&self, src: &str, dst: &str) -> Result<()>;

    /// Delete many keys in as few requests as the store allows.
    ///
    /// Not atomic. Keys the store refuses are reported as one
    /// `PartialFailure`; absent keys are not an error.
    async fn delete_objects(&self, keys: &[String]) -> Result<()>;

    /// Check if an object exists
    ///
    /// Default implementation uses head_object()
    async fn exists(&self, key: &str) -> Result<bool> {
        match self.head_object(key).await {
            Ok(_) => Ok(true),
            Err(DriverError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete a single key
    async fn delete_object(&self, key: &str) -> Result<()> {
        self.delete_objects(&[key.to_string()]).await
    }
}

/// Walk every object under `prefix`, following continuation tokens
pub fn walk<'a>(store: &'a dyn ObjectStore, prefix: &str) -> ObjectStream<'a> {
    let prefix = prefix.to_string();

    Box::pin(try_stream! {
        let mut token: Option<String> = None;

        loop {
            let query = ListQuery::recursive(prefix.clone()).after(token.take());
            let page = store.list_objects(&query).await?;

            for object in page.contents {
                yield object;
            }

            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
    })
}

/// Collect every key under `prefix` in listing order
pub async fn collect_keys(store: &dyn ObjectStore, prefix: &str) -> Result<Vec<String>> {
    walk(store, prefix).map_ok(|object| object.key).try_collect().await
}

/// One directory level across all pages, merged
pub async fn list_directory(store: &dyn ObjectStore, prefix: &str) -> Result<ListingPage> {
    let mut merged = ListingPage::default();
    let mut token: Option<String> = None;

    loop {
        let query = ListQuery::directory(prefix).after(token.take());
        let page = store.list_objects(&query).await?;

        merged.common_prefixes.extend(page.common_prefixes);
        merged.contents.extend(page.contents);

        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    Ok(merged)
}

/// Build the store described by the configuration
pub async fn connect(
    config: &StoreConfig,
    transfer: &TransferConfig,
) -> Result<Arc<dyn ObjectStore>> {
    match config {
        StoreConfig::S3(s3) => Ok(Arc::new(S3Store::new(s3, transfer.part_size).await?)),
        StoreConfig::Memory { .. } => Ok(Arc::new(MemoryStore::new())),
    }
}
