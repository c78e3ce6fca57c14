//! In-process object store
//!
//! Keeps whole objects in an ordered map so listings come back in the same
//! lexicographic order S3 uses. Backs the `memory` store type and the test
//! suites.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::ops::Bound;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::io::AsyncReadExt;
use tracing::trace;

use crate::error::{DriverError, Result};
use crate::store::{
    ListQuery, ListingPage, ObjectMeta, ObjectReader, ObjectStore, DEFAULT_MAX_KEYS,
};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: SystemTime,
}

impl StoredObject {
    fn new(data: Bytes) -> Self {
        Self {
            data,
            last_modified: SystemTime::now(),
        }
    }

    fn meta(&self, key: &str) -> ObjectMeta {
        ObjectMeta {
            key: key.to_string(),
            size: self.data.len() as u64,
            last_modified: Some(self.last_modified),
        }
    }
}

/// Object store held entirely in memory.
///
/// `upload` collects the whole body before storing it, so unlike the S3
/// store, memory use per transfer grows with the object size.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All keys in order
    pub fn keys(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    /// Contents of one object
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.read().get(key).map(|o| o.data.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Store an object directly, bypassing the async interface
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.objects
            .write()
            .insert(key.into(), StoredObject::new(data.into()));
    }

    fn not_found(key: &str) -> DriverError {
        DriverError::NotFound(format!("No such key: {}", key))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_objects(&self, query: &ListQuery) -> Result<ListingPage> {
        trace!(
            "list_objects: prefix={:?} delimiter={:?} after={:?}",
            query.prefix,
            query.delimiter,
            query.continuation
        );

        let max_keys = query.max_keys.unwrap_or(DEFAULT_MAX_KEYS).max(1);
        let objects = self.objects.read();

        let start = match &query.continuation {
            Some(token) => Bound::Excluded(token.clone()),
            None => Bound::Included(query.prefix.clone()),
        };

        let mut page = ListingPage::default();
        let mut last_emitted: Option<String> = None;

        for (key, object) in objects.range((start, Bound::Unbounded)) {
            if !key.starts_with(&query.prefix) {
                break;
            }

            // A token naming a common prefix covers every key beneath it
            if let (Some(token), Some(d)) = (&query.continuation, query.delimiter.as_deref()) {
                let is_group = token.len() > query.prefix.len() && token.ends_with(d);
                if is_group && key.starts_with(token.as_str()) {
                    continue;
                }
            }

            let rest = &key[query.prefix.len()..];
            let grouped = query
                .delimiter
                .as_deref()
                .and_then(|d| rest.find(d).map(|idx| idx + d.len()))
                .map(|end| format!("{}{}", query.prefix, &rest[..end]));

            if let Some(common) = &grouped {
                if page.common_prefixes.last() == Some(common) {
                    continue;
                }
            }

            if page.key_count() >= max_keys {
                page.next_token = last_emitted.clone();
                break;
            }

            match grouped {
                Some(common) => {
                    last_emitted = Some(common.clone());
                    page.common_prefixes.push(common);
                }
                None => {
                    last_emitted = Some(key.clone());
                    page.contents.push(object.meta(key));
                }
            }
        }

        Ok(page)
    }

    async fn head_object(&self, key: &str) -> Result<ObjectMeta> {
        self.objects
            .read()
            .get(key)
            .map(|o| o.meta(key))
            .ok_or_else(|| Self::not_found(key))
    }

    async fn get_object(&self, key: &str) -> Result<(ObjectMeta, ObjectReader)> {
        let object = self
            .objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Self::not_found(key))?;

        let meta = object.meta(key);
        let reader: ObjectReader = Box::pin(Cursor::new(object.data));
        Ok((meta, reader))
    }

    async fn put_object(&self, key: &str, body: Bytes) -> Result<()> {
        trace!("put_object: key={} size={}", key, body.len());
        self.insert(key, body);
        Ok(())
    }

    async fn upload(&self, key: &str, mut body: ObjectReader) -> Result<u64> {
        let mut data = Vec::new();
        body.read_to_end(&mut data).await?;

        let size = data.len() as u64;
        trace!("upload: key={} size={}", key, size);
        self.insert(key, data);
        Ok(size)
    }

    async fn copy_object(&self, src: &str, dst: &str) -> Result<()> {
        let data = self.object(src).ok_or_else(|| Self::not_found(src))?;
        self.insert(dst, data);
        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<()> {
        let mut objects = self.objects.write();
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }
}
