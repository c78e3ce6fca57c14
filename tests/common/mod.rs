//! Common test utilities and fixtures
//!
//! Every suite runs the driver against an in-memory store wrapped in
//! [`FaultyStore`], which passes calls straight through unless a test arms
//! one of its failure switches.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;

use bucket_ftp::config::Config;
use bucket_ftp::driver::{BucketDriver, Session};
use bucket_ftp::store::memory::MemoryStore;
use bucket_ftp::store::{ListQuery, ListingPage, ObjectMeta, ObjectReader, ObjectStore};
use bucket_ftp::{DriverError, Result};

pub const USER: &str = "ftpuser";
pub const PASSWORD: &str = "ftppass";

/// Pipe capacity used by the test configuration
pub const PIPE_CAPACITY: usize = 1024;

// ============================================================================
// Fault-injecting store
// ============================================================================

/// Passthrough store with switchable failures and call counters
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    fail_put: AtomicBool,
    fail_upload: AtomicBool,
    /// Uploads never read their body
    stall_upload: AtomicBool,
    /// Fail the copy with this zero-based index
    fail_copy_at: Mutex<Option<usize>>,
    /// Keys the store refuses to delete
    refuse_delete: Mutex<Vec<String>>,
    copies: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl FaultyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn seed(&self, key: &str, data: &[u8]) {
        self.inner.insert(key, Bytes::copy_from_slice(data));
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.inner.object(key)
    }

    pub fn fail_puts(&self) {
        self.fail_put.store(true, Ordering::SeqCst);
    }

    pub fn fail_uploads(&self) {
        self.fail_upload.store(true, Ordering::SeqCst);
    }

    pub fn stall_uploads(&self) {
        self.stall_upload.store(true, Ordering::SeqCst);
    }

    pub fn fail_copy_at(&self, index: usize) {
        *self.fail_copy_at.lock() = Some(index);
    }

    pub fn refuse_delete(&self, key: &str) {
        self.refuse_delete.lock().push(key.to_string());
    }

    pub fn copy_count(&self) -> usize {
        self.copies.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    fn injected(op: &str, key: &str) -> DriverError {
        DriverError::Upstream(format!("{} {}: injected failure", op, key))
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    async fn list_objects(&self, query: &ListQuery) -> Result<ListingPage> {
        self.inner.list_objects(query).await
    }

    async fn head_object(&self, key: &str) -> Result<ObjectMeta> {
        self.inner.head_object(key).await
    }

    async fn get_object(&self, key: &str) -> Result<(ObjectMeta, ObjectReader)> {
        self.inner.get_object(key).await
    }

    async fn put_object(&self, key: &str, body: Bytes) -> Result<()> {
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(Self::injected("PutObject", key));
        }
        self.inner.put_object(key, body).await
    }

    async fn upload(&self, key: &str, mut body: ObjectReader) -> Result<u64> {
        if self.stall_upload.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_upload.load(Ordering::SeqCst) {
            // Consume the stream so the writer never sees a broken pipe
            let mut sink = Vec::new();
            body.read_to_end(&mut sink).await?;
            return Err(Self::injected("UploadPart", key));
        }
        self.inner.upload(key, body).await
    }

    async fn copy_object(&self, src: &str, dst: &str) -> Result<()> {
        let index = self.copies.fetch_add(1, Ordering::SeqCst);
        if *self.fail_copy_at.lock() == Some(index) {
            return Err(Self::injected("CopyObject", src));
        }
        self.inner.copy_object(src, dst).await
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);

        let refused = self.refuse_delete.lock().clone();
        let (blocked, allowed): (Vec<String>, Vec<String>) =
            keys.iter().cloned().partition(|k| refused.contains(k));

        self.inner.delete_objects(&allowed).await?;

        if blocked.is_empty() {
            Ok(())
        } else {
            Err(DriverError::PartialFailure {
                failed: blocked.len(),
                total: keys.len(),
                detail: blocked.join(", "),
            })
        }
    }
}

// ============================================================================
// Driver fixtures
// ============================================================================

/// Test configuration with a memory store and a small pipe
pub fn test_config(require_parent: bool, root_prefix: Option<&str>) -> Config {
    let prefix = root_prefix
        .map(|p| format!("\n  root_prefix: \"{}\"", p))
        .unwrap_or_default();

    let yaml = format!(
        r#"
auth:
  user: {user}
  password: {password}
store:
  type: memory{prefix}
transfer:
  pipe_buffer_size: {pipe}
directories:
  require_parent: {require_parent}
"#,
        user = USER,
        password = PASSWORD,
        prefix = prefix,
        pipe = PIPE_CAPACITY,
        require_parent = require_parent,
    );

    Config::from_str(&yaml).expect("test config should parse")
}

pub fn driver_with(store: Arc<FaultyStore>, config: Config) -> BucketDriver {
    BucketDriver::new(config, store).expect("test driver should build")
}

/// Logged-in session over a fresh store with the strict parent policy
pub fn session() -> (Arc<FaultyStore>, Session) {
    let store = FaultyStore::new();
    let driver = driver_with(store.clone(), test_config(true, None));
    let session = driver.authenticate(USER, PASSWORD).expect("login");
    (store, session)
}

/// Deterministic payload of `len` bytes
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
