//! Directory emulation over a flat key space
//!
//! A directory exists when its marker object exists or when any key lives
//! beneath it. The root always exists.

use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::error::{DriverError, Result};
use crate::info::{FileInfo, DIRECTORY_SIZE};
use crate::path::{dir_key, parent_key};
use crate::store::{list_directory, ListQuery, ObjectStore};

/// Directory operations for keys under one root
pub struct Directories {
    store: Arc<dyn ObjectStore>,
    root: String,
}

impl Directories {
    /// `root` is the key every session path resolves under (empty for the
    /// whole bucket)
    pub fn new(store: Arc<dyn ObjectStore>, root: impl Into<String>) -> Self {
        Self {
            store,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Check that the directory at `key` exists
    pub async fn change_directory(&self, key: &str) -> Result<()> {
        let key = dir_key(key);
        if key == self.root {
            return Ok(());
        }

        let query = ListQuery::directory(key.clone()).max_keys(1);
        let page = self.store.list_objects(&query).await?;
        trace!("change_directory: key={} found={}", key, page.key_count());

        if page.is_empty() {
            return Err(DriverError::NotFound(key));
        }
        Ok(())
    }

    /// Check that the directory containing `key` exists
    pub async fn ensure_parent(&self, key: &str) -> Result<()> {
        let parent = parent_key(key);
        if parent.len() <= self.root.len() {
            return Ok(());
        }

        self.change_directory(parent).await.map_err(|e| match e {
            DriverError::NotFound(p) => {
                DriverError::NotFound(format!("parent directory {} of {}", p, key))
            }
            other => other,
        })
    }

    /// Create the marker for the directory at `key`
    pub async fn make_directory(&self, key: &str, require_parent: bool) -> Result<()> {
        let key = dir_key(key);
        if key == self.root {
            return Err(DriverError::InvalidPath(
                "cannot create the root directory".to_string(),
            ));
        }

        if require_parent {
            self.ensure_parent(&key).await?;
        }

        self.store.put_object(&key, Bytes::new()).await?;
        debug!("make_directory: created marker {}", key);
        Ok(())
    }

    /// Entries directly inside the directory at `key`.
    ///
    /// Subdirectories come first, then files, each in store order. The
    /// directory's own marker is left out.
    pub async fn list_files(&self, key: &str) -> Result<Vec<FileInfo>> {
        let key = dir_key(key);
        let page = list_directory(self.store.as_ref(), &key).await?;
        let listed_at = SystemTime::now();

        let mut entries = Vec::with_capacity(page.key_count());

        for prefix in &page.common_prefixes {
            let modified = match self.store.head_object(prefix).await {
                Ok(meta) => meta.last_modified,
                Err(DriverError::NotFound(_)) => Some(listed_at),
                Err(e) => return Err(e),
            };
            entries.push(FileInfo::listing_entry(prefix, DIRECTORY_SIZE, modified));
        }

        for object in &page.contents {
            if object.key == key {
                continue;
            }
            entries.push(FileInfo::listing_entry(
                &object.key,
                object.size,
                object.last_modified,
            ));
        }

        trace!("list_files: key={} entries={}", key, entries.len());
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn setup(keys: &[&str]) -> (Arc<MemoryStore>, Directories) {
        let memory = Arc::new(MemoryStore::new());
        for key in keys {
            memory.insert(*key, Bytes::from_static(b"data"));
        }
        let dirs = Directories::new(memory.clone(), "");
        (memory, dirs)
    }

    fn names(entries: &[FileInfo]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_root_exists_on_empty_store() {
        let (_, dirs) = setup(&[]);
        dirs.change_directory("").await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_directory_not_found() {
        let (_, dirs) = setup(&["other/file"]);
        let result = dirs.change_directory("missing/").await;
        assert!(matches!(result, Err(DriverError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_implicit_directory_exists() {
        let (_, dirs) = setup(&["a/b/c.txt"]);
        dirs.change_directory("a").await.unwrap();
        dirs.change_directory("a/b/").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_is_not_a_directory() {
        let (_, dirs) = setup(&["file"]);
        assert!(dirs.change_directory("file").await.is_err());
    }

    #[tokio::test]
    async fn test_make_directory_writes_marker() {
        let (memory, dirs) = setup(&[]);
        dirs.make_directory("docs", true).await.unwrap();
        assert_eq!(memory.object("docs/").unwrap().len(), 0);
        dirs.change_directory("docs/").await.unwrap();
    }

    #[tokio::test]
    async fn test_make_directory_parent_policy() {
        let (memory, dirs) = setup(&[]);

        let strict = dirs.make_directory("a/b/", true).await;
        assert!(matches!(strict, Err(DriverError::NotFound(_))));
        assert!(memory.is_empty());

        dirs.make_directory("a/b/", false).await.unwrap();
        assert!(memory.contains("a/b/"));
    }

    #[tokio::test]
    async fn test_make_root_is_invalid() {
        let (_, dirs) = setup(&[]);
        let result = dirs.make_directory("", false).await;
        assert!(matches!(result, Err(DriverError::InvalidPath(_))));
    }

    #[tokio::test]
    async fn test_list_orders_directories_first_and_skips_marker() {
        let (memory, dirs) = setup(&["a/z.txt", "a/m/inner", "a/b.txt"]);
        memory.insert("a/", Bytes::new());
        memory.insert("a/c/", Bytes::new());

        let entries = dirs.list_files("a/").await.unwrap();
        assert_eq!(names(&entries), vec!["c", "m", "b.txt", "z.txt"]);
        assert!(entries[0].is_dir && entries[1].is_dir);
        assert_eq!(entries[1].size, DIRECTORY_SIZE);
        assert_eq!(entries[2].size, 4);
    }

    #[tokio::test]
    async fn test_list_implicit_directory_gets_listing_time() {
        let (_, dirs) = setup(&["x/y/z"]);
        let before = SystemTime::now();

        let entries = dirs.list_files("x/").await.unwrap();
        assert_eq!(names(&entries), vec!["y"]);
        assert!(entries[0].mod_time >= before);
    }

    #[tokio::test]
    async fn test_root_prefix_confines_root() {
        let memory = Arc::new(MemoryStore::new());
        let dirs = Directories::new(memory.clone(), "tenant/");

        dirs.change_directory("tenant/").await.unwrap();
        assert!(dirs.make_directory("tenant/", false).await.is_err());
        dirs.make_directory("tenant/docs/", true).await.unwrap();
        assert!(memory.contains("tenant/docs/"));
    }
}
