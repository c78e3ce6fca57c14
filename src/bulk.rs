//! Recursive delete and rename
//!
//! Neither operation is atomic. Rename copies every object before deleting
//! any source, and a failed copy leaves the sources untouched and the
//! copies made so far in place.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{DriverError, Result};
use crate::path::{dir_key, is_dir_key};
use crate::store::{collect_keys, ObjectStore};

/// What a key refers to in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// An object at exactly this key
    File(String),
    /// A directory marker at this slash-terminated key
    Directory(String),
}

impl Target {
    pub fn key(&self) -> &str {
        match self {
            Target::File(key) | Target::Directory(key) => key,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Target::Directory(_))
    }
}

/// Source and destination keys of one rename
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameBatch {
    pub moves: Vec<(String, String)>,
}

impl RenameBatch {
    /// Pair every key under `from` with the same key under `to`
    pub fn plan(keys: Vec<String>, from: &str, to: &str) -> Self {
        let moves = keys
            .into_iter()
            .filter_map(|key| {
                let dst = substitute_prefix(&key, from, to)?;
                Some((key, dst))
            })
            .collect();
        Self { moves }
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn sources(&self) -> Vec<String> {
        self.moves.iter().map(|(src, _)| src.clone()).collect()
    }
}

/// Replace the leading `from` of `key` with `to`
pub fn substitute_prefix(key: &str, from: &str, to: &str) -> Option<String> {
    key.strip_prefix(from).map(|rest| format!("{}{}", to, rest))
}

/// Delete and rename across every key under a prefix
pub struct BulkOps {
    store: Arc<dyn ObjectStore>,
}

impl BulkOps {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Find whether `key` names a file or a directory marker.
    ///
    /// The object at `key` wins over a marker at `key/`.
    pub async fn probe(&self, key: &str) -> Result<Target> {
        if !is_dir_key(key) && self.store.exists(key).await? {
            return Ok(Target::File(key.to_string()));
        }

        let dir = dir_key(key);
        if !dir.is_empty() && self.store.exists(&dir).await? {
            return Ok(Target::Directory(dir));
        }

        Err(DriverError::NotFound(key.to_string()))
    }

    /// Delete a file, or a directory with everything beneath it.
    ///
    /// Returns the number of objects deleted.
    pub async fn delete(&self, key: &str) -> Result<usize> {
        if key.is_empty() {
            return Err(DriverError::InvalidPath(
                "cannot delete the root directory".to_string(),
            ));
        }

        match self.probe(key).await? {
            Target::File(file) => {
                self.store.delete_object(&file).await?;
                debug!("delete: removed file {}", file);
                Ok(1)
            }
            Target::Directory(dir) => {
                let keys = collect_keys(self.store.as_ref(), &dir).await?;
                self.store.delete_objects(&keys).await?;
                debug!("delete: removed {} objects under {}", keys.len(), dir);
                Ok(keys.len())
            }
        }
    }

    /// Move a file, or a directory with everything beneath it.
    ///
    /// Returns the number of objects moved.
    pub async fn rename(&self, from: &str, to: &str) -> Result<usize> {
        if from.is_empty() || to.is_empty() {
            return Err(DriverError::InvalidPath(
                "cannot rename the root directory".to_string(),
            ));
        }

        let target = self.probe(from).await?;
        let from = target.key().to_string();
        let to = if target.is_dir() {
            dir_key(to)
        } else {
            to.trim_end_matches('/').to_string()
        };

        if from == to {
            return Err(DriverError::InvalidPath(format!(
                "{} cannot be renamed onto itself",
                from
            )));
        }
        if target.is_dir() && to.starts_with(&from) {
            return Err(DriverError::InvalidPath(format!(
                "{} cannot be moved into its own subtree {}",
                from, to
            )));
        }

        let keys = if target.is_dir() {
            collect_keys(self.store.as_ref(), &from).await?
        } else {
            vec![from.clone()]
        };
        let batch = RenameBatch::plan(keys, &from, &to);

        for (copied, (src, dst)) in batch.moves.iter().enumerate() {
            if let Err(e) = self.store.copy_object(src, dst).await {
                warn!(
                    "rename {} -> {} aborted after {} of {} copies: {}",
                    from,
                    to,
                    copied,
                    batch.len(),
                    e
                );
                return Err(e);
            }
        }

        self.store.delete_objects(&batch.sources()).await?;
        debug!("rename: moved {} objects {} -> {}", batch.len(), from, to);
        Ok(batch.len())
    }
}
