//! Protocol path to object key resolution
//!
//! The protocol layer speaks in slash-separated paths rooted at `/`. The
//! store speaks in flat keys that never start with `/`, where directory
//! keys end with `/` and the bucket root is the empty key. Sessions may be
//! confined to a root prefix, in which case every key starts with it.

use crate::error::{DriverError, Result};

/// Normalize a protocol path into a root-relative key.
///
/// Leading slashes are dropped, `.` and empty components are collapsed and
/// `..` pops the previous component. The result keeps a trailing slash when
/// the input had one or `wants_dir` is set, except for the root, which is
/// always the empty key.
pub fn normalize(path: &str, wants_dir: bool) -> Result<String> {
    if path.contains('\0') {
        return Err(DriverError::InvalidPath(format!("{:?} contains NUL", path)));
    }

    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(DriverError::InvalidPath(format!(
                        "{:?} escapes the root directory",
                        path
                    )));
                }
            }
            name => parts.push(name),
        }
    }

    if parts.is_empty() {
        return Ok(String::new());
    }

    let mut key = parts.join("/");
    if wants_dir || path.ends_with('/') {
        key.push('/');
    }
    Ok(key)
}

/// True for directory keys (and the root)
pub fn is_dir_key(key: &str) -> bool {
    key.is_empty() || key.ends_with('/')
}

/// The slash-terminated form of a key; the root stays empty
pub fn dir_key(key: &str) -> String {
    if is_dir_key(key) {
        key.to_string()
    } else {
        format!("{}/", key)
    }
}

/// Directory key of the parent of `key`; the root's parent is the root
pub fn parent_key(key: &str) -> &str {
    let trimmed = key.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &key[..=idx],
        None => "",
    }
}

/// Last component of a key, without any trailing slash
pub fn base_name(key: &str) -> &str {
    let trimmed = key.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Resolves protocol paths against a configured root prefix
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyResolver {
    root: String,
}

impl KeyResolver {
    /// Create a resolver confined to `root_prefix` (a directory key or empty)
    pub fn new(root_prefix: Option<&str>) -> Result<Self> {
        let root = match root_prefix {
            Some(prefix) => normalize(prefix, true)?,
            None => String::new(),
        };
        Ok(Self { root })
    }

    /// Key of the session root
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn is_root(&self, key: &str) -> bool {
        key == self.root
    }

    /// Resolve a protocol path to a store key under the root prefix
    pub fn resolve(&self, path: &str, wants_dir: bool) -> Result<String> {
        let key = normalize(path, wants_dir)?;
        Ok(format!("{}{}", self.root, key))
    }

    /// Strip the root prefix, giving the key as the client sees it
    pub fn strip_root<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(self.root.as_str()).unwrap_or(key)
    }

    /// The protocol path (`/a/b`) for a key under the root
    pub fn to_protocol_path(&self, key: &str) -> String {
        format!("/{}", self.strip_root(key).trim_end_matches('/'))
    }
}
