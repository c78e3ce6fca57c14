//! Synthesized file metadata
//!
//! The store has no permission model and no directory sizes, so every
//! record gets a fixed mode and directories report a sentinel size.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::path::{base_name, is_dir_key};

/// Emulated permission bits (rw-rw-rw-)
pub const DEFAULT_MODE: u32 = 0o666;

/// Directory type bit, as in `st_mode`
pub const MODE_DIR: u32 = 0o040000;

/// Size reported for every directory
pub const DIRECTORY_SIZE: u64 = 0;

/// Metadata for a file or directory as shown to the protocol engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub mode: u32,
    pub mod_time: SystemTime,
    pub is_dir: bool,
}

impl FileInfo {
    /// Build a record for `key`, named relative to the directory `base`.
    ///
    /// Both keys must be expressed the same way (both root-relative). Keys
    /// outside `base` keep their full name.
    pub fn synthesize(key: &str, size: u64, mod_time: Option<SystemTime>, base: &str) -> Self {
        let is_dir = is_dir_key(key);
        let relative = key.strip_prefix(base).unwrap_or(key);
        let name = match relative.trim_end_matches('/') {
            "" => ".".to_string(),
            name => name.to_string(),
        };

        Self::build(name, size, mod_time, is_dir)
    }

    /// Build a record for a listing entry, named by its last component
    pub fn listing_entry(key: &str, size: u64, mod_time: Option<SystemTime>) -> Self {
        Self::build(base_name(key).to_string(), size, mod_time, is_dir_key(key))
    }

    fn build(name: String, size: u64, mod_time: Option<SystemTime>, is_dir: bool) -> Self {
        let mode = if is_dir {
            DEFAULT_MODE | MODE_DIR
        } else {
            DEFAULT_MODE
        };

        Self {
            name,
            size: if is_dir { DIRECTORY_SIZE } else { size },
            mode,
            mod_time: mod_time.unwrap_or(UNIX_EPOCH),
            is_dir,
        }
    }

    /// Permission bits without the type bit
    pub fn permissions(&self) -> u32 {
        self.mode & 0o777
    }

    /// `ls -l` style mode column, e.g. `drw-rw-rw-`
    pub fn mode_string(&self) -> String {
        let mut out = String::with_capacity(10);
        out.push(if self.is_dir { 'd' } else { '-' });
        let perms = self.permissions();
        for shift in [6u32, 3, 0] {
            let bits = (perms >> shift) & 0o7;
            out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
            out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
            out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
        }
        out
    }

    /// Modification time as seconds since the epoch
    pub fn mtime_secs(&self) -> u64 {
        self.mod_time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}
