//! Filesystem operations for the protocol engine
//!
//! The engine creates one [`BucketDriver`] at startup and asks it for a
//! [`Session`] per logged-in client. A session tracks the client's working
//! directory and turns each filesystem call into store requests.

use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info, trace, warn};

use crate::bulk::BulkOps;
use crate::config::{Config, ServerSettings};
use crate::dir::Directories;
use crate::error::{DriverError, Result};
use crate::info::{FileInfo, DIRECTORY_SIZE};
use crate::path::{dir_key, is_dir_key, KeyResolver};
use crate::store::{self, ObjectStore};
use crate::stream::{FileHandle, OpenMode};

/// Shared entry point handed to the protocol engine
pub struct BucketDriver {
    config: Arc<Config>,
    store: Arc<dyn ObjectStore>,
    resolver: KeyResolver,
}

impl BucketDriver {
    /// Create a driver over an already connected store
    pub fn new(config: Config, store: Arc<dyn ObjectStore>) -> Result<Self> {
        config.validate()?;
        let resolver = KeyResolver::new(config.store.root_prefix())?;

        info!(
            "Driver ready: root={:?} require_parent={}",
            resolver.root(),
            config.directories.require_parent
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            resolver,
        })
    }

    /// Connect the configured store and create a driver over it
    pub async fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let store = store::connect(&config.store, &config.transfer).await?;
        Self::new(config, store)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Greeting sent to clients on connect
    pub fn welcome(&self) -> &str {
        &self.config.server.welcome_message
    }

    /// Listener settings for the protocol engine
    pub fn settings(&self) -> ServerSettings {
        self.config.server.clone()
    }

    /// TLS is not offered; the engine must serve plain connections
    pub fn tls_config(&self) -> Result<()> {
        Err(DriverError::NotSupported(
            "TLS is not configured for this server".to_string(),
        ))
    }

    /// Check credentials and open a session rooted at `/`
    pub fn authenticate(&self, user: &str, password: &str) -> Result<Session> {
        let expected = &self.config.auth;
        if user != expected.user || password != expected.password {
            warn!("Authentication failed for user {:?}", user);
            return Err(DriverError::AuthFailure(user.to_string()));
        }

        info!("User {} logged in", user);
        Ok(Session {
            user: user.to_string(),
            cwd: "/".to_string(),
            store: self.store.clone(),
            resolver: self.resolver.clone(),
            dirs: Directories::new(self.store.clone(), self.resolver.root()),
            bulk: BulkOps::new(self.store.clone()),
            require_parent: self.config.directories.require_parent,
            pipe_capacity: self.config.transfer.pipe_buffer_size,
        })
    }
}

/// One client's view of the bucket
pub struct Session {
    user: String,
    /// Protocol path of the working directory, always absolute
    cwd: String,
    store: Arc<dyn ObjectStore>,
    resolver: KeyResolver,
    dirs: Directories,
    bulk: BulkOps,
    require_parent: bool,
    pipe_capacity: usize,
}

impl Session {
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Protocol path of the working directory
    pub fn current_dir(&self) -> &str {
        &self.cwd
    }

    fn resolve(&self, path: &str, wants_dir: bool) -> Result<String> {
        let absolute = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", self.cwd.trim_end_matches('/'), path)
        };

        let key = self.resolver.resolve(&absolute, wants_dir)?;
        trace!("resolve: {:?} (cwd {}) -> {:?}", path, self.cwd, key);
        Ok(key)
    }

    /// Key of the working directory relative to the root
    fn cwd_base(&self) -> Result<String> {
        crate::path::normalize(&self.cwd, true)
    }

    fn reject_root(&self, key: &str, op: &str) -> Result<()> {
        if self.resolver.is_root(key) {
            return Err(DriverError::InvalidPath(format!(
                "cannot {} the root directory",
                op
            )));
        }
        Ok(())
    }

    async fn check_parent(&self, key: &str) -> Result<()> {
        if self.require_parent {
            self.dirs.ensure_parent(key).await?;
        }
        Ok(())
    }

    pub async fn change_directory(&mut self, path: &str) -> Result<()> {
        let key = self.resolve(path, true)?;
        self.dirs.change_directory(&key).await?;

        self.cwd = self.resolver.to_protocol_path(&key);
        debug!("{}: cwd is now {}", self.user, self.cwd);
        Ok(())
    }

    pub async fn make_directory(&self, path: &str) -> Result<()> {
        let key = self.resolve(path, true)?;
        self.dirs.make_directory(&key, self.require_parent).await
    }

    /// Entries of the directory at `path`, subdirectories first
    pub async fn list_files(&self, path: &str) -> Result<Vec<FileInfo>> {
        let key = self.resolve(path, true)?;
        self.dirs.list_files(&key).await
    }

    /// Open the file at `path` for reading or for replacing its contents
    pub async fn open_file(&self, path: &str, mode: OpenMode) -> Result<FileHandle> {
        let key = self.resolve(path, false)?;
        if is_dir_key(&key) || self.resolver.is_root(&key) {
            return Err(DriverError::InvalidPath(format!(
                "{} is a directory",
                self.resolver.to_protocol_path(&key)
            )));
        }

        match mode {
            OpenMode::Read => FileHandle::open_read(self.store.clone(), key).await,
            OpenMode::Write => {
                self.check_parent(&key).await?;
                FileHandle::open_write(self.store.clone(), key, self.pipe_capacity).await
            }
        }
    }

    /// Metadata of the file or directory at `path`
    pub async fn stat_file(&self, path: &str) -> Result<FileInfo> {
        let key = self.resolve(path, false)?;
        let base = self.cwd_base()?;

        if self.resolver.is_root(&key) {
            let mut info = FileInfo::synthesize("", DIRECTORY_SIZE, Some(SystemTime::now()), "");
            info.name = "/".to_string();
            return Ok(info);
        }

        if !is_dir_key(&key) {
            match self.store.head_object(&key).await {
                Ok(meta) => {
                    let relative = self.resolver.strip_root(&key);
                    return Ok(FileInfo::synthesize(
                        relative,
                        meta.size,
                        meta.last_modified,
                        &base,
                    ));
                }
                Err(DriverError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let dir = dir_key(&key);
        let relative = self.resolver.strip_root(&dir);
        match self.store.head_object(&dir).await {
            Ok(meta) => Ok(FileInfo::synthesize(
                relative,
                DIRECTORY_SIZE,
                meta.last_modified,
                &base,
            )),
            Err(DriverError::NotFound(_)) => {
                self.dirs.change_directory(&dir).await?;
                Ok(FileInfo::synthesize(
                    relative,
                    DIRECTORY_SIZE,
                    Some(SystemTime::now()),
                    &base,
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Delete a file, or a directory and everything under it
    pub async fn delete_file(&self, path: &str) -> Result<()> {
        let key = self.resolve(path, false)?;
        self.reject_root(&key, "delete")?;

        let removed = self.bulk.delete(&key).await?;
        debug!("{}: deleted {} ({} objects)", self.user, path, removed);
        Ok(())
    }

    /// Move a file or directory; not atomic for directories
    pub async fn rename_file(&self, from: &str, to: &str) -> Result<()> {
        let src = self.resolve(from, false)?;
        let dst = self.resolve(to, false)?;
        self.reject_root(&src, "rename")?;
        self.reject_root(&dst, "replace")?;
        self.check_parent(&dst).await?;

        let moved = self.bulk.rename(&src, &dst).await?;
        debug!("{}: renamed {} -> {} ({} objects)", self.user, from, to, moved);
        Ok(())
    }

    /// Space is never reserved up front
    pub fn can_allocate(&self, _size: u64) -> bool {
        true
    }

    pub fn chmod(&self, path: &str, _mode: u32) -> Result<()> {
        Err(DriverError::NotSupported(format!(
            "chmod {}: objects have no permissions",
            path
        )))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("cwd", &self.cwd)
            .field("root", &self.resolver.root())
            .finish()
    }
}
