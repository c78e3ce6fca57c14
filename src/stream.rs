//! File handles bridging protocol I/O to whole-object GET/PUT
//!
//! A read handle wraps the body of one GET. A write handle owns the writer
//! half of a bounded in-memory pipe and a task that streams the reader half
//! into one upload call, so memory per transfer stays bounded by the pipe
//! capacity no matter how large the file is.

use std::io::SeekFrom;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{DriverError, Result};
use crate::store::{ObjectMeta, ObjectReader, ObjectStore};

/// Direction a handle was opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

enum HandleState {
    Reading {
        body: ObjectReader,
    },
    Writing {
        pipe: DuplexStream,
        upload: JoinHandle<Result<u64>>,
    },
    Closed,
}

impl HandleState {
    fn name(&self) -> &'static str {
        match self {
            HandleState::Reading { .. } => "open for reading",
            HandleState::Writing { .. } => "open for writing",
            HandleState::Closed => "closed",
        }
    }
}

/// An open file backed by one object
pub struct FileHandle {
    key: String,
    mode: OpenMode,
    state: HandleState,
    /// Object metadata from the GET (read handles only)
    meta: Option<ObjectMeta>,
    transferred: u64,
}

impl FileHandle {
    /// Open `key` for reading.
    ///
    /// The GET is issued here so a missing object fails the open rather
    /// than the first read.
    pub async fn open_read(store: Arc<dyn ObjectStore>, key: String) -> Result<Self> {
        let (meta, body) = store.get_object(&key).await?;
        debug!("open_read: key={} size={}", key, meta.size);

        Ok(Self {
            key,
            mode: OpenMode::Read,
            state: HandleState::Reading { body },
            meta: Some(meta),
            transferred: 0,
        })
    }

    /// Open `key` for writing, replacing any existing object.
    ///
    /// An empty PUT creates the object first so permission and bucket
    /// errors surface before the caller writes anything. The upload task is
    /// spawned exactly once, here.
    pub async fn open_write(
        store: Arc<dyn ObjectStore>,
        key: String,
        pipe_capacity: usize,
    ) -> Result<Self> {
        store.put_object(&key, Bytes::new()).await?;

        let (pipe, reader) = tokio::io::duplex(pipe_capacity.max(1));
        let upload_key = key.clone();
        let upload = tokio::spawn(async move {
            let result = store.upload(&upload_key, Box::pin(reader)).await;
            if let Err(e) = &result {
                debug!("upload for {} failed: {}", upload_key, e);
            }
            result
        });

        debug!("open_write: key={} pipe_capacity={}", key, pipe_capacity);

        Ok(Self {
            key,
            mode: OpenMode::Write,
            state: HandleState::Writing { pipe, upload },
            meta: None,
            transferred: 0,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, HandleState::Closed)
    }

    /// Object size reported by the GET, for read handles
    pub fn size(&self) -> Option<u64> {
        self.meta.as_ref().map(|m| m.size)
    }

    /// Bytes read or written so far
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Read the next chunk of the object; `Ok(0)` at end of object
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match &mut self.state {
            HandleState::Reading { body } => {
                let n = body.read(buf).await?;
                self.transferred += n as u64;
                Ok(n)
            }
            other => Err(DriverError::InvalidState(format!(
                "cannot read {}: handle is {}",
                self.key,
                other.name()
            ))),
        }
    }

    /// Write all of `buf`, waiting while the pipe is full
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        match &mut self.state {
            HandleState::Writing { pipe, .. } => {
                // A broken pipe means the upload already ended; close() reports why
                pipe.write_all(buf).await?;
                self.transferred += buf.len() as u64;
                trace!("write: key={} len={}", self.key, buf.len());
                Ok(buf.len())
            }
            other => Err(DriverError::InvalidState(format!(
                "cannot write {}: handle is {}",
                self.key,
                other.name()
            ))),
        }
    }

    /// Objects cannot be addressed at an offset
    pub fn seek(&mut self, _pos: SeekFrom) -> Result<u64> {
        Err(DriverError::NotSupported(format!(
            "seek in {}: objects are streamed whole",
            self.key
        )))
    }

    /// Finish the transfer.
    ///
    /// For writes this signals end of data to the upload task and waits for
    /// its result, which becomes the result of `close`.
    pub async fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, HandleState::Closed) {
            HandleState::Reading { body } => {
                drop(body);
                debug!("close: key={} read {} bytes", self.key, self.transferred);
                Ok(())
            }
            HandleState::Writing { mut pipe, upload } => {
                // The reader may already be gone if the upload failed early
                if let Err(e) = pipe.shutdown().await {
                    trace!("close: shutdown of pipe for {} failed: {}", self.key, e);
                }
                drop(pipe);

                let stored = upload.await.map_err(|e| {
                    DriverError::Upstream(format!("upload task for {} failed: {}", self.key, e))
                })??;

                debug!(
                    "close: key={} wrote {} bytes, stored {}",
                    self.key, self.transferred, stored
                );
                Ok(())
            }
            HandleState::Closed => Err(DriverError::InvalidState(format!(
                "{} is already closed",
                self.key
            ))),
        }
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if let HandleState::Writing { upload, .. } = &self.state {
            warn!(
                "Write handle for {} dropped without close, aborting upload",
                self.key
            );
            upload.abort();
        }
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("key", &self.key)
            .field("mode", &self.mode)
            .field("state", &self.state.name())
            .field("transferred", &self.transferred)
            .finish()
    }
}
