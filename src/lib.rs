//! bucket-ftp: an object store exposed as a filesystem to an FTP engine
//!
//! The protocol engine owns connections and the wire protocol. This crate
//! answers its filesystem calls by translating them into requests against a
//! flat object store such as Amazon S3.
//!
//! # Architecture
//!
//! - **Paths**: protocol paths are normalized into object keys under an
//!   optional root prefix (`path`).
//! - **Directories**: emulated with prefix listings and zero-byte marker
//!   objects (`dir`).
//! - **Streams**: file handles stream GET bodies out and pipe writes into a
//!   single background upload (`stream`).
//! - **Bulk operations**: recursive delete and copy-then-delete rename
//!   (`bulk`).
//! - **Stores**: the `ObjectStore` trait with S3 and in-memory
//!   implementations (`store`).
//! - **Driver**: the entry point the engine calls (`driver`).
//!
//! # Example
//!
//! ```no_run
//! use bucket_ftp::config::Config;
//! use bucket_ftp::driver::BucketDriver;
//! use bucket_ftp::stream::OpenMode;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file("config.yaml".as_ref())?;
//! let driver = BucketDriver::from_config(config).await?;
//!
//! let mut session = driver.authenticate("ftpuser", "ftppass")?;
//! session.change_directory("/reports").await?;
//! for entry in session.list_files(".").await? {
//!     println!("{} {}", entry.mode_string(), entry.name);
//! }
//!
//! let mut file = session.open_file("summary.txt", OpenMode::Write).await?;
//! file.write(b"quarterly numbers").await?;
//! file.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod bulk;
pub mod config;
pub mod dir;
pub mod driver;
pub mod env;
pub mod error;
pub mod info;
pub mod path;
pub mod store;
pub mod stream;

pub use error::{DriverError, Result};
