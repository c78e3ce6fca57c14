//! Configuration parsing and structures

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::env::expand_env;

/// Default conduit capacity between a write handle and its upload task
pub const DEFAULT_PIPE_BUFFER_SIZE: usize = 64 * 1024;

/// Default multipart part size for streaming uploads
pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

/// Smallest part S3 accepts for a non-final multipart part
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Default greeting sent by the protocol engine after connect
pub const DEFAULT_WELCOME: &str = "Welcome to the FTP server for S3";

// =============================================================================
// Raw Config (Deserialized from YAML)
// =============================================================================

/// Raw configuration as deserialized from YAML.
/// This is converted to `Config` via `resolve()`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub server: RawServerConfig,

    pub auth: RawAuthConfig,

    pub store: StoreConfig,

    #[serde(default)]
    pub transfer: RawTransferConfig,

    #[serde(default)]
    pub directories: DirectoryConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub max_connections: Option<usize>,
    pub welcome_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAuthConfig {
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Byte size given either as a plain number or as a string like "64KB"
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawSize {
    Bytes(u64),
    Text(String),
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawTransferConfig {
    pub pipe_buffer_size: Option<RawSize>,
    pub part_size: Option<RawSize>,
}

// =============================================================================
// Resolved Config (Ready for use)
// =============================================================================

/// Top-level configuration (resolved from RawConfig).
///
/// Built once at startup and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub server: ServerSettings,
    pub auth: Credentials,
    pub store: StoreConfig,
    pub transfer: TransferConfig,
    pub directories: DirectoryConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Listener settings handed to the protocol engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    pub welcome_message: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 2121,
            max_connections: 300,
            welcome_message: DEFAULT_WELCOME.to_string(),
        }
    }
}

/// The single user allowed to log in
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Object store backend (tagged enum)
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Amazon S3 or an S3-compatible service
    S3(S3StoreConfig),

    /// In-process store, contents are lost on exit
    Memory {
        #[serde(default)]
        root_prefix: Option<String>,
    },
}

impl StoreConfig {
    /// Key prefix every session is confined to, if any
    pub fn root_prefix(&self) -> Option<&str> {
        match self {
            StoreConfig::S3(s3) => s3.root_prefix.as_deref(),
            StoreConfig::Memory { root_prefix } => root_prefix.as_deref(),
        }
    }
}

/// S3 store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3StoreConfig {
    pub bucket: String,

    /// AWS region
    pub region: Option<String>,

    /// Custom endpoint URL (for S3-compatible stores)
    pub endpoint: Option<String>,

    /// Force path-style addressing (for MinIO, LocalStack, etc.)
    #[serde(default)]
    pub force_path_style: bool,

    /// Key prefix for serving a subpath of the bucket
    pub root_prefix: Option<String>,
}

/// Streaming transfer tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Capacity of the in-memory pipe feeding an upload
    pub pipe_buffer_size: usize,
    /// Multipart part size; bounds upload memory per handle
    pub part_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            pipe_buffer_size: DEFAULT_PIPE_BUFFER_SIZE,
            part_size: DEFAULT_PART_SIZE,
        }
    }
}

/// Directory emulation policy
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DirectoryConfig {
    /// Reject mkdir, uploads and rename targets whose parent does not exist
    #[serde(default = "default_require_parent")]
    pub require_parent: bool,
}

fn default_require_parent() -> bool {
    true
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            require_parent: default_require_parent(),
        }
    }
}

// =============================================================================
// Resolution Logic
// =============================================================================

impl RawConfig {
    /// Resolve raw config into final config, filling defaults
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let RawConfig {
            logging,
            server,
            auth,
            store,
            transfer,
            directories,
        } = self;

        let defaults = ServerSettings::default();
        let server = ServerSettings {
            host: server.host.unwrap_or(defaults.host),
            port: server.port.unwrap_or(defaults.port),
            max_connections: server.max_connections.unwrap_or(defaults.max_connections),
            welcome_message: server.welcome_message.unwrap_or(defaults.welcome_message),
        };

        let user = auth.user.ok_or_else(|| {
            ConfigError::ValidationError("auth.user is required".to_string())
        })?;
        let password = auth.password.ok_or_else(|| {
            ConfigError::ValidationError("auth.password is required".to_string())
        })?;

        let transfer = TransferConfig {
            pipe_buffer_size: Self::resolve_size(
                "transfer.pipe_buffer_size",
                transfer.pipe_buffer_size,
                DEFAULT_PIPE_BUFFER_SIZE,
            )?,
            part_size: Self::resolve_size(
                "transfer.part_size",
                transfer.part_size,
                DEFAULT_PART_SIZE,
            )?,
        };

        Ok(Config {
            logging,
            server,
            auth: Credentials { user, password },
            store,
            transfer,
            directories,
        })
    }

    fn resolve_size(
        field: &str,
        raw: Option<RawSize>,
        default: usize,
    ) -> Result<usize, ConfigError> {
        match raw {
            None => Ok(default),
            Some(RawSize::Bytes(n)) => Ok(n as usize),
            Some(RawSize::Text(s)) => parse_size(&s).map(|n| n as usize).ok_or_else(|| {
                ConfigError::ValidationError(format!("{}: invalid size '{}'", field, s))
            }),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string, expanding `${VAR}` first
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env(content)?;
        let raw: RawConfig =
            serde_yaml::from_str(&expanded).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        raw.resolve()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.user.is_empty() || self.auth.password.is_empty() {
            return Err(ConfigError::ValidationError(
                "auth.user and auth.password cannot be empty".to_string(),
            ));
        }

        if let StoreConfig::S3(s3) = &self.store {
            if s3.bucket.is_empty() {
                return Err(ConfigError::ValidationError(
                    "store.bucket cannot be empty".to_string(),
                ));
            }
            if self.transfer.part_size < MIN_PART_SIZE {
                return Err(ConfigError::ValidationError(format!(
                    "transfer.part_size must be at least {} bytes for S3",
                    MIN_PART_SIZE
                )));
            }
        }

        if self.transfer.pipe_buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "transfer.pipe_buffer_size must be greater than zero".to_string(),
            ));
        }

        if self.server.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "server.max_connections must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parse size string like "64KB" to bytes
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim().to_uppercase();
    let (num_part, multiplier) = if let Some(n) = s.strip_suffix("GB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = s.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = s.strip_suffix('B') {
        (n, 1)
    } else {
        (s.as_str(), 1)
    };

    num_part.trim().parse::<u64>().ok().map(|n| n * multiplier)
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Missing environment variables: {}", .0.join(", "))]
    MissingEnv(Vec<String>),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for crate::error::DriverError {
    fn from(err: ConfigError) -> Self {
        crate::error::DriverError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
auth:
  user: ftpuser
  password: ftppass
store:
  type: memory
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = Config::from_str(MINIMAL).unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.server, ServerSettings::default());
        assert_eq!(config.transfer, TransferConfig::default());
        assert!(config.directories.require_parent);
        assert_eq!(config.store.root_prefix(), None);
        config.validate().unwrap();
    }

    #[test]
    fn test_full_s3_config() {
        let yaml = r#"
logging:
  level: debug
server:
  port: 2200
  max_connections: 10
  welcome_message: "hello"
auth:
  user: alice
  password: wonderland
store:
  type: s3
  bucket: ftp-bucket
  region: us-east-1
  endpoint: "http://localhost:9000"
  force_path_style: true
  root_prefix: "exports/"
transfer:
  pipe_buffer_size: 128KB
  part_size: 16777216
directories:
  require_parent: false
"#;

        let config = Config::from_str(yaml).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.server.port, 2200);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.max_connections, 10);
        assert_eq!(config.server.welcome_message, "hello");
        assert_eq!(config.transfer.pipe_buffer_size, 128 * 1024);
        assert_eq!(config.transfer.part_size, 16 * 1024 * 1024);
        assert!(!config.directories.require_parent);

        match &config.store {
            StoreConfig::S3(s3) => {
                assert_eq!(s3.bucket, "ftp-bucket");
                assert_eq!(s3.region, Some("us-east-1".to_string()));
                assert_eq!(s3.endpoint, Some("http://localhost:9000".to_string()));
                assert!(s3.force_path_style);
            }
            _ => panic!("Expected S3 store"),
        }
        assert_eq!(config.store.root_prefix(), Some("exports/"));
        config.validate().unwrap();
    }

    #[test]
    fn test_credentials_from_environment() {
        std::env::set_var("BUCKET_FTP_CFG_USER", "envuser");
        std::env::set_var("BUCKET_FTP_CFG_PASSWD", "envpass");
        let yaml = r#"
auth:
  user: ${BUCKET_FTP_CFG_USER}
  password: ${BUCKET_FTP_CFG_PASSWD}
store:
  type: memory
"#;
        let config = Config::from_str(yaml).unwrap();
        assert_eq!(config.auth.user, "envuser");
        assert_eq!(config.auth.password, "envpass");
        std::env::remove_var("BUCKET_FTP_CFG_USER");
        std::env::remove_var("BUCKET_FTP_CFG_PASSWD");
    }

    #[test]
    fn test_missing_env_is_reported() {
        let yaml = r#"
auth:
  user: ${BUCKET_FTP_UNSET_USER_VAR}
  password: x
store:
  type: memory
"#;
        let err = Config::from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("BUCKET_FTP_UNSET_USER_VAR"));
    }

    #[test]
    fn test_missing_password_error() {
        let yaml = r#"
auth:
  user: someone
store:
  type: memory
"#;
        let err = Config::from_str(yaml).unwrap_err();
        assert!(
            err.to_string().contains("auth.password"),
            "Error should mention missing password: {}",
            err
        );
    }

    #[test]
    fn test_validate_rejects_empty_credentials() {
        let yaml = r#"
auth:
  user: ""
  password: ""
store:
  type: memory
"#;
        let config = Config::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_small_s3_parts() {
        let yaml = r#"
auth:
  user: u
  password: p
store:
  type: s3
  bucket: b
transfer:
  part_size: 1MB
"#;
        let config = Config::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("part_size"));
    }

    #[test]
    fn test_invalid_size_string() {
        let yaml = r#"
auth:
  user: u
  password: p
store:
  type: memory
transfer:
  pipe_buffer_size: lots
"#;
        let err = Config::from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("pipe_buffer_size"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.auth.user, "ftpuser");

        let missing = Config::from_file(Path::new("/nonexistent/bucket-ftp.yaml"));
        assert!(matches!(missing, Err(ConfigError::ReadError(_, _))));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials {
            user: "u".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1GB"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_size("8MB"), Some(8 * 1024 * 1024));
        assert_eq!(parse_size("64kb"), Some(64 * 1024));
        assert_eq!(parse_size("512B"), Some(512));
        assert_eq!(parse_size("4096"), Some(4096));
        assert_eq!(parse_size("big"), None);
    }
}
