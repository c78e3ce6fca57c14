use std::io;
use thiserror::Error;

/// Main error type for bucket-ftp operations
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Path not found: {0}")]
    NotFound(String),

    /// Reserved: the store silently overwrites, so this is never raised today.
    #[error("Path already exists: {0}")]
    AlreadyExists(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid handle state: {0}")]
    InvalidState(String),

    #[error("Object store error: {0}")]
    Upstream(String),

    #[error("{failed} of {total} objects failed: {detail}")]
    PartialFailure {
        failed: usize,
        total: usize,
        detail: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DriverError {
    /// The closest `std::io::ErrorKind` for this error.
    ///
    /// Protocol engines that speak `std::io` use this to pick a reply.
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            DriverError::NotFound(_) => io::ErrorKind::NotFound,
            DriverError::AlreadyExists(_) => io::ErrorKind::AlreadyExists,
            DriverError::NotSupported(_) => io::ErrorKind::Unsupported,
            DriverError::AuthFailure(_) => io::ErrorKind::PermissionDenied,
            DriverError::InvalidPath(_) => io::ErrorKind::InvalidInput,
            DriverError::InvalidState(_) => io::ErrorKind::Other,
            DriverError::Upstream(_) => io::ErrorKind::Other,
            DriverError::PartialFailure { .. } => io::ErrorKind::Other,
            DriverError::Io(e) => e.kind(),
            DriverError::Config(_) => io::ErrorKind::InvalidInput,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::NotFound(_))
    }
}

impl From<DriverError> for io::Error {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Io(e) => e,
            other => io::Error::new(other.kind(), other),
        }
    }
}

/// Result type alias for bucket-ftp operations
pub type Result<T> = std::result::Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_kind_mapping() {
        let err: io::Error = DriverError::NotFound("a/b".to_string()).into();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        let err: io::Error = DriverError::NotSupported("seek".to_string()).into();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);

        let err: io::Error = DriverError::AuthFailure("bob".to_string()).into();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_io_error_passthrough() {
        let inner = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        let err: io::Error = DriverError::Io(inner).into();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_partial_failure_message() {
        let err = DriverError::PartialFailure {
            failed: 2,
            total: 5,
            detail: "a: AccessDenied".to_string(),
        };
        assert_eq!(err.to_string(), "2 of 5 objects failed: a: AccessDenied");
    }
}
