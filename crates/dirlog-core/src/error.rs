//! Error types for dirlog

use std::path::PathBuf;

/// Dirlog error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid config: {0}")]
    ConfigInvalid(String),

    #[error("Unable to open log file {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    #[error("Rotation failed: {0}")]
    RotateFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Rotation ledger corrupt: {0}")]
    LedgerCorrupt(String),

    #[error("Channel disabled: {0}")]
    ChannelDisabled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for dirlog
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::ConfigInvalid(msg.into())
    }

    pub fn open<P: Into<PathBuf>, S: Into<String>>(path: P, reason: S) -> Self {
        Error::OpenFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn rotate<S: Into<String>>(msg: S) -> Self {
        Error::RotateFailed(msg.into())
    }

    pub fn write<S: Into<String>>(msg: S) -> Self {
        Error::WriteFailed(msg.into())
    }

    pub fn ledger<S: Into<String>>(msg: S) -> Self {
        Error::LedgerCorrupt(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("maxdiskspace 1024 is less than max log size 2048");
        assert_eq!(
            err.to_string(),
            "Invalid config: maxdiskspace 1024 is less than max log size 2048"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_open_failed_carries_path() {
        let err = Error::open("/var/log/dirlog/errors", "permission denied");
        assert!(err.to_string().contains("/var/log/dirlog/errors"));
    }
}
