//! File system errors.

use std::io;
use std::sync::Arc;
use std::time::Duration;
use streamfs_storage::ObjectStoreError;
use thiserror::Error;

/// Coarse classification of an [`FsError`], for branching without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotExist,
    Io,
    IsDirectory,
    NotDirectory,
    Closed,
    Canceled,
    Timeout,
    Configuration,
}

/// Error returned by every file system operation.
///
/// Cloneable so that a write stream can keep reporting the error that
/// ended its upload.
#[derive(Debug, Clone, Error)]
pub enum FsError {
    #[error("{op} {path}: invalid argument")]
    InvalidArgument { op: &'static str, path: String },

    #[error("glob {pattern}: invalid pattern: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("{op} {path}: file does not exist")]
    NotExist { op: &'static str, path: String },

    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: Arc<ObjectStoreError>,
    },

    #[error("{op} {path}: is a directory")]
    IsDirectory { op: &'static str, path: String },

    #[error("{op} {path}: not a directory")]
    NotDirectory { op: &'static str, path: String },

    #[error("{op} {path}: file already closed")]
    Closed { op: &'static str, path: String },

    #[error("write {path}: upload canceled")]
    Canceled { path: String },

    #[error("wait {path}: timed out after {timeout:?}")]
    Timeout { path: String, timeout: Duration },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl FsError {
    pub(crate) fn invalid(op: &'static str, path: impl Into<String>) -> Self {
        FsError::InvalidArgument {
            op,
            path: path.into(),
        }
    }

    pub(crate) fn io(op: &'static str, path: impl Into<String>, source: ObjectStoreError) -> Self {
        FsError::Io {
            op,
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Classify a storage failure once, at the descriptor that issued the call.
    ///
    /// Missing keys become `NotExist`, cancellation becomes `Canceled`, and
    /// everything else, timeouts included, is an I/O error scoped to the path.
    pub fn from_store(op: &'static str, path: impl Into<String>, err: ObjectStoreError) -> Self {
        let path = path.into();
        match err {
            ObjectStoreError::NotFound(_) => FsError::NotExist { op, path },
            ObjectStoreError::Canceled(_) => FsError::Canceled { path },
            other => FsError::io(op, path, other),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FsError::InvalidArgument { .. } | FsError::InvalidPattern { .. } => {
                ErrorKind::InvalidArgument
            }
            FsError::NotExist { .. } => ErrorKind::NotExist,
            FsError::Io { .. } => ErrorKind::Io,
            FsError::IsDirectory { .. } => ErrorKind::IsDirectory,
            FsError::NotDirectory { .. } => ErrorKind::NotDirectory,
            FsError::Closed { .. } => ErrorKind::Closed,
            FsError::Canceled { .. } => ErrorKind::Canceled,
            FsError::Timeout { .. } => ErrorKind::Timeout,
            FsError::Configuration(_) => ErrorKind::Configuration,
        }
    }

    pub fn is_not_exist(&self) -> bool {
        self.kind() == ErrorKind::NotExist
    }

    pub fn is_invalid_argument(&self) -> bool {
        self.kind() == ErrorKind::InvalidArgument
    }

    pub fn is_canceled(&self) -> bool {
        self.kind() == ErrorKind::Canceled
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    /// Recover the file system error carried inside an `io::Error`.
    pub fn from_io(err: &io::Error) -> Option<FsError> {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<FsError>())
            .cloned()
    }
}

impl From<FsError> for io::Error {
    fn from(err: FsError) -> Self {
        let kind = match err.kind() {
            ErrorKind::NotExist => io::ErrorKind::NotFound,
            ErrorKind::InvalidArgument => io::ErrorKind::InvalidInput,
            // not Interrupted: std read/write loops retry on that kind
            ErrorKind::Canceled => io::ErrorKind::ConnectionAborted,
            ErrorKind::Timeout => io::ErrorKind::TimedOut,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
