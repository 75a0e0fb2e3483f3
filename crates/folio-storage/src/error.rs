//! Error types for the storage subsystem.

use thiserror::Error;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error variants for storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested object does not exist.
    #[error("Object not found: {key}")]
    NotFound {
        /// The key that was not found.
        key: String,
    },

    /// The key is malformed or would escape the backend's namespace.
    #[error("Invalid key {key:?}: {reason}")]
    InvalidKey {
        /// The rejected key.
        key: String,
        /// Why the key was rejected.
        reason: &'static str,
    },

    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The backend could not be reached or refused the request.
    #[error("{backend} backend error: {reason}")]
    Backend {
        /// Short backend name (`s3`, `memory`, ...).
        backend: &'static str,
        /// Description of the failure.
        reason: String,
    },
}

impl StorageError {
    /// Builds a [`StorageError::NotFound`] for `key`.
    pub fn not_found(key: &str) -> Self {
        StorageError::NotFound {
            key: key.to_string(),
        }
    }

    /// Returns true when the error means the object is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// Maps an I/O error on `key`, turning a missing file into [`StorageError::NotFound`].
    pub fn from_io(key: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            StorageError::not_found(key)
        } else {
            StorageError::IoError(err)
        }
    }
}
