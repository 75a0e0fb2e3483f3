//! Error types for the folio-media subsystem

use folio_storage::StorageError;

/// Result type alias for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// All errors that can occur while mapping, generating, or delivering assets
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    /// Unknown identifier, unsupported width, or missing source object
    #[error("Not found: {0}")]
    NotFound(String),
    /// Malformed identifier or path supplied by a caller
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// The variant queue has no free capacity
    #[error("Variant queue full")]
    Backpressure,
    /// The job's deadline passed before it could be scheduled or finished
    #[error("Variant job cancelled: deadline exceeded")]
    Cancelled,
    /// The pipeline no longer accepts jobs
    #[error("Variant pipeline shut down")]
    ShutDown,
    /// Decoding or encoding an image failed
    #[error("Codec failure: {0}")]
    Codec(String),
    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    /// I/O error outside the storage backends
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl MediaError {
    /// Returns true when the error means the requested thing does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MediaError::NotFound(_) | MediaError::Storage(StorageError::NotFound { .. })
        )
    }

    /// Returns true for errors caused by the caller rather than the system.
    pub fn is_client_error(&self) -> bool {
        self.is_not_found() || matches!(self, MediaError::InvalidInput(_))
    }
}
