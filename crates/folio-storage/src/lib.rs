#![warn(missing_docs)]

//! Folio storage subsystem: uniform blob access over a jailed local directory,
//! an S3-compatible bucket, or process memory.
//!
//! Every backend implements [`StorageProvider`]. Keys are `/`-separated,
//! relative, and validated by [`key::validate_key`] before they reach a backend.

pub mod error;
pub mod key;
pub mod local;
pub mod memory;
pub mod provider;
#[cfg(feature = "s3")]
pub mod s3;

pub use error::{StorageError, StorageResult};
pub use key::validate_key;
pub use local::LocalStore;
pub use memory::{MemoryStore, MemoryStoreStats};
pub use provider::{read_all, BlobReader, StorageProvider};
#[cfg(feature = "s3")]
pub use s3::{S3Config, S3Store};
