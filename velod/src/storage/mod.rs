//! Storage driver abstraction.
//!
//! A driver is a capability set of three operations; the gateway never
//! references driver-specific types past startup.

pub mod local;
pub mod s3;

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by storage drivers. All map to 5xx at the API layer.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("storage i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("presign: {0}")]
    Presign(String),

    #[error("storage backend: {0}")]
    Backend(String),
}

/// Capability set exposed by every object-store backend.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// HEAD-equivalent existence check.
    async fn exists(&self, key: &str) -> Result<bool, DriverError>;

    /// URL accepting a `PUT` with the object bytes, valid for a bounded
    /// lifetime.
    async fn presign_put(&self, key: &str) -> Result<String, DriverError>;

    /// URL serving the object bytes via `GET`, valid for a bounded
    /// lifetime.
    async fn presign_get(&self, key: &str) -> Result<String, DriverError>;
}
