//! Shared building blocks for the velocity build cache.
//!
//! This crate carries everything the agent (`velo`) and the gateway
//! (`velod`) agree on: cache-key and metadata types, the project
//! configuration document, and the negotiation wire protocol.

#![forbid(unsafe_code)]

pub mod config;
pub mod protocol;
pub mod types;

pub use config::{ProjectConfig, RemoteConfig, TaskDefinition, CONFIG_FILE_NAME};
pub use protocol::{NegotiateRequest, NegotiateResponse, NegotiateStatus, ACTION_DOWNLOAD, ACTION_UPLOAD};
pub use types::{
    metadata_object_name, validate_object_key, CacheKey, CacheMetadata, KeyError, ARCHIVE_EXT,
    METADATA_EXT,
};
