//! Negotiation wire protocol between the agent and the gateway.
//!
//! The agent never writes to the object store unconditionally: it posts
//! a `NegotiateRequest` first and only transfers bytes when the gateway
//! vends a URL.

use serde::{Deserialize, Serialize};

/// Negotiation action requesting permission to upload an object.
pub const ACTION_UPLOAD: &str = "upload";

/// Negotiation action requesting a download URL for an object.
pub const ACTION_DOWNLOAD: &str = "download";

/// Body of `POST /v1/negotiate`.
///
/// `action` is carried as a free string so the server owns validation
/// and can answer unknown values with a 400 instead of a decode error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiateRequest {
    /// Object key (a cache key, or a metadata sidecar name).
    pub hash: String,
    /// One of [`ACTION_UPLOAD`] or [`ACTION_DOWNLOAD`].
    pub action: String,
}

/// Outcome of a negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiateStatus {
    /// Upload requested but the object already exists; do not transfer.
    Skipped,
    /// Upload permitted; `url` accepts a `PUT` with the object bytes.
    UploadNeeded,
    /// Download permitted; `url` serves the object bytes via `GET`.
    Found,
}

/// Body of a successful negotiation response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiateResponse {
    pub status: NegotiateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl NegotiateResponse {
    pub fn skipped() -> Self {
        Self {
            status: NegotiateStatus::Skipped,
            url: None,
        }
    }

    pub fn upload_needed(url: impl Into<String>) -> Self {
        Self {
            status: NegotiateStatus::UploadNeeded,
            url: Some(url.into()),
        }
    }

    pub fn found(url: impl Into<String>) -> Self {
        Self {
            status: NegotiateStatus::Found,
            url: Some(url.into()),
        }
    }
}
