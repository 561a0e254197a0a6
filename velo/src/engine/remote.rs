//! HTTP client for the gateway and for presigned object transfers.
//!
//! Negotiation calls are short and use a seconds-scale timeout; object
//! transfers stream and get minutes. Presigned URLs carry their own
//! authorization, so only negotiation sends the bearer token.

use std::path::Path;
use std::time::Duration;

use reqwest::header;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use velo_common::{NegotiateRequest, NegotiateResponse};

const NEGOTIATE_TIMEOUT: Duration = Duration::from_secs(30);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{context}: server returned status {status}")]
    Status { context: &'static str, status: u16 },

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

pub struct RemoteClient {
    base_url: String,
    token: String,
    negotiate_client: reqwest::Client,
    transfer_client: reqwest::Client,
}

impl RemoteClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self, RemoteError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            negotiate_client: reqwest::Client::builder()
                .timeout(NEGOTIATE_TIMEOUT)
                .build()?,
            transfer_client: reqwest::Client::builder()
                .timeout(TRANSFER_TIMEOUT)
                .build()?,
        })
    }

    /// Ask the gateway for permission to transfer `hash`.
    ///
    /// Returns `None` for a download negotiation that missed (the
    /// gateway answers 404); every other non-200 status is an error.
    pub async fn negotiate(
        &self,
        hash: &str,
        action: &str,
    ) -> Result<Option<NegotiateResponse>, RemoteError> {
        let mut request = self
            .negotiate_client
            .post(format!("{}/v1/negotiate", self.base_url))
            .json(&NegotiateRequest {
                hash: hash.to_string(),
                action: action.to_string(),
            });
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }

        let response = request.send().await?;
        match response.status().as_u16() {
            200 => Ok(Some(response.json().await?)),
            404 => Ok(None),
            status => Err(RemoteError::Status {
                context: "negotiate",
                status,
            }),
        }
    }

    /// Stream a presigned GET into `dest`.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<(), RemoteError> {
        let mut request = self.transfer_client.get(url);
        if self.is_proxy_url(url) && !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }
        let mut response = request.send().await?;
        if response.status().as_u16() != 200 {
            return Err(RemoteError::Status {
                context: "download object",
                status: response.status().as_u16(),
            });
        }

        let io_err = |source| RemoteError::Io {
            context: "write downloaded object",
            source,
        };
        let mut file = tokio::fs::File::create(dest).await.map_err(io_err)?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await.map_err(io_err)?;
        }
        file.flush().await.map_err(io_err)?;
        Ok(())
    }

    /// Stream `source` to a presigned PUT.
    pub async fn upload(&self, url: &str, source: &Path) -> Result<(), RemoteError> {
        let io_err = |source| RemoteError::Io {
            context: "read archive for upload",
            source,
        };
        let file = tokio::fs::File::open(source).await.map_err(io_err)?;
        let len = file.metadata().await.map_err(io_err)?.len();

        let mut request = self
            .transfer_client
            .put(url)
            .header(header::CONTENT_LENGTH, len)
            .header(header::CONTENT_TYPE, "application/gzip")
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)));
        if self.is_proxy_url(url) && !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }

        let response = request.send().await?;
        match response.status().as_u16() {
            200 | 201 | 204 => Ok(()),
            status => Err(RemoteError::Status {
                context: "upload object",
                status,
            }),
        }
    }

    /// Gateway-proxied URLs sit behind the same bearer token as the
    /// negotiation endpoint; true presigned URLs must not receive it.
    fn is_proxy_url(&self, url: &str) -> bool {
        url.starts_with(&self.base_url)
    }
}
