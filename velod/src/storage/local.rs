//! Local-disk storage driver.
//!
//! Objects live as flat files under a root directory. "Presigned" URLs
//! point back at the gateway's own `/v1/proxy/blob/{key}` routes, which
//! stream bytes to and from this root.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use filetime::FileTime;

use super::{DriverError, StorageDriver};

pub struct LocalDriver {
    root: PathBuf,
    base_url: String,
}

impl LocalDriver {
    /// Create the driver, ensuring the object root exists.
    pub fn new(root: PathBuf, base_url: String) -> std::io::Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Filesystem path of an object. Keys are validated at the API layer
    /// before they reach the driver.
    pub fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn proxy_url(&self, key: &str) -> String {
        format!("{}/v1/proxy/blob/{}", self.base_url, key)
    }
}

#[async_trait]
impl StorageDriver for LocalDriver {
    async fn exists(&self, key: &str) -> Result<bool, DriverError> {
        let path = self.object_path(key);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {
                // Reset the janitor's retention clock on use.
                let now = FileTime::from_system_time(SystemTime::now());
                let _ = filetime::set_file_mtime(&path, now);
                Ok(true)
            }
            Ok(_) => Ok(false),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(DriverError::Io(err)),
        }
    }

    async fn presign_put(&self, key: &str) -> Result<String, DriverError> {
        Ok(self.proxy_url(key))
    }

    async fn presign_get(&self, key: &str) -> Result<String, DriverError> {
        Ok(self.proxy_url(key))
    }
}
