//! S3-compatible storage driver.
//!
//! Uses the store's native presigning so artifact bytes never pass
//! through the gateway. Path-style addressing keeps S3-compatible
//! backends (MinIO, R2) working through the same driver.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::presigning::PresigningConfig;

use super::{DriverError, StorageDriver};
use crate::config::S3DriverConfig;

pub struct S3Driver {
    client: aws_sdk_s3::Client,
    bucket: String,
    presign_expiry: Duration,
}

impl S3Driver {
    pub async fn new(config: &S3DriverConfig) -> Self {
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared).force_path_style(true);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            presign_expiry: config.presign_expiry,
        }
    }

    fn presign_config(&self) -> Result<PresigningConfig, DriverError> {
        PresigningConfig::expires_in(self.presign_expiry)
            .map_err(|err| DriverError::Presign(err.to_string()))
    }
}

#[async_trait]
impl StorageDriver for S3Driver {
    async fn exists(&self, key: &str) -> Result<bool, DriverError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(ctx)) if ctx.err().is_not_found() => Ok(false),
            Err(err) => Err(DriverError::Backend(err.to_string())),
        }
    }

    async fn presign_put(&self, key: &str) -> Result<String, DriverError> {
        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(self.presign_config()?)
            .await
            .map_err(|err| DriverError::Presign(err.to_string()))?;
        Ok(presigned.uri().to_string())
    }

    async fn presign_get(&self, key: &str) -> Result<String, DriverError> {
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(self.presign_config()?)
            .await
            .map_err(|err| DriverError::Presign(err.to_string()))?;
        Ok(presigned.uri().to_string())
    }
}
