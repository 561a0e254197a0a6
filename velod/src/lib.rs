//! velod - stateless gateway for the velocity build cache.
//!
//! The gateway is a vending machine: it checks object existence against
//! a pluggable storage driver and issues short-lived signed URLs. It
//! never proxies payloads itself, except for the local-disk driver whose
//! "signed URLs" point back at the gateway's own streaming proxy.
//!
//! All state lives in the object store; replicas can sit behind any load
//! balancer.

#![forbid(unsafe_code)]

pub mod config;
pub mod http_api;
pub mod janitor;
pub mod storage;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use config::{DriverConfig, GatewayConfig};
use http_api::GatewayState;
use storage::local::LocalDriver;
use storage::s3::S3Driver;
use storage::StorageDriver;

/// Build the shared handler state from a gateway configuration.
///
/// Selects and initializes the storage driver; the proxy routes are only
/// mounted when the local-disk driver is active.
pub async fn build_state(config: &GatewayConfig) -> anyhow::Result<GatewayState> {
    let (driver, proxy_root): (Arc<dyn StorageDriver>, _) = match &config.driver {
        DriverConfig::Local(local) => {
            let driver = LocalDriver::new(local.root.clone(), local.base_url.clone())
                .context("initialize local storage driver")?;
            (Arc::new(driver), Some(local.root.clone()))
        }
        DriverConfig::S3(s3) => {
            let driver = S3Driver::new(s3).await;
            (Arc::new(driver), None)
        }
    };

    Ok(GatewayState {
        driver,
        auth_token: config.auth_token.clone(),
        proxy_root,
    })
}

/// Run the gateway until the process is terminated.
pub async fn serve(config: GatewayConfig) -> anyhow::Result<()> {
    if config.auth_token.is_none() {
        warn!("running without VELOD_AUTH_TOKEN; the API is public");
    }

    if let DriverConfig::Local(local) = &config.driver {
        if let Some(retention) = local.retention {
            let _sweeper = janitor::spawn(local.root.clone(), retention, local.janitor_interval);
        }
    }

    let state = build_state(&config).await?;
    let app = http_api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(port = config.port, driver = config.driver.kind(), "gateway listening");

    axum::serve(listener, app).await.context("serve")?;
    Ok(())
}
