//! Gateway entry point. Configuration is environment-driven; see
//! `config::GatewayConfig` for the recognized variables.

#![forbid(unsafe_code)]

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use velod::config::GatewayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = GatewayConfig::from_env().context("read gateway configuration")?;
    velod::serve(config).await
}
