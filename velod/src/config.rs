//! Environment-driven gateway configuration.
//!
//! The gateway is 12-factor: everything comes from `VELOD_*` variables,
//! validated once at startup so misconfiguration fails fast instead of
//! surfacing as per-request 500s.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_PRESIGN_EXPIRY_MINS: u64 = 15;
const DEFAULT_JANITOR_INTERVAL_SECS: u64 = 3600;

/// Errors raised while reading the environment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GatewayConfigError {
    #[error("{var} is not set")]
    Missing { var: &'static str },

    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Full gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// TCP port to listen on.
    pub port: u16,
    /// Shared bearer token; `None` leaves the API unauthenticated.
    pub auth_token: Option<String>,
    /// Selected storage driver and its parameters.
    pub driver: DriverConfig,
}

/// Driver selection.
#[derive(Debug, Clone)]
pub enum DriverConfig {
    Local(LocalDriverConfig),
    S3(S3DriverConfig),
}

impl DriverConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::S3(_) => "s3",
        }
    }
}

/// Parameters for the local-disk driver.
#[derive(Debug, Clone)]
pub struct LocalDriverConfig {
    /// Directory holding the stored objects.
    pub root: PathBuf,
    /// Public base URL vended in proxy URLs.
    pub base_url: String,
    /// Entries older than this are removed by the janitor; `None`
    /// disables eviction.
    pub retention: Option<Duration>,
    /// How often the janitor sweeps.
    pub janitor_interval: Duration,
}

/// Parameters for the S3-compatible driver.
#[derive(Debug, Clone)]
pub struct S3DriverConfig {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible stores; `None` uses AWS.
    pub endpoint: Option<String>,
    /// Lifetime of vended presigned URLs.
    pub presign_expiry: Duration,
}

impl GatewayConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, GatewayConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read the configuration through a lookup function (testable).
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, GatewayConfigError> {
        let port = parse_u64(&lookup, "VELOD_PORT", u64::from(DEFAULT_PORT), 1, 65535)? as u16;
        let auth_token = lookup("VELOD_AUTH_TOKEN").filter(|t| !t.trim().is_empty());

        let driver_kind = lookup("VELOD_STORAGE_DRIVER").unwrap_or_else(|| "local".to_string());
        let driver = match driver_kind.as_str() {
            "local" => {
                let root = lookup("VELOD_LOCAL_ROOT")
                    .filter(|r| !r.trim().is_empty())
                    .ok_or(GatewayConfigError::Missing {
                        var: "VELOD_LOCAL_ROOT",
                    })?;
                let base_url = lookup("VELOD_BASE_URL")
                    .unwrap_or_else(|| format!("http://localhost:{port}"))
                    .trim_end_matches('/')
                    .to_string();
                let retention_hours =
                    parse_u64(&lookup, "VELOD_RETENTION_HOURS", 0, 0, 24 * 365)?;
                let janitor_interval = parse_u64(
                    &lookup,
                    "VELOD_JANITOR_INTERVAL_SECS",
                    DEFAULT_JANITOR_INTERVAL_SECS,
                    1,
                    u64::MAX,
                )?;
                DriverConfig::Local(LocalDriverConfig {
                    root: PathBuf::from(root),
                    base_url,
                    retention: (retention_hours > 0)
                        .then(|| Duration::from_secs(retention_hours * 3600)),
                    janitor_interval: Duration::from_secs(janitor_interval),
                })
            }
            "s3" => {
                let bucket = lookup("VELOD_S3_BUCKET")
                    .filter(|b| !b.trim().is_empty())
                    .ok_or(GatewayConfigError::Missing {
                        var: "VELOD_S3_BUCKET",
                    })?;
                let region = lookup("VELOD_S3_REGION")
                    .filter(|r| !r.trim().is_empty())
                    .ok_or(GatewayConfigError::Missing {
                        var: "VELOD_S3_REGION",
                    })?;
                let expiry_mins = parse_u64(
                    &lookup,
                    "VELOD_PRESIGN_EXPIRY_MINS",
                    DEFAULT_PRESIGN_EXPIRY_MINS,
                    1,
                    7 * 24 * 60,
                )?;
                DriverConfig::S3(S3DriverConfig {
                    bucket,
                    region,
                    endpoint: lookup("VELOD_S3_ENDPOINT").filter(|e| !e.trim().is_empty()),
                    presign_expiry: Duration::from_secs(expiry_mins * 60),
                })
            }
            other => {
                return Err(GatewayConfigError::Invalid {
                    var: "VELOD_STORAGE_DRIVER",
                    expected: "local or s3",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            port,
            auth_token,
            driver,
        })
    }
}

fn parse_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: u64,
    min: u64,
    max: u64,
) -> Result<u64, GatewayConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(n) if n >= min && n <= max => Ok(n),
            _ => Err(GatewayConfigError::Invalid {
                var,
                expected: "unsigned integer in range",
                value: raw,
            }),
        },
    }
}
