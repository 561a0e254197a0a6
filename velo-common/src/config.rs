//! Project configuration loaded from the workspace root.
//!
//! The document is a single `velocity.json` describing the remote cache
//! endpoint, where package manifests live, and the task pipeline.
//! `${VAR}` references are expanded from the process environment before
//! parsing, so tokens can be kept out of the file itself.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the project configuration document.
pub const CONFIG_FILE_NAME: &str = "velocity.json";

/// Errors raised while loading the project configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Top-level project configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Format version of the document.
    #[serde(default)]
    pub version: u32,
    /// Remote cache settings.
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Directory globs identifying package manifests.
    #[serde(default)]
    pub packages: Vec<String>,
    /// Named task definitions.
    #[serde(default)]
    pub pipeline: BTreeMap<String, TaskDefinition>,
}

/// Remote cache endpoint settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// When false, remote negotiation is skipped entirely.
    #[serde(default)]
    pub enabled: bool,
    /// Gateway base URL.
    #[serde(default)]
    pub url: String,
    /// Bearer token; `${VAR}` expansion applies.
    #[serde(default)]
    pub token: String,
}

/// Declarative shape of a runnable task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Shell command to run on a cache miss.
    pub command: String,
    /// Input globs, evaluated relative to the package directory.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Output directories, relative to the package directory.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Dependency references: `task` (same package) or `^task`
    /// (the task in every direct workspace dependency).
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Environment variable names participating in the cache key.
    #[serde(default)]
    pub env_keys: Vec<String>,
}

impl ProjectConfig {
    /// Load `velocity.json` from `root`, expanding `${VAR}` references.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(CONFIG_FILE_NAME);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(path))
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };

        let expanded = expand_env(&raw);
        serde_json::from_str(&expanded).map_err(|source| ConfigError::Parse { path, source })
    }
}

/// Expand `${VAR}` references from the process environment.
///
/// Unset variables expand to the empty string. Anything that is not a
/// well-formed `${NAME}` reference is passed through unchanged.
pub fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if is_valid_var_name(&after[..end]) => {
                out.push_str(&std::env::var(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            _ => {
                out.push_str("${");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn is_valid_var_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}
