//! Content-addressed on-disk cache of archives and metadata sidecars.
//!
//! A flat directory under `<workspace>/.velocity/cache/`, keyed by
//! fingerprint: `<key>.tar.gz` plus `<key>.meta.json`. The directory is
//! disposable; removing it just turns every task into a miss.

use std::path::{Path, PathBuf};

use thiserror::Error;

use velo_common::{CacheKey, CacheMetadata, ARCHIVE_EXT, METADATA_EXT};

const VELOCITY_DIR: &str = ".velocity";
const CACHE_SUBDIR: &str = "cache";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid cache key: {0}")]
    InvalidKey(String),

    #[error("{0} is not a regular file")]
    NotAFile(PathBuf),

    #[error("{context} {path}: {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(context: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> StoreError {
    let path = path.to_path_buf();
    move |source| StoreError::Io {
        context,
        path,
        source,
    }
}

pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(workspace_root: &Path) -> Self {
        Self {
            root: workspace_root.join(VELOCITY_DIR).join(CACHE_SUBDIR),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the archive for `key`, after key validation.
    pub fn archive_path(&self, key: &CacheKey) -> Result<PathBuf, StoreError> {
        self.entry_path(key, ARCHIVE_EXT)
    }

    /// Path of the metadata sidecar for `key`, after key validation.
    pub fn metadata_path(&self, key: &CacheKey) -> Result<PathBuf, StoreError> {
        self.entry_path(key, METADATA_EXT)
    }

    fn entry_path(&self, key: &CacheKey, ext: &str) -> Result<PathBuf, StoreError> {
        velo_common::validate_object_key(key.as_str())
            .map_err(|err| StoreError::InvalidKey(err.to_string()))?;
        Ok(self.root.join(format!("{key}.{ext}")))
    }

    /// Look up an archive. Found only when the entry is a regular file.
    pub fn probe(&self, key: &CacheKey) -> Result<Option<PathBuf>, StoreError> {
        let path = self.archive_path(key)?;
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(Some(path)),
            Ok(_) => Err(StoreError::NotAFile(path)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                context: "stat cache entry",
                path,
                source,
            }),
        }
    }

    /// Copy a temp archive into the store.
    ///
    /// Same-file sources short-circuit. The copy lands in a temp file in
    /// the store root and is renamed into place, so a concurrent reader
    /// sees either the old bytes or the new ones, never a torn entry.
    pub fn save(&self, key: &CacheKey, source: &Path) -> Result<PathBuf, StoreError> {
        let dest = self.archive_path(key)?;

        let meta = std::fs::metadata(source).map_err(io_err("stat source archive", source))?;
        if !meta.is_file() {
            return Err(StoreError::NotAFile(source.to_path_buf()));
        }

        std::fs::create_dir_all(&self.root).map_err(io_err("create cache dir", &self.root))?;

        if same_file(source, &dest) {
            return Ok(dest);
        }

        let tmp = tempfile::NamedTempFile::new_in(&self.root)
            .map_err(io_err("create temp file", &self.root))?;
        std::fs::copy(source, tmp.path()).map_err(io_err("copy archive", source))?;
        tmp.persist(&dest).map_err(|err| StoreError::Io {
            context: "persist archive",
            path: dest.clone(),
            source: err.error,
        })?;
        Ok(dest)
    }

    /// Write the metadata sidecar for `key`.
    pub fn save_metadata(&self, key: &CacheKey, meta: &CacheMetadata) -> Result<(), StoreError> {
        let path = self.metadata_path(key)?;
        std::fs::create_dir_all(&self.root).map_err(io_err("create cache dir", &self.root))?;

        let contents = serde_json::to_vec_pretty(meta).map_err(|err| StoreError::Io {
            context: "encode metadata",
            path: path.clone(),
            source: std::io::Error::other(err),
        })?;

        let tmp = tempfile::NamedTempFile::new_in(&self.root)
            .map_err(io_err("create temp file", &self.root))?;
        std::fs::write(tmp.path(), contents).map_err(io_err("write metadata", &path))?;
        tmp.persist(&path).map_err(|err| StoreError::Io {
            context: "persist metadata",
            path,
            source: err.error,
        })?;
        Ok(())
    }

    /// Read the metadata sidecar for `key`. Missing or unparseable
    /// sidecars read as `None`; they are advisory, not authoritative.
    pub fn load_metadata(&self, key: &CacheKey) -> Result<Option<CacheMetadata>, StoreError> {
        let path = self.metadata_path(key)?;
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    context: "read metadata",
                    path,
                    source,
                })
            }
        };
        Ok(serde_json::from_slice(&raw).ok())
    }

    /// Remove the entire store root.
    pub fn clean(&self) -> Result<(), StoreError> {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                context: "remove cache dir",
                path: self.root.clone(),
                source,
            }),
        }
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
