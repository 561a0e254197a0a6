//! Deterministic cache-key derivation.
//!
//! A task's key is `sha256("task:" + identity + ":" + local_key + "|" +
//! dep_summary)`. The local key composes the declared environment
//! variables, the command string, and the resolved input files; the dep
//! summary is the sorted set of upstream keys. Nothing else participates:
//! not mtimes, not absolute paths, not iteration order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use sha2::{Digest, Sha256};
use thiserror::Error;

use velo_common::{CacheKey, TaskDefinition};

/// Directories never considered as task inputs.
const EXCLUDED_DIRS: &[&str] = &[".git", ".velocity"];

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("invalid input glob {pattern:?}: {source}")]
    Glob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("compile .gitignore at {path}: {message}")]
    Gitignore { path: PathBuf, message: String },

    #[error("walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// SHA-256 of `data`, rendered as lowercase hex.
pub fn hash_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Compose a node's cache key from its identity, local key, and the
/// keys of its resolved dependencies.
///
/// The dependency contribution is order-insensitive: the keys are sorted
/// before joining, and omitted entirely (separator included) when there
/// are none.
pub fn task_cache_key(identity: &str, local_key: &str, dep_keys: &[CacheKey]) -> CacheKey {
    let mut input = format!("task:{identity}:{local_key}");
    if !dep_keys.is_empty() {
        let mut keys: Vec<&str> = dep_keys.iter().map(CacheKey::as_str).collect();
        keys.sort_unstable();
        input.push('|');
        input.push_str(&keys.join("|"));
    }
    CacheKey::new(hash_hex(input.as_bytes()))
}

/// Derive the package-local portion of a task's key.
///
/// Three categories, each hashed separately and labelled, joined by `|`:
/// `env:` (declared variables as sorted `NAME=VALUE` pairs), `cmd:` (the
/// command string verbatim), `files:` (resolved inputs as sorted
/// `relpath:content-hash` pairs). Empty env and files categories are
/// omitted.
pub fn local_key(def: &TaskDefinition, package_dir: &Path) -> Result<String, FingerprintError> {
    let mut parts = Vec::with_capacity(3);

    if !def.env_keys.is_empty() {
        let mut pairs: Vec<String> = def
            .env_keys
            .iter()
            .map(|name| format!("{}={}", name, std::env::var(name).unwrap_or_default()))
            .collect();
        pairs.sort();
        parts.push(format!("env:{}", hash_hex(pairs.join("|").as_bytes())));
    }

    parts.push(format!("cmd:{}", hash_hex(def.command.as_bytes())));

    let files = collect_input_files(package_dir, &def.inputs)?;
    if !files.is_empty() {
        let hashes = hash_files(&files)?;
        let entries: Vec<String> = files
            .iter()
            .zip(&hashes)
            .map(|((rel, _), sum)| format!("{rel}:{sum}"))
            .collect();
        parts.push(format!("files:{}", hash_hex(entries.join("|").as_bytes())));
    }

    Ok(parts.join("|"))
}

/// Resolve input globs to a sorted, deduplicated list of
/// `(package-relative unix path, absolute path)` pairs.
///
/// Directories are never matched directly; a `.gitignore` in the package
/// root filters matches. Globs that match nothing contribute nothing.
pub fn collect_input_files(
    package_dir: &Path,
    patterns: &[String],
) -> Result<Vec<(String, PathBuf)>, FingerprintError> {
    let Some(globs) = build_glob_set(patterns)? else {
        return Ok(Vec::new());
    };
    let gitignore = load_gitignore(package_dir)?;

    let mut files: BTreeMap<String, PathBuf> = BTreeMap::new();

    let walker = walkdir::WalkDir::new(package_dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir() && is_excluded_dir(entry.file_name()))
        });

    for entry in walker {
        let entry = entry.map_err(|source| FingerprintError::Walk {
            path: package_dir.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = match entry.path().strip_prefix(package_dir) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let rel_unix = unix_path(rel);
        if !globs.is_match(Path::new(&rel_unix)) {
            continue;
        }
        if let Some(matcher) = &gitignore {
            if matcher.matched_path_or_any_parents(rel, false).is_ignore() {
                continue;
            }
        }

        files.insert(rel_unix, entry.path().to_path_buf());
    }

    Ok(files.into_iter().collect())
}

fn is_excluded_dir(name: &std::ffi::OsStr) -> bool {
    EXCLUDED_DIRS.iter().any(|dir| name == *dir)
}

fn build_glob_set(patterns: &[String]) -> Result<Option<GlobSet>, FingerprintError> {
    let mut builder = GlobSetBuilder::new();
    let mut any = false;
    for pattern in patterns {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            continue;
        }
        let glob = GlobBuilder::new(trimmed)
            .literal_separator(true)
            .build()
            .map_err(|source| FingerprintError::Glob {
                pattern: trimmed.to_string(),
                source,
            })?;
        builder.add(glob);
        any = true;
    }
    if !any {
        return Ok(None);
    }
    let set = builder.build().map_err(|source| FingerprintError::Glob {
        pattern: patterns.join(","),
        source,
    })?;
    Ok(Some(set))
}

fn load_gitignore(package_dir: &Path) -> Result<Option<Gitignore>, FingerprintError> {
    let path = package_dir.join(".gitignore");
    match std::fs::metadata(&path) {
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(FingerprintError::Io { path, source }),
        Ok(_) => {}
    }

    let mut builder = GitignoreBuilder::new(package_dir);
    if let Some(err) = builder.add(&path) {
        return Err(FingerprintError::Gitignore {
            path,
            message: err.to_string(),
        });
    }
    let matcher = builder.build().map_err(|err| FingerprintError::Gitignore {
        path,
        message: err.to_string(),
    })?;
    Ok(Some(matcher))
}

fn unix_path(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    parts.join("/")
}

/// Hash file contents concurrently across a pool sized to available
/// parallelism. Results come back in input order; the first read error
/// is fatal.
fn hash_files(files: &[(String, PathBuf)]) -> Result<Vec<String>, FingerprintError> {
    if files.is_empty() {
        return Ok(Vec::new());
    }

    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(files.len());

    let next = AtomicUsize::new(0);
    let slots: Vec<std::sync::OnceLock<Result<String, FingerprintError>>> =
        files.iter().map(|_| std::sync::OnceLock::new()).collect();

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let index = next.fetch_add(1, Ordering::Relaxed);
                if index >= files.len() {
                    break;
                }
                let _ = slots[index].set(hash_file(&files[index].1));
            });
        }
    });

    let mut hashes = Vec::with_capacity(files.len());
    for (slot, (_, path)) in slots.into_iter().zip(files) {
        match slot.into_inner() {
            Some(Ok(sum)) => hashes.push(sum),
            Some(Err(err)) => return Err(err),
            // A slot can only be empty if a worker panicked mid-file.
            None => {
                return Err(FingerprintError::Io {
                    path: path.clone(),
                    source: std::io::Error::other("file hashing worker failed"),
                })
            }
        }
    }
    Ok(hashes)
}

fn hash_file(path: &Path) -> Result<String, FingerprintError> {
    let map_err = |source| FingerprintError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::fs::File::open(path).map_err(map_err)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(map_err)?;
    Ok(format!("{:x}", hasher.finalize()))
}
