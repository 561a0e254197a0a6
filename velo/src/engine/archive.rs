//! Bidirectional mapping between a set of output directories and a
//! single sealed archive.
//!
//! The container is a gzip-compressed tar. Each declared output becomes
//! a top-level entry named after its base name; extraction rejects any
//! entry whose root is not one of the expected base names or whose path
//! is not a clean relative path.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::EntryType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("no outputs declared")]
    NoOutputs,

    #[error("output {0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("invalid output directory name {0:?}")]
    InvalidOutputName(String),

    #[error("duplicate output directory name {0:?}")]
    DuplicateOutputName(String),

    #[error("{context} {path}: {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected archive root in entry {0:?}")]
    UnexpectedRoot(String),

    #[error("unsafe path in archive entry {0:?}")]
    UnsafePath(String),

    #[error("malformed archive entry {0:?}")]
    Malformed(String),

    #[error("archive entry {0:?} is a symlink, unsupported on this platform")]
    SymlinkUnsupported(String),
}

fn io_err(context: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> ArchiveError {
    let path = path.to_path_buf();
    move |source| ArchiveError::Io {
        context,
        path,
        source,
    }
}

/// Seal the declared output directories into an archive at
/// `archive_path`.
///
/// Each output is resolved relative to `package_root` and must exist as
/// a directory; its base name becomes the archive's top-level entry. The
/// archive is written through a temp file and renamed into place so a
/// concurrent reader never observes a partial file.
pub fn compress(
    outputs: &[String],
    archive_path: &Path,
    package_root: &Path,
) -> Result<(), ArchiveError> {
    let roots = resolve_outputs(outputs, package_root)?;
    for (_, dir) in &roots {
        let meta = std::fs::metadata(dir).map_err(io_err("stat output", dir))?;
        if !meta.is_dir() {
            return Err(ArchiveError::NotADirectory(dir.clone()));
        }
    }

    let parent = archive_path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(io_err("create archive directory", parent))?;
    let tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(io_err("create temp archive", parent))?;

    let encoder = GzEncoder::new(tmp, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    for (base, dir) in &roots {
        append_tree(&mut builder, base, dir)?;
    }

    let encoder = builder
        .into_inner()
        .map_err(io_err("finalize archive", archive_path))?;
    let tmp = encoder
        .finish()
        .map_err(io_err("finalize archive", archive_path))?;
    tmp.persist(archive_path)
        .map_err(|err| ArchiveError::Io {
            context: "persist archive",
            path: archive_path.to_path_buf(),
            source: err.error,
        })?;
    Ok(())
}

fn append_tree<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    base: &str,
    dir: &Path,
) -> Result<(), ArchiveError> {
    for entry in walkdir::WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|err| ArchiveError::Io {
            context: "walk output",
            path: dir.to_path_buf(),
            source: std::io::Error::other(err),
        })?;

        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|_| ArchiveError::UnsafePath(entry.path().display().to_string()))?;
        let name = if rel.as_os_str().is_empty() {
            PathBuf::from(base)
        } else {
            Path::new(base).join(rel)
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            builder
                .append_dir(&name, entry.path())
                .map_err(io_err("archive directory", entry.path()))?;
        } else if file_type.is_symlink() {
            let target =
                std::fs::read_link(entry.path()).map_err(io_err("read symlink", entry.path()))?;
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            header.set_mode(0o777);
            builder
                .append_link(&mut header, &name, &target)
                .map_err(io_err("archive symlink", entry.path()))?;
        } else if file_type.is_file() {
            builder
                .append_path_with_name(entry.path(), &name)
                .map_err(io_err("archive file", entry.path()))?;
        }
        // Sockets, fifos, and devices are not task outputs; skip them.
    }
    Ok(())
}

/// Restore the declared outputs from an archive.
///
/// Every target directory is fully removed and recreated before any
/// entry is laid down, so files from a previous build never survive a
/// restore. Entry paths are sanitized: traversal sequences and roots
/// outside the expected output set are fatal.
pub fn extract(
    archive_path: &Path,
    outputs: &[String],
    package_root: &Path,
) -> Result<(), ArchiveError> {
    let roots = resolve_outputs(outputs, package_root)?;
    let targets: BTreeMap<&str, &PathBuf> =
        roots.iter().map(|(base, dir)| (base.as_str(), dir)).collect();

    for dir in targets.values() {
        match std::fs::remove_dir_all(dir) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ArchiveError::Io {
                    context: "clean output",
                    path: (*dir).clone(),
                    source,
                })
            }
        }
        std::fs::create_dir_all(dir).map_err(io_err("create output", dir))?;
    }

    let file = std::fs::File::open(archive_path).map_err(io_err("open archive", archive_path))?;
    let mut archive = tar::Archive::new(GzDecoder::new(std::io::BufReader::new(file)));

    for entry in archive
        .entries()
        .map_err(io_err("read archive", archive_path))?
    {
        let mut entry = entry.map_err(io_err("read archive", archive_path))?;
        let raw_path = entry
            .path()
            .map_err(io_err("read archive", archive_path))?
            .into_owned();
        let display = raw_path.display().to_string();

        let Some(components) = sanitize(&raw_path) else {
            return Err(ArchiveError::UnsafePath(display));
        };
        if components.is_empty() {
            continue;
        }

        let target_root = targets
            .get(components[0].as_str())
            .ok_or_else(|| ArchiveError::UnexpectedRoot(display.clone()))?;
        let rel: PathBuf = components[1..].iter().collect();
        let dest = target_root.join(&rel);

        match entry.header().entry_type() {
            EntryType::Directory => {
                std::fs::create_dir_all(&dest).map_err(io_err("create directory", &dest))?;
                restore_mode(&dest, &entry);
            }
            EntryType::Symlink => {
                if rel.as_os_str().is_empty() {
                    return Err(ArchiveError::Malformed(display));
                }
                let link = entry
                    .link_name()
                    .map_err(io_err("read archive", archive_path))?
                    .ok_or_else(|| ArchiveError::Malformed(display.clone()))?
                    .into_owned();
                ensure_parent(&dest)?;
                create_symlink(&link, &dest, &display)?;
            }
            EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => {
                if rel.as_os_str().is_empty() {
                    return Err(ArchiveError::Malformed(display));
                }
                ensure_parent(&dest)?;
                let mut out =
                    std::fs::File::create(&dest).map_err(io_err("create file", &dest))?;
                std::io::copy(&mut entry, &mut out).map_err(io_err("write file", &dest))?;
                drop(out);
                restore_mode(&dest, &entry);
            }
            // Hard links and special files never appear in our archives.
            _ => {}
        }
    }

    Ok(())
}

/// Normalize an entry path into its components; `None` means the path
/// escapes its root (absolute, prefixed, or containing `..`).
fn sanitize(path: &Path) -> Option<Vec<String>> {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => components.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(components)
}

fn resolve_outputs(
    outputs: &[String],
    package_root: &Path,
) -> Result<Vec<(String, PathBuf)>, ArchiveError> {
    if outputs.is_empty() {
        return Err(ArchiveError::NoOutputs);
    }

    let mut roots = Vec::with_capacity(outputs.len());
    let mut seen = std::collections::BTreeSet::new();
    for output in outputs {
        let rel = Path::new(output.trim());
        let Some(parts) = sanitize(rel) else {
            return Err(ArchiveError::InvalidOutputName(output.clone()));
        };
        let Some(base) = parts.last() else {
            return Err(ArchiveError::InvalidOutputName(output.clone()));
        };
        if !seen.insert(base.clone()) {
            return Err(ArchiveError::DuplicateOutputName(base.clone()));
        }
        roots.push((base.clone(), package_root.join(rel)));
    }
    Ok(roots)
}

fn ensure_parent(dest: &Path) -> Result<(), ArchiveError> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(io_err("create directory", parent))?;
    }
    Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &Path, dest: &Path, _entry: &str) -> Result<(), ArchiveError> {
    std::os::unix::fs::symlink(target, dest).map_err(io_err("create symlink", dest))
}

#[cfg(not(unix))]
fn create_symlink(_target: &Path, _dest: &Path, entry: &str) -> Result<(), ArchiveError> {
    Err(ArchiveError::SymlinkUnsupported(entry.to_string()))
}

/// Best-effort mode restoration; missing or unsupported modes are not
/// worth failing a restore over.
fn restore_mode<R: Read>(dest: &Path, entry: &tar::Entry<'_, R>) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(mode) = entry.header().mode() {
            let _ = std::fs::set_permissions(dest, std::fs::Permissions::from_mode(mode));
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (dest, entry);
    }
}
