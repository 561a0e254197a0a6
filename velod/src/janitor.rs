//! Retention sweep for the local-disk driver.
//!
//! Removes objects whose modification time is older than the configured
//! retention. `exists` touches mtime on every negotiation, so entries in
//! active use never cross the cutoff.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Spawn the periodic sweep. The task runs for the life of the process.
pub fn spawn(root: PathBuf, retention: Duration, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so a restart loop
        // cannot turn into a sweep loop.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let root = root.clone();
            let result =
                tokio::task::spawn_blocking(move || sweep(&root, retention)).await;
            match result {
                Ok(Ok(removed)) if removed > 0 => {
                    info!(removed, "janitor removed expired cache objects");
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!(error = %err, "janitor sweep failed"),
                Err(err) => warn!(error = %err, "janitor task failed"),
            }
        }
    })
}

/// Remove regular files under `root` older than `retention`.
///
/// Returns the number of files removed. Partially-written uploads use
/// dot-prefixed temp names and age out here like everything else.
pub fn sweep(root: &Path, retention: Duration) -> std::io::Result<usize> {
    let cutoff = SystemTime::now()
        .checked_sub(retention)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut removed = 0;
    for entry in walkdir::WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(std::io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let modified = entry.metadata().map_err(std::io::Error::other)?.modified()?;
        if modified < cutoff {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}
