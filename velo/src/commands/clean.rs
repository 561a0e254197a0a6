//! `velo clean` - drop the local cache.

use anyhow::Context;

use crate::engine::store::LocalStore;
use crate::ui;

/// Remove the local cache directory. Every subsequent task becomes a
/// miss; nothing else changes.
pub fn clean() -> anyhow::Result<()> {
    let workspace_root = std::env::current_dir().context("determine working directory")?;
    let store = LocalStore::new(&workspace_root);
    store.clean().context("remove local cache")?;
    ui::info(&format!("Removed local cache at {}", store.root().display()));
    Ok(())
}
