//! `velo init` - write a starter configuration.

use anyhow::{bail, Context};

use velo_common::CONFIG_FILE_NAME;

use crate::ui;

const CONFIG_TEMPLATE: &str = r#"{
  "version": 1,
  "remote": {
    "enabled": false,
    "url": "http://localhost:8080",
    "token": "${VELO_TOKEN}"
  },
  "packages": ["packages/*"],
  "pipeline": {
    "build": {
      "command": "echo replace me with your build command",
      "inputs": ["src/**"],
      "outputs": ["dist"],
      "depends_on": ["^build"],
      "env_keys": []
    }
  }
}
"#;

/// Write a starter `velocity.json` into the working directory.
pub fn init() -> anyhow::Result<()> {
    let workspace_root = std::env::current_dir().context("determine working directory")?;
    let path = workspace_root.join(CONFIG_FILE_NAME);
    if path.exists() {
        bail!("{CONFIG_FILE_NAME} already exists at {}", path.display());
    }

    std::fs::write(&path, CONFIG_TEMPLATE)
        .with_context(|| format!("write {}", path.display()))?;
    ui::info(&format!("Created {CONFIG_FILE_NAME}. Edit the pipeline, then try: velo run build"));
    Ok(())
}
