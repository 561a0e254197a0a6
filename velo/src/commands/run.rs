//! `velo run <task>` - the cached execution flow.

use std::sync::Arc;

use anyhow::{bail, Context};

use velo_common::{ProjectConfig, CONFIG_FILE_NAME};

use crate::engine::executor::GraphExecutor;
use crate::engine::graph::TaskGraph;
use crate::engine::packages::Workspace;

/// Execute `task` against the selected target package, with caching.
pub async fn run(task: &str, package: Option<&str>) -> anyhow::Result<()> {
    let workspace_root = std::env::current_dir().context("determine working directory")?;

    let config = ProjectConfig::load(&workspace_root).context("load project configuration")?;
    if !config.pipeline.contains_key(task) {
        bail!("task {task:?} not found in {CONFIG_FILE_NAME}");
    }

    let workspace = Workspace::discover(&workspace_root, &config.packages)
        .context("discover packages")?;
    let target = workspace.select_target(package)?;

    let graph = TaskGraph::build(task, target, &workspace, &config.pipeline)
        .context("build task graph")?;

    let executor = Arc::new(GraphExecutor::new(
        workspace_root,
        workspace,
        graph,
        &config,
    )?);
    executor.execute().await?;
    Ok(())
}
