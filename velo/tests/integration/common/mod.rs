use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use velo::engine::executor::{GraphExecutor, TaskError};
use velo::engine::graph::TaskGraph;
use velo::engine::packages::Workspace;
use velo_common::{CacheKey, ProjectConfig, TaskDefinition};

/// A scratch monorepo with helpers for building fixtures.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp workspace"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file, creating parent directories.
    pub fn write_file(&self, rel: &str, contents: &str) {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(path, contents).expect("write fixture file");
    }

    pub fn read_file(&self, rel: &str) -> String {
        std::fs::read_to_string(self.root().join(rel)).expect("read fixture file")
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    /// Count lines of a log file; missing files count zero. Commands
    /// append to these logs so tests can count executions.
    pub fn log_lines(&self, rel: &str) -> usize {
        match std::fs::read_to_string(self.root().join(rel)) {
            Ok(contents) => contents.lines().count(),
            Err(_) => 0,
        }
    }

    /// Write a `package.json` declaring workspace deps.
    pub fn manifest(&self, dir: &str, name: &str, deps: &[&str]) {
        let deps_json: Vec<String> = deps
            .iter()
            .map(|d| format!(r#""{d}": "workspace:*""#))
            .collect();
        self.write_file(
            &format!("{dir}/package.json"),
            &format!(
                r#"{{ "name": "{name}", "dependencies": {{ {} }} }}"#,
                deps_json.join(", ")
            ),
        );
    }

    /// Archives currently in the local store.
    pub fn stored_archives(&self) -> Vec<PathBuf> {
        let cache = self.root().join(".velocity/cache");
        let Ok(entries) = std::fs::read_dir(cache) else {
            return Vec::new();
        };
        let mut archives: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.to_string_lossy().ends_with(".tar.gz"))
            .collect();
        archives.sort();
        archives
    }
}

/// Build a single-task pipeline definition.
pub fn task(command: &str, inputs: &[&str], outputs: &[&str], depends_on: &[&str]) -> TaskDefinition {
    TaskDefinition {
        command: command.to_string(),
        inputs: inputs.iter().map(|s| s.to_string()).collect(),
        outputs: outputs.iter().map(|s| s.to_string()).collect(),
        depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
        env_keys: Vec::new(),
    }
}

/// Assemble an executor for `task_name` and run it to completion.
pub async fn run_task(
    ws: &TestWorkspace,
    config: &ProjectConfig,
    task_name: &str,
    package: Option<&str>,
) -> Result<CacheKey, TaskError> {
    let workspace = Workspace::discover(ws.root(), &config.packages).expect("discover packages");
    let target = workspace.select_target(package).expect("select target");
    let graph =
        TaskGraph::build(task_name, target, &workspace, &config.pipeline).expect("build graph");
    let executor = Arc::new(
        GraphExecutor::new(ws.root().to_path_buf(), workspace, graph, config)
            .expect("create executor"),
    );
    executor.execute().await
}
