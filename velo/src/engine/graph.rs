//! Task graph expansion.
//!
//! Starting from a (task, package) pair, dependency references expand
//! recursively: a bare `task` stays in the same package, `^task` fans
//! out across every direct workspace dependency. Nodes live in an arena
//! and are deduplicated by identity; re-entering an identity that is
//! still on the recursion stack is a cycle.

use std::collections::{BTreeMap, HashMap, HashSet};

use thiserror::Error;

use velo_common::TaskDefinition;

use super::packages::{PackageId, Workspace};

/// Index into the graph's node arena.
pub type NodeId = usize;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("task {0:?} not defined in pipeline")]
    UnknownTask(String),

    #[error("detected cycle while building task graph at {0}")]
    Cycle(String),

    #[error("task {task:?} dependency {reference:?} missing task name")]
    EmptyDependency { task: String, reference: String },
}

/// An instantiated (package, task) pair.
#[derive(Debug, Clone)]
pub struct TaskNode {
    /// Identity string, `<package-path>#<task-name>`.
    pub id: String,
    pub package: PackageId,
    pub task_name: String,
    pub definition: TaskDefinition,
    /// Resolved dependencies, deduplicated by identity.
    pub children: Vec<NodeId>,
}

/// A fully expanded task graph. A DAG by construction.
#[derive(Debug)]
pub struct TaskGraph {
    pub nodes: Vec<TaskNode>,
    pub root: NodeId,
}

impl TaskGraph {
    /// Expand the graph for `task` on `target`.
    pub fn build(
        task: &str,
        target: PackageId,
        workspace: &Workspace,
        pipeline: &BTreeMap<String, TaskDefinition>,
    ) -> Result<Self, GraphError> {
        let mut builder = Builder {
            workspace,
            pipeline,
            nodes: Vec::new(),
            by_id: HashMap::new(),
            visiting: HashSet::new(),
        };
        let root = builder.expand(task, target)?;
        Ok(Self {
            nodes: builder.nodes,
            root,
        })
    }

    pub fn node(&self, id: NodeId) -> &TaskNode {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Identity of a (package, task) pair.
pub fn node_identity(workspace: &Workspace, package: PackageId, task: &str) -> String {
    format!(
        "{}#{}",
        workspace.package(package).path.display(),
        task
    )
}

struct Builder<'a> {
    workspace: &'a Workspace,
    pipeline: &'a BTreeMap<String, TaskDefinition>,
    nodes: Vec<TaskNode>,
    by_id: HashMap<String, NodeId>,
    /// Identities on the active recursion stack.
    visiting: HashSet<String>,
}

impl Builder<'_> {
    fn expand(&mut self, task: &str, package: PackageId) -> Result<NodeId, GraphError> {
        let identity = node_identity(self.workspace, package, task);

        if self.visiting.contains(&identity) {
            return Err(GraphError::Cycle(identity));
        }
        if let Some(&existing) = self.by_id.get(&identity) {
            return Ok(existing);
        }

        let definition = self
            .pipeline
            .get(task)
            .ok_or_else(|| GraphError::UnknownTask(task.to_string()))?
            .clone();

        self.visiting.insert(identity.clone());

        let mut children = Vec::new();
        let mut seen = HashSet::new();
        for reference in &definition.depends_on {
            let reference = reference.trim();
            if reference.is_empty() {
                continue;
            }

            if let Some(dep_task) = reference.strip_prefix('^') {
                if dep_task.is_empty() {
                    self.visiting.remove(&identity);
                    return Err(GraphError::EmptyDependency {
                        task: task.to_string(),
                        reference: reference.to_string(),
                    });
                }
                let deps = self.workspace.package(package).internal_deps.clone();
                for dep_package in deps {
                    let child = match self.expand(dep_task, dep_package) {
                        Ok(child) => child,
                        Err(err) => {
                            self.visiting.remove(&identity);
                            return Err(err);
                        }
                    };
                    if seen.insert(child) {
                        children.push(child);
                    }
                }
            } else {
                let child = match self.expand(reference, package) {
                    Ok(child) => child,
                    Err(err) => {
                        self.visiting.remove(&identity);
                        return Err(err);
                    }
                };
                if seen.insert(child) {
                    children.push(child);
                }
            }
        }

        self.visiting.remove(&identity);

        let id = self.nodes.len();
        self.nodes.push(TaskNode {
            id: identity.clone(),
            package,
            task_name: task.to_string(),
            definition,
            children,
        });
        self.by_id.insert(identity, id);
        Ok(id)
    }
}
