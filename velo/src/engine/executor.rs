//! Parallel graph execution.
//!
//! Every node runs at most once: its outcome lives in a per-node
//! `OnceCell` that dependents await, carrying either the node's cache
//! key or its error. Independent branches proceed concurrently; a
//! node's own key is derived only after every dependency has resolved,
//! so the dependency-key set is stable input.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tracing::debug;

use velo_common::{
    metadata_object_name, CacheKey, CacheMetadata, NegotiateStatus, ProjectConfig, ACTION_DOWNLOAD,
    ACTION_UPLOAD, ARCHIVE_EXT,
};

use super::fingerprint;
use super::graph::{NodeId, TaskGraph};
use super::packages::Workspace;
use super::process;
use super::remote::RemoteClient;
use super::store::LocalStore;
use crate::ui;

/// Execution state of a node, written once per transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Per-node failure. Cloneable because a node broadcasts its outcome to
/// every dependent; messages carry the underlying error text.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("generate cache key for {id}: {message}")]
    Fingerprint { id: String, message: String },

    #[error("execute task {id}: command failed with exit code {code}")]
    CommandFailed {
        id: String,
        command: String,
        code: i32,
    },

    #[error("launch command for {id}: {message}")]
    CommandLaunch { id: String, message: String },

    #[error("local cache for {id}: {message}")]
    LocalCache { id: String, message: String },

    #[error("archive outputs for {id}: {message}")]
    Archive { id: String, message: String },

    #[error("restore outputs for {id}: {message}")]
    Restore { id: String, message: String },

    #[error("download remote cache for {id}: {message}")]
    RemoteDownload { id: String, message: String },

    #[error("internal executor failure: {message}")]
    Internal { message: String },
}

impl TaskError {
    /// Exit code to propagate to the host process, when one exists.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::CommandFailed { code, .. } => Some(if *code == 0 { 1 } else { *code }),
            _ => None,
        }
    }
}

type TaskOutcome = Result<CacheKey, TaskError>;

type BoxedOutcome = Pin<Box<dyn std::future::Future<Output = TaskOutcome> + Send>>;

/// Walks a task graph, restoring from cache or executing as needed.
pub struct GraphExecutor {
    workspace_root: PathBuf,
    workspace: Workspace,
    graph: TaskGraph,
    store: LocalStore,
    remote: Option<RemoteClient>,
    cells: Vec<OnceCell<TaskOutcome>>,
    states: Vec<Mutex<TaskState>>,
}

impl GraphExecutor {
    pub fn new(
        workspace_root: PathBuf,
        workspace: Workspace,
        graph: TaskGraph,
        config: &ProjectConfig,
    ) -> Result<Self, TaskError> {
        let remote = if config.remote.enabled && !config.remote.url.trim().is_empty() {
            let client = RemoteClient::new(&config.remote.url, &config.remote.token)
                .map_err(|err| TaskError::Internal {
                    message: format!("create remote client: {err}"),
                })?;
            Some(client)
        } else {
            None
        };

        let store = LocalStore::new(&workspace_root);
        let node_count = graph.len();
        Ok(Self {
            workspace_root,
            workspace,
            graph,
            store,
            remote,
            cells: (0..node_count).map(|_| OnceCell::new()).collect(),
            states: (0..node_count).map(|_| Mutex::new(TaskState::Pending)).collect(),
        })
    }

    /// Execute the whole graph; the returned key is the root node's.
    pub async fn execute(self: Arc<Self>) -> TaskOutcome {
        let root = self.graph.root;
        self.run_node(root).await
    }

    /// Observed state of a node.
    pub fn state(&self, id: NodeId) -> TaskState {
        *self.states[id].lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, id: NodeId, state: TaskState) {
        *self.states[id]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    /// Await the node's once-only outcome, computing it on first entry.
    fn run_node(self: Arc<Self>, id: NodeId) -> BoxedOutcome {
        Box::pin(async move {
            let cell = &self.cells[id];
            cell.get_or_init(|| {
                let this = Arc::clone(&self);
                async move {
                    let outcome = Arc::clone(&this).run_node_inner(id).await;
                    this.set_state(
                        id,
                        if outcome.is_ok() {
                            TaskState::Succeeded
                        } else {
                            TaskState::Failed
                        },
                    );
                    outcome
                }
            })
            .await
            .clone()
        })
    }

    async fn run_node_inner(self: Arc<Self>, id: NodeId) -> TaskOutcome {
        self.set_state(id, TaskState::Running);

        let node = self.graph.node(id);
        let identity = node.id.clone();
        ui::task_header(&identity);

        // Launch all direct dependencies concurrently and collect their
        // keys. Siblings already in flight run to completion even when
        // one fails; the first observed error wins.
        let mut dep_keys = Vec::with_capacity(node.children.len());
        if !node.children.is_empty() {
            let mut set = JoinSet::new();
            for &child in &node.children {
                set.spawn(Arc::clone(&self).run_node(child));
            }

            let mut first_error: Option<TaskError> = None;
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(Ok(key)) => dep_keys.push(key),
                    Ok(Err(err)) => {
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                    }
                    Err(join_err) => {
                        if first_error.is_none() {
                            first_error = Some(TaskError::Internal {
                                message: join_err.to_string(),
                            });
                        }
                    }
                }
            }
            if let Some(err) = first_error {
                return Err(err);
            }
        }

        let package_dir = self
            .workspace_root
            .join(&self.workspace.package(node.package).path);
        let definition = node.definition.clone();

        // Key derivation happens strictly after all deps resolved.
        let local_key = {
            let definition = definition.clone();
            let package_dir = package_dir.clone();
            tokio::task::spawn_blocking(move || fingerprint::local_key(&definition, &package_dir))
                .await
                .map_err(|err| TaskError::Internal {
                    message: err.to_string(),
                })?
                .map_err(|err| TaskError::Fingerprint {
                    id: identity.clone(),
                    message: err.to_string(),
                })?
        };
        let key = fingerprint::task_cache_key(&identity, &local_key, &dep_keys);
        debug!(task = %identity, key = %key, "derived cache key");

        let saved = self.saved_duration(&key);
        let started = Instant::now();

        // Local probe.
        let probed = self.store.probe(&key).map_err(|err| TaskError::LocalCache {
            id: identity.clone(),
            message: err.to_string(),
        })?;
        if let Some(archive_path) = probed {
            self.restore(&identity, &archive_path, &definition.outputs, &package_dir)
                .await?;
            ui::cache_hit("local", started.elapsed(), saved);
            return Ok(key);
        }

        // Remote probe. Negotiation failures degrade to a miss; a failed
        // transfer after "found" is fatal because the gateway promised
        // the object exists.
        if let Some(remote) = &self.remote {
            match remote.negotiate(key.as_str(), ACTION_DOWNLOAD).await {
                Ok(Some(resp))
                    if resp.status == NegotiateStatus::Found && resp.url.is_some() =>
                {
                    let url = resp.url.unwrap_or_default();
                    let archive_path = self
                        .fetch_remote(remote, &identity, &key, &url)
                        .await?;
                    let saved = self.saved_duration(&key).or(saved);
                    self.restore(&identity, &archive_path, &definition.outputs, &package_dir)
                        .await?;
                    ui::cache_hit("remote", started.elapsed(), saved);
                    return Ok(key);
                }
                Ok(Some(resp)) => {
                    ui::warn(&format!(
                        "unexpected negotiation status {:?}; treating as cache miss",
                        resp.status
                    ));
                }
                Ok(None) => debug!(task = %identity, "remote cache miss"),
                Err(err) => {
                    ui::warn(&format!(
                        "remote negotiation failed ({err}); treating as cache miss"
                    ));
                }
            }
        }

        // Miss: execute, archive, save, push.
        ui::cache_miss_executing(&definition.command);
        let exec_started = Instant::now();
        let status = process::run_shell(&definition.command, &package_dir)
            .await
            .map_err(|err| TaskError::CommandLaunch {
                id: identity.clone(),
                message: err.to_string(),
            })?;
        let exec_duration = exec_started.elapsed();

        if !status.success() {
            let code = process::exit_code(status);
            ui::command_failed(&definition.command, code);
            return Err(TaskError::CommandFailed {
                id: identity,
                command: definition.command,
                code,
            });
        }

        let archive_path = {
            let tmp = tempfile::tempdir().map_err(|err| TaskError::Internal {
                message: format!("create temp dir: {err}"),
            })?;
            let tmp_archive = tmp.path().join(format!("{key}.{ARCHIVE_EXT}"));
            {
                let outputs = definition.outputs.clone();
                let tmp_archive = tmp_archive.clone();
                let package_dir = package_dir.clone();
                tokio::task::spawn_blocking(move || {
                    super::archive::compress(&outputs, &tmp_archive, &package_dir)
                })
                .await
                .map_err(|err| TaskError::Internal {
                    message: err.to_string(),
                })?
                .map_err(|err| TaskError::Archive {
                    id: identity.clone(),
                    message: err.to_string(),
                })?;
            }

            let store_key = key.clone();
            let this = Arc::clone(&self);
            tokio::task::spawn_blocking(move || this.store.save(&store_key, &tmp_archive))
                .await
                .map_err(|err| TaskError::Internal {
                    message: err.to_string(),
                })?
                .map_err(|err| TaskError::LocalCache {
                    id: identity.clone(),
                    message: err.to_string(),
                })?
            // The temp dir and its archive drop here; only the stored
            // copy survives.
        };

        let metadata = CacheMetadata {
            command: definition.command.clone(),
            duration_millis: (exec_duration.as_millis() as u64).max(1),
            recorded_at: Utc::now(),
        };
        if let Err(err) = self.store.save_metadata(&key, &metadata) {
            ui::warn(&format!("failed to record cache metadata: {err}"));
        }

        if let Some(remote) = &self.remote {
            self.push_remote(remote, &key, &archive_path).await;
        }

        ui::cache_stored(key.as_str(), exec_duration, Some(exec_duration));
        Ok(key)
    }

    /// Extract an archive over the declared outputs.
    async fn restore(
        &self,
        identity: &str,
        archive_path: &Path,
        outputs: &[String],
        package_dir: &Path,
    ) -> Result<(), TaskError> {
        let archive_path = archive_path.to_path_buf();
        let outputs = outputs.to_vec();
        let package_dir = package_dir.to_path_buf();
        tokio::task::spawn_blocking(move || {
            super::archive::extract(&archive_path, &outputs, &package_dir)
        })
        .await
        .map_err(|err| TaskError::Internal {
            message: err.to_string(),
        })?
        .map_err(|err| TaskError::Restore {
            id: identity.to_string(),
            message: err.to_string(),
        })
    }

    /// Download a remotely found archive into the local store, pulling
    /// the metadata sidecar best-effort alongside it.
    async fn fetch_remote(
        &self,
        remote: &RemoteClient,
        identity: &str,
        key: &CacheKey,
        url: &str,
    ) -> Result<PathBuf, TaskError> {
        let download_err = |message: String| TaskError::RemoteDownload {
            id: identity.to_string(),
            message,
        };

        let tmp = tempfile::tempdir().map_err(|err| download_err(err.to_string()))?;
        let tmp_archive = tmp.path().join(format!("{key}.{ARCHIVE_EXT}"));
        remote
            .download(url, &tmp_archive)
            .await
            .map_err(|err| download_err(err.to_string()))?;

        let saved = self
            .store
            .save(key, &tmp_archive)
            .map_err(|err| download_err(err.to_string()))?;

        // Metadata sidecar: nice for "saved Ns" reporting, never fatal.
        let meta_object = metadata_object_name(key);
        match remote.negotiate(&meta_object, ACTION_DOWNLOAD).await {
            Ok(Some(resp)) if resp.status == NegotiateStatus::Found => {
                if let (Some(meta_url), Ok(meta_path)) = (resp.url, self.store.metadata_path(key))
                {
                    if let Err(err) = remote.download(&meta_url, &meta_path).await {
                        debug!(error = %err, "metadata sidecar download failed");
                    }
                }
            }
            Ok(_) => {}
            Err(err) => debug!(error = %err, "metadata sidecar negotiation failed"),
        }

        Ok(saved)
    }

    /// Negotiate and push an archive (and its metadata sidecar) to the
    /// remote. Failures log a warning; the local artifact is canonical.
    async fn push_remote(&self, remote: &RemoteClient, key: &CacheKey, archive_path: &Path) {
        match remote.negotiate(key.as_str(), ACTION_UPLOAD).await {
            Ok(Some(resp)) => match resp.status {
                NegotiateStatus::Skipped => {
                    debug!(key = %key, "remote already has this archive");
                }
                NegotiateStatus::UploadNeeded => {
                    let Some(url) = resp.url else {
                        ui::warn("upload negotiation returned no URL");
                        return;
                    };
                    ui::info("Uploading to remote cache...");
                    if let Err(err) = remote.upload(&url, archive_path).await {
                        ui::warn(&format!("remote upload failed: {err}"));
                        return;
                    }
                    self.push_metadata(remote, key).await;
                }
                NegotiateStatus::Found => {
                    ui::warn("unexpected negotiation status for upload");
                }
            },
            Ok(None) => ui::warn("upload negotiation returned 404"),
            Err(err) => ui::warn(&format!("remote upload negotiation failed: {err}")),
        }
    }

    async fn push_metadata(&self, remote: &RemoteClient, key: &CacheKey) {
        let Ok(meta_path) = self.store.metadata_path(key) else {
            return;
        };
        if !meta_path.is_file() {
            return;
        }

        let meta_object = metadata_object_name(key);
        match remote.negotiate(&meta_object, ACTION_UPLOAD).await {
            Ok(Some(resp)) if resp.status == NegotiateStatus::UploadNeeded => {
                if let Some(url) = resp.url {
                    if let Err(err) = remote.upload(&url, &meta_path).await {
                        debug!(error = %err, "metadata sidecar upload failed");
                    }
                }
            }
            Ok(_) => {}
            Err(err) => debug!(error = %err, "metadata sidecar negotiation failed"),
        }
    }

    fn saved_duration(&self, key: &CacheKey) -> Option<Duration> {
        self.store
            .load_metadata(key)
            .ok()
            .flatten()
            .map(|meta| Duration::from_millis(meta.duration_millis))
    }
}
