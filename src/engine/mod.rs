//! Container engine port
//!
//! The narrow capability surface the daemon needs from a container runtime.
//! Lifecycle code is written against [`ContainerEngine`] so the runtime can
//! be swapped (and mocked in tests).

mod docker;

#[cfg(test)]
pub mod mock;

pub use docker::{DockerEngine, MANAGED_LABEL, SERVER_LABEL};

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use tracing::{info, warn};

use crate::error::Error;
use crate::model::ServerStatus;

/// Engine errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("container not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("operation timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<EngineError> for Error {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound(id) => Error::NotFound("container", id),
            EngineError::Conflict(msg) => Error::Conflict(msg),
            EngineError::Timeout => Error::Timeout("engine call".into()),
            EngineError::Cancelled => Error::Cancelled,
            other => Error::EngineUnavailable(other.to_string()),
        }
    }
}

/// Engine-reported container state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Running,
    Stopped,
    Starting,
    Stopping,
    Unhealthy,
    Error,
    NotFound,
}

impl EngineStatus {
    /// The persisted status this engine observation maps to; `NotFound` has
    /// no mapping and is handled by the caller.
    pub fn as_server_status(&self) -> Option<ServerStatus> {
        match self {
            EngineStatus::Running => Some(ServerStatus::Running),
            EngineStatus::Stopped => Some(ServerStatus::Stopped),
            EngineStatus::Starting => Some(ServerStatus::Starting),
            EngineStatus::Stopping => Some(ServerStatus::Stopping),
            EngineStatus::Unhealthy => Some(ServerStatus::Unhealthy),
            EngineStatus::Error => Some(ServerStatus::Error),
            EngineStatus::NotFound => None,
        }
    }
}

/// Everything the engine needs to create a container
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    /// container port -> host port
    pub port_bindings: HashMap<u16, u16>,
    pub memory_mb: u32,
    /// Host directory mounted at the server's data path
    pub data_dir: String,
}

/// Captured output of an exec invocation
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Combined output, stdout first.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Blocking byte tail of a container's combined stdout/stderr
pub type LogTail = Pin<Box<dyn Stream<Item = EngineResult<Bytes>> + Send>>;

/// Narrow container runtime capability
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Create the container (stopped); returns the container id.
    async fn create(&self, spec: &ContainerSpec) -> EngineResult<String>;

    async fn start(&self, id: &str) -> EngineResult<()>;

    /// Stop the container. Returns `false` when the container was already
    /// gone, which callers treat as a successful stop.
    async fn stop(&self, id: &str, timeout: Duration) -> EngineResult<bool>;

    async fn remove(&self, id: &str) -> EngineResult<()>;

    async fn status(&self, id: &str) -> EngineResult<EngineStatus>;

    /// Run `argv` inside the container and capture its output.
    async fn exec(&self, id: &str, argv: &[String]) -> EngineResult<ExecOutput>;

    /// Open a follow-mode tail of the container's output.
    async fn logs(&self, id: &str) -> EngineResult<LogTail>;

    /// Ids of every container this control plane manages (label match).
    async fn list_managed(&self) -> EngineResult<Vec<String>>;

    async fn ensure_network(&self) -> EngineResult<()>;

    /// Remove every managed container not in `tracked`; returns removed ids.
    async fn cleanup_orphans(&self, tracked: &HashSet<String>) -> EngineResult<Vec<String>> {
        let mut removed = Vec::new();
        for id in self.list_managed().await? {
            if tracked.contains(&id) {
                continue;
            }
            info!("Removing orphaned container {}", id);
            if let Err(e) = self.stop(&id, Duration::from_secs(10)).await {
                warn!("Failed to stop orphan {}: {}", id, e);
            }
            match self.remove(&id).await {
                Ok(()) | Err(EngineError::NotFound(_)) => removed.push(id),
                Err(e) => warn!("Failed to remove orphan {}: {}", id, e),
            }
        }
        Ok(removed)
    }
}
