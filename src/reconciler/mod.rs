//! Container lifecycle reconciler
//!
//! Owns the `Server.status` state machine and the binding between server
//! records and host containers. Lifecycle calls for one server are
//! serialized through a per-server lock; the drift loop adopts engine truth
//! for servers not mid-operation.

mod drift;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{DockerConfiguration, MinecraftConfiguration, StorageConfiguration};
use crate::engine::ContainerEngine;
use crate::error::{Error, Result};
use crate::logstream::LogRegistry;
use crate::minecraft;
use crate::model::{normalize_hostname, ModLoader, ProxyRoute, Server, ServerStatus};
use crate::proxy::ProxyState;
use crate::store::Database;
use crate::system::ServerLocks;

/// Settle interval between the stop and start halves of a restart
const RESTART_SETTLE: Duration = Duration::from_secs(2);

/// Request payload for creating a server
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CreateServerRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub mod_loader: ModLoader,
    pub game_version: String,
    #[serde(default = "default_memory")]
    pub memory_mb: u32,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub detached: bool,
    #[serde(default)]
    pub proxy_hostname: Option<String>,
}

fn default_memory() -> u32 {
    2048
}

pub struct Reconciler {
    db: Arc<Database>,
    engine: Arc<dyn ContainerEngine>,
    logs: Arc<LogRegistry>,
    proxy: Arc<ProxyState>,
    locks: ServerLocks,
    storage: StorageConfiguration,
    docker: DockerConfiguration,
    minecraft: MinecraftConfiguration,
    restart_settle: Duration,
}

impl Reconciler {
    pub fn new(
        db: Arc<Database>,
        engine: Arc<dyn ContainerEngine>,
        logs: Arc<LogRegistry>,
        proxy: Arc<ProxyState>,
        storage: StorageConfiguration,
        docker: DockerConfiguration,
        minecraft: MinecraftConfiguration,
    ) -> Self {
        Self {
            db,
            engine,
            logs,
            proxy,
            locks: ServerLocks::new(),
            storage,
            docker,
            minecraft,
            restart_settle: RESTART_SETTLE,
        }
    }

    #[cfg(test)]
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.restart_settle = settle;
        self
    }

    async fn load(&self, id: &Uuid) -> Result<Server> {
        self.db
            .get_server(id)
            .await?
            .ok_or_else(|| Error::NotFound("server", id.to_string()))
    }

    fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.docker.stop_timeout_secs)
    }

    // ========================================================================
    // Lifecycle operations
    // ========================================================================

    /// Create a server: allocate ports, render the container from effective
    /// settings, create the container, persist.
    pub async fn create(&self, req: CreateServerRequest) -> Result<Server> {
        if req.name.trim().is_empty() {
            return Err(Error::InvalidArgument("server name must not be empty".into()));
        }
        if req.game_version.trim().is_empty() {
            return Err(Error::InvalidArgument("game version must not be empty".into()));
        }
        if req.memory_mb < 256 {
            return Err(Error::InvalidArgument(
                "memory_mb must be at least 256".into(),
            ));
        }

        let taken: HashSet<u16> = self.db.allocated_ports().await?.into_iter().collect();
        let (port, rcon_port) = allocate_port_pair(
            self.minecraft.port_range_min,
            self.minecraft.port_range_max,
            &taken,
        )
        .ok_or_else(|| Error::Conflict("no free ports left in the configured range".into()))?;

        let id = Uuid::new_v4();
        let data_dir = self.storage.server_data_dir(&id);
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| Error::Internal(format!("failed to create data dir: {}", e)))?;

        let now = Utc::now();
        let mut server = Server {
            id,
            name: req.name,
            description: req.description,
            mod_loader: req.mod_loader,
            game_version: req.game_version,
            container_id: None,
            status: ServerStatus::Creating,
            port,
            rcon_port,
            memory_mb: req.memory_mb,
            auto_start: req.auto_start,
            detached: req.detached,
            proxy_hostname: req.proxy_hostname.map(|h| normalize_hostname(&h)),
            data_path: data_dir.to_string_lossy().to_string(),
            last_started: None,
            created_at: now,
            updated_at: now,
        };
        self.db.create_server(&server).await?;

        let effective = self.db.effective_settings(&id).await?;
        let spec = minecraft::render_container_spec(&server, &effective, &self.minecraft);

        match self.engine.create(&spec).await {
            Ok(container_id) => {
                server.container_id = Some(container_id);
                server.status = ServerStatus::Stopped;
                self.db.update_server(&server).await?;
                self.publish_route(&server).await?;
                info!("Created server {} ({})", server.name, server.id);
                Ok(server)
            }
            Err(e) => {
                server.status = ServerStatus::Error;
                if let Err(persist) = self.db.update_server(&server).await {
                    warn!("Failed to persist error state for {}: {}", server.id, persist);
                }
                Err(e.into())
            }
        }
    }

    /// Start the container. Transitions to Starting and returns without
    /// waiting for readiness; the drift loop observes the healthy state.
    pub async fn start(&self, id: &Uuid) -> Result<Server> {
        let _guard = self
            .locks
            .acquire(id)
            .await
            .map_err(|_| Error::Cancelled)?;

        let mut server = self.load(id).await?;
        self.ensure_managed(&server)?;

        if !server.status.can_start() {
            return Err(Error::Precondition(format!(
                "cannot start server in state {}",
                server.status
            )));
        }
        let container_id = server
            .container_id
            .clone()
            .ok_or_else(|| Error::Precondition("server has no container".into()))?;

        self.engine.start(&container_id).await.map_err(Error::from)?;

        server.status = ServerStatus::Starting;
        server.last_started = Some(Utc::now());
        self.db.update_server(&server).await?;

        if let Err(e) = self.logs.attach(&container_id).await {
            warn!("Failed to attach log tail for {}: {}", server.id, e);
        }
        self.publish_route(&server).await?;

        info!("Started server {} ({})", server.name, server.id);
        Ok(server)
    }

    /// Stop the container. A container the engine no longer knows about is
    /// treated as already stopped and the binding self-heals.
    pub async fn stop(&self, id: &Uuid) -> Result<Server> {
        let _guard = self
            .locks
            .acquire(id)
            .await
            .map_err(|_| Error::Cancelled)?;

        let mut server = self.load(id).await?;
        self.ensure_managed(&server)?;

        if !server.status.can_stop() {
            return Err(Error::Precondition(format!(
                "cannot stop server in state {}",
                server.status
            )));
        }

        self.stop_inner(&mut server).await?;
        info!("Stopped server {} ({})", server.name, server.id);
        Ok(server)
    }

    /// Stop half shared by `stop` and `restart`; the caller holds the lock.
    async fn stop_inner(&self, server: &mut Server) -> Result<()> {
        let Some(container_id) = server.container_id.clone() else {
            server.status = ServerStatus::Stopped;
            self.db.update_server(server).await?;
            return Ok(());
        };

        let prev_status = server.status;
        server.status = ServerStatus::Stopping;
        self.db.update_server(server).await?;

        match self.engine.stop(&container_id, self.stop_timeout()).await {
            Ok(true) => {
                server.status = ServerStatus::Stopped;
                self.db.update_server(server).await?;
                Ok(())
            }
            Ok(false) => {
                // Engine lost the container: clear the binding and succeed
                server.container_id = None;
                server.status = ServerStatus::Stopped;
                self.db.update_server(server).await?;
                Ok(())
            }
            Err(e) => {
                // Transient failure: restore the persisted status and let
                // the drift loop resolve
                server.status = prev_status;
                self.db.update_server(server).await?;
                Err(e.into())
            }
        }
    }

    /// Stop then start with a settle interval, atomic against other
    /// lifecycle calls for the same server.
    pub async fn restart(&self, id: &Uuid) -> Result<Server> {
        let _guard = self
            .locks
            .acquire(id)
            .await
            .map_err(|_| Error::Cancelled)?;

        let mut server = self.load(id).await?;
        self.ensure_managed(&server)?;

        if !server.status.can_stop() {
            return Err(Error::Precondition(format!(
                "cannot restart server in state {}",
                server.status
            )));
        }

        self.stop_inner(&mut server).await?;

        tokio::time::sleep(self.restart_settle).await;

        let container_id = server
            .container_id
            .clone()
            .ok_or_else(|| Error::Precondition("server has no container".into()))?;

        self.engine.start(&container_id).await.map_err(Error::from)?;

        server.status = ServerStatus::Starting;
        server.last_started = Some(Utc::now());
        self.db.update_server(&server).await?;

        if let Err(e) = self.logs.attach(&container_id).await {
            warn!("Failed to attach log tail for {}: {}", server.id, e);
        }
        self.publish_route(&server).await?;

        info!("Restarted server {} ({})", server.name, server.id);
        Ok(server)
    }

    /// Discard the container and re-create it with the same record.
    pub async fn recreate(&self, id: &Uuid) -> Result<Server> {
        let _guard = self
            .locks
            .acquire(id)
            .await
            .map_err(|_| Error::Cancelled)?;

        let mut server = self.load(id).await?;
        self.ensure_managed(&server)?;

        if !matches!(
            server.status,
            ServerStatus::Stopped | ServerStatus::Running | ServerStatus::Error
        ) {
            return Err(Error::Precondition(format!(
                "cannot recreate server in state {}",
                server.status
            )));
        }

        if let Some(old_container) = server.container_id.take() {
            if let Err(e) = self.engine.stop(&old_container, self.stop_timeout()).await {
                warn!("Stop before recreate failed for {}: {}", server.id, e);
            }
            match self.engine.remove(&old_container).await {
                Ok(()) => {}
                Err(crate::engine::EngineError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
            self.logs.drop_container(&old_container);
        }

        server.status = ServerStatus::Creating;
        self.db.update_server(&server).await?;

        let effective = self.db.effective_settings(id).await?;
        let spec = minecraft::render_container_spec(&server, &effective, &self.minecraft);

        match self.engine.create(&spec).await {
            Ok(container_id) => {
                server.container_id = Some(container_id);
                server.status = ServerStatus::Stopped;
                self.db.update_server(&server).await?;
                self.publish_route(&server).await?;
                info!("Recreated server {} ({})", server.name, server.id);
                Ok(server)
            }
            Err(e) => {
                server.status = ServerStatus::Error;
                if let Err(persist) = self.db.update_server(&server).await {
                    warn!("Failed to persist error state for {}: {}", server.id, persist);
                }
                Err(e.into())
            }
        }
    }

    /// Stop if needed, remove the container, cascade-delete owned records.
    pub async fn delete(&self, id: &Uuid) -> Result<()> {
        let _guard = self
            .locks
            .acquire(id)
            .await
            .map_err(|_| Error::Cancelled)?;

        let server = self.load(id).await?;

        if let Some(container_id) = &server.container_id {
            if let Err(e) = self.engine.stop(container_id, self.stop_timeout()).await {
                warn!("Stop during delete failed for {}: {}", server.id, e);
            }
            match self.engine.remove(container_id).await {
                Ok(()) | Err(crate::engine::EngineError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
            self.logs.drop_container(container_id);
        }

        self.proxy.remove_route(id);
        self.db.delete_server_cascade(id).await?;
        self.locks.forget(id);

        if let Err(e) = tokio::fs::remove_dir_all(&server.data_path).await {
            warn!("Failed to remove data dir for {}: {}", server.id, e);
        }

        info!("Deleted server {} ({})", server.name, server.id);
        Ok(())
    }

    /// Run a console command through the container's RCON CLI; the command
    /// and its reply are spliced into the log stream.
    pub async fn exec_command(&self, id: &Uuid, line: &str) -> Result<(String, bool)> {
        if line.trim().is_empty() {
            return Err(Error::InvalidArgument("command must not be empty".into()));
        }

        let server = self.load(id).await?;
        if server.status != ServerStatus::Running {
            return Err(Error::Precondition("server is not running".into()));
        }
        let container_id = server
            .container_id
            .clone()
            .ok_or_else(|| Error::Precondition("server has no container".into()))?;

        let timestamp = Utc::now();
        self.logs
            .append_command(&container_id, timestamp, line)
            .await;

        match self.engine.exec(&container_id, &minecraft::rcon_argv(line)).await {
            Ok(output) => {
                let combined = output.combined();
                let success = output.success();
                self.logs
                    .append_output(&container_id, timestamp, &combined, success)
                    .await;
                Ok((combined, success))
            }
            Err(e) => {
                self.logs
                    .append_output(&container_id, timestamp, "", false)
                    .await;
                Err(e.into())
            }
        }
    }

    /// Reject lifecycle mutation of detached servers.
    fn ensure_managed(&self, server: &Server) -> Result<()> {
        if server.detached {
            Err(Error::Precondition(format!(
                "server {} is detached; its lifecycle is externally owned",
                server.id
            )))
        } else {
            Ok(())
        }
    }

    // ========================================================================
    // Route publication
    // ========================================================================

    /// Publish or retract the server's proxy route. Called on every state
    /// change so the router always sees current backends.
    pub async fn publish_route(&self, server: &Server) -> Result<()> {
        match &server.proxy_hostname {
            Some(hostname) => {
                let mut route = self
                    .db
                    .get_route(&server.id)
                    .await?
                    .unwrap_or_else(|| ProxyRoute::new(server.id, hostname, String::new()));
                route.hostname = normalize_hostname(hostname);
                route.backend_address = format!("127.0.0.1:{}", server.port);
                self.db.put_route(&route).await?;
                self.proxy.apply_route(route)?;
            }
            None => {
                self.db.delete_route(&server.id).await?;
                self.proxy.remove_route(&server.id);
            }
        }
        Ok(())
    }
}

/// First two free ports in the configured range.
fn allocate_port_pair(min: u16, max: u16, taken: &HashSet<u16>) -> Option<(u16, u16)> {
    let mut free = (min..=max).filter(|p| !taken.contains(p));
    let port = free.next()?;
    let rcon_port = free.next()?;
    Some((port, rcon_port))
}

#[cfg(test)]
pub(crate) mod testutil;

#[cfg(test)]
mod tests;
