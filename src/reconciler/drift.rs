//! Drift reconciliation, orphan cleanup and auto-start

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::EngineStatus;
use crate::error::Result;
use crate::model::ServerStatus;

use super::Reconciler;

impl Reconciler {
    /// Startup sequence: network, orphan sweep, then the auto-start pass.
    ///
    /// Runs to completion before the caller spawns the drift loop, so the
    /// loop's first status mutation observes post-autostart engine state.
    pub async fn run_startup(&self, autostart_delay: Duration) {
        if let Err(e) = self.engine.ensure_network().await {
            warn!("Failed to ensure container network: {}", e);
        }

        match self.cleanup_orphans().await {
            Ok(removed) if !removed.is_empty() => {
                info!("Removed {} orphaned containers", removed.len());
            }
            Ok(_) => {}
            Err(e) => warn!("Orphan cleanup failed: {}", e),
        }

        tokio::time::sleep(autostart_delay).await;
        self.autostart_pass().await;
    }

    /// Remove engine-managed containers no server record references.
    pub async fn cleanup_orphans(&self) -> Result<Vec<String>> {
        let tracked: HashSet<String> = self
            .db
            .list_servers()
            .await?
            .into_iter()
            .filter_map(|s| s.container_id)
            .collect();

        let removed = self.engine.cleanup_orphans(&tracked).await?;
        Ok(removed)
    }

    /// Start every auto-start server whose container the engine reports
    /// stopped, and publish its route.
    pub async fn autostart_pass(&self) {
        let servers = match self.db.list_servers().await {
            Ok(servers) => servers,
            Err(e) => {
                warn!("Auto-start pass could not list servers: {}", e);
                return;
            }
        };

        for server in servers {
            if !server.auto_start || server.detached {
                continue;
            }
            let Some(container_id) = &server.container_id else {
                continue;
            };

            match self.engine.status(container_id).await {
                Ok(EngineStatus::Stopped) => {
                    info!("Auto-starting server {} ({})", server.name, server.id);
                    // Persisted status may disagree with the engine after a
                    // host restart; adopt the engine truth first so the
                    // start precondition holds.
                    if server.status != ServerStatus::Stopped {
                        if let Err(e) = self
                            .db
                            .update_server_status(&server.id, ServerStatus::Stopped)
                            .await
                        {
                            warn!("Failed to sync status for {}: {}", server.id, e);
                            continue;
                        }
                    }
                    if let Err(e) = self.start(&server.id).await {
                        warn!("Auto-start failed for {}: {}", server.id, e);
                    }
                }
                Ok(EngineStatus::Running) => {
                    // Already up (host restart without container loss);
                    // re-attach the tail and publish the route
                    if let Err(e) = self.logs.attach(container_id).await {
                        debug!("Log attach for running {} failed: {}", server.id, e);
                    }
                    if let Err(e) = self.publish_route(&server).await {
                        warn!("Route publish for {} failed: {}", server.id, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Auto-start status probe failed for {}: {}", server.id, e);
                }
            }
        }
    }

    /// One drift pass: adopt engine truth for every bound server not
    /// currently mid-operation. Transient engine errors mutate nothing.
    pub async fn reconcile_once(&self) {
        let servers = match self.db.list_servers().await {
            Ok(servers) => servers,
            Err(e) => {
                warn!("Drift pass could not list servers: {}", e);
                return;
            }
        };

        for mut server in servers {
            let Some(container_id) = server.container_id.clone() else {
                continue;
            };
            // A held lock means a lifecycle operation owns the status
            if self.locks.is_locked(&server.id) {
                continue;
            }

            match self.engine.status(&container_id).await {
                Err(e) => {
                    debug!("Drift probe for {} failed (transient): {}", server.id, e);
                }
                Ok(EngineStatus::NotFound) => {
                    info!(
                        "Container {} for server {} disappeared; adopting stopped state",
                        container_id, server.id
                    );
                    server.container_id = None;
                    server.status = ServerStatus::Stopped;
                    if let Err(e) = self.db.update_server(&server).await {
                        warn!("Failed to persist drift for {}: {}", server.id, e);
                        continue;
                    }
                    self.logs.detach(&container_id);
                    if let Err(e) = self.publish_route(&server).await {
                        warn!("Route publish for {} failed: {}", server.id, e);
                    }
                }
                Ok(observed) => {
                    let Some(observed) = observed.as_server_status() else {
                        continue;
                    };
                    if observed == server.status {
                        continue;
                    }

                    debug!(
                        "Drift for server {}: {} -> {}",
                        server.id, server.status, observed
                    );
                    server.status = observed;
                    if let Err(e) = self.db.update_server_status(&server.id, observed).await {
                        warn!("Failed to persist drift for {}: {}", server.id, e);
                        continue;
                    }

                    if observed == ServerStatus::Running {
                        if let Err(e) = self.logs.attach(&container_id).await {
                            debug!("Log attach for {} failed: {}", server.id, e);
                        }
                    }
                    if let Err(e) = self.publish_route(&server).await {
                        warn!("Route publish for {} failed: {}", server.id, e);
                    }
                }
            }
        }
    }

    /// Spawn the periodic drift loop.
    pub fn spawn_drift_loop(
        self: Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Drift loop stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        self.reconcile_once().await;
                    }
                }
            }
        })
    }
}
