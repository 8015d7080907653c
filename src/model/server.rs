//! Server record and lifecycle state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mod loader variant baked into a server's container image invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModLoader {
    Vanilla,
    Forge,
    NeoForge,
    Fabric,
    Quilt,
    Paper,
    Purpur,
}

impl ModLoader {
    /// Value for the container image's TYPE environment variable
    pub fn image_type(&self) -> &'static str {
        match self {
            ModLoader::Vanilla => "VANILLA",
            ModLoader::Forge => "FORGE",
            ModLoader::NeoForge => "NEOFORGE",
            ModLoader::Fabric => "FABRIC",
            ModLoader::Quilt => "QUILT",
            ModLoader::Paper => "PAPER",
            ModLoader::Purpur => "PURPUR",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "vanilla" => Some(ModLoader::Vanilla),
            "forge" => Some(ModLoader::Forge),
            "neoforge" => Some(ModLoader::NeoForge),
            "fabric" => Some(ModLoader::Fabric),
            "quilt" => Some(ModLoader::Quilt),
            "paper" => Some(ModLoader::Paper),
            "purpur" => Some(ModLoader::Purpur),
            _ => None,
        }
    }
}

impl std::fmt::Display for ModLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModLoader::Vanilla => "vanilla",
            ModLoader::Forge => "forge",
            ModLoader::NeoForge => "neoforge",
            ModLoader::Fabric => "fabric",
            ModLoader::Quilt => "quilt",
            ModLoader::Paper => "paper",
            ModLoader::Purpur => "purpur",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle state of a server, owned by the reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Restarting,
    Creating,
    Unhealthy,
    Error,
}

impl ServerStatus {
    /// States from which a Start call is accepted
    pub fn can_start(&self) -> bool {
        matches!(self, ServerStatus::Stopped | ServerStatus::Error)
    }

    /// States from which a Stop call is accepted
    pub fn can_stop(&self) -> bool {
        matches!(
            self,
            ServerStatus::Running | ServerStatus::Starting | ServerStatus::Unhealthy
        )
    }

    /// States held by an in-flight lifecycle operation; the drift loop must
    /// not overwrite these.
    pub fn in_transition(&self) -> bool {
        matches!(
            self,
            ServerStatus::Starting
                | ServerStatus::Stopping
                | ServerStatus::Restarting
                | ServerStatus::Creating
        )
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "stopped" => Some(ServerStatus::Stopped),
            "starting" => Some(ServerStatus::Starting),
            "running" => Some(ServerStatus::Running),
            "stopping" => Some(ServerStatus::Stopping),
            "restarting" => Some(ServerStatus::Restarting),
            "creating" => Some(ServerStatus::Creating),
            "unhealthy" => Some(ServerStatus::Unhealthy),
            "error" => Some(ServerStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServerStatus::Stopped => "stopped",
            ServerStatus::Starting => "starting",
            ServerStatus::Running => "running",
            ServerStatus::Stopping => "stopping",
            ServerStatus::Restarting => "restarting",
            ServerStatus::Creating => "creating",
            ServerStatus::Unhealthy => "unhealthy",
            ServerStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

impl Default for ServerStatus {
    fn default() -> Self {
        ServerStatus::Stopped
    }
}

/// A managed game server
///
/// `container_id` is non-empty exactly when a host container has been
/// created for this record; status transitions go through the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub mod_loader: ModLoader,
    pub game_version: String,
    pub container_id: Option<String>,
    pub status: ServerStatus,
    /// Host port players connect to
    pub port: u16,
    /// Host port the RCON channel is bound to
    pub rcon_port: u16,
    pub memory_mb: u32,
    pub auto_start: bool,
    /// Lifecycle is externally owned; the reconciler observes but never
    /// mutates a detached server.
    pub detached: bool,
    pub proxy_hostname: Option<String>,
    pub data_path: String,
    pub last_started: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Server {
    pub fn has_container(&self) -> bool {
        self.container_id.as_deref().is_some_and(|id| !id.is_empty())
    }
}
