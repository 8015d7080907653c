//! Configuration structures and loading

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub server: ServerConfiguration,

    #[serde(default)]
    pub database: DatabaseConfiguration,

    #[serde(default)]
    pub docker: DockerConfiguration,

    #[serde(default)]
    pub storage: StorageConfiguration,

    #[serde(default)]
    pub proxy: ProxyConfiguration,

    #[serde(default)]
    pub module: ModuleConfiguration,

    #[serde(default)]
    pub minecraft: MinecraftConfiguration,

    #[serde(default)]
    pub logging: LoggingConfiguration,

    #[serde(default)]
    pub upload: UploadConfiguration,
}

impl Configuration {
    /// Load configuration from a TOML file, apply environment overrides,
    /// validate, and ensure the directory layout exists.
    pub fn load(path: &str) -> Result<Self> {
        let config_path = std::path::Path::new(path);

        let mut config: Configuration = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file: {}", path))?;
            toml::from_str(&content).with_context(|| "Failed to parse configuration")?
        } else {
            Configuration::default()
        };

        config.apply_env_overrides();

        // Resolve relative paths against the config file's parent directory
        let base_dir = config_path
            .parent()
            .and_then(|p| if p.as_os_str().is_empty() { None } else { Some(p) })
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        config.storage.resolve_paths(&base_dir);
        config.database.path = resolve_path(&config.database.path, &base_dir);

        config.validate()?;

        std::fs::create_dir_all(&config.storage.data_dir)?;
        std::fs::create_dir_all(&config.storage.temp_dir)?;
        std::fs::create_dir_all(&config.storage.backup_dir)?;
        if let Some(parent) = config.database.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Ok(config)
    }

    /// Apply `DISCOPANEL_SECTION__KEY` environment variables over the file
    /// values.
    pub fn apply_env_overrides(&mut self) {
        env_override("DISCOPANEL_SERVER__HOST", &mut self.server.host);
        env_override("DISCOPANEL_SERVER__PORT", &mut self.server.port);
        env_override(
            "DISCOPANEL_SERVER__REQUEST_TIMEOUT_SECS",
            &mut self.server.request_timeout_secs,
        );
        env_override(
            "DISCOPANEL_SERVER__TASK_CHECK_INTERVAL_SECS",
            &mut self.server.task_check_interval_secs,
        );

        env_override("DISCOPANEL_DATABASE__PATH", &mut self.database.path);

        if let Ok(v) = std::env::var("DISCOPANEL_DOCKER__SOCKET") {
            self.docker.socket = Some(v);
        }
        env_override("DISCOPANEL_DOCKER__NETWORK", &mut self.docker.network);
        env_override(
            "DISCOPANEL_DOCKER__STOP_TIMEOUT_SECS",
            &mut self.docker.stop_timeout_secs,
        );
        env_override(
            "DISCOPANEL_DOCKER__DRIFT_INTERVAL_SECS",
            &mut self.docker.drift_interval_secs,
        );

        env_override("DISCOPANEL_STORAGE__DATA_DIR", &mut self.storage.data_dir);
        env_override("DISCOPANEL_STORAGE__TEMP_DIR", &mut self.storage.temp_dir);
        env_override("DISCOPANEL_STORAGE__BACKUP_DIR", &mut self.storage.backup_dir);

        env_override("DISCOPANEL_PROXY__ENABLED", &mut self.proxy.enabled);
        env_override("DISCOPANEL_PROXY__BIND_ADDRESS", &mut self.proxy.bind_address);
        env_override("DISCOPANEL_PROXY__PRIMARY_PORT", &mut self.proxy.primary_port);
        if let Ok(v) = std::env::var("DISCOPANEL_PROXY__LISTENERS") {
            let ports: Vec<u16> = v
                .split(',')
                .filter_map(|p| p.trim().parse().ok())
                .collect();
            if !ports.is_empty() {
                self.proxy.listeners = ports;
            }
        }

        env_override("DISCOPANEL_MODULE__ENABLED", &mut self.module.enabled);

        env_override("DISCOPANEL_MINECRAFT__IMAGE", &mut self.minecraft.image);
        env_override(
            "DISCOPANEL_MINECRAFT__PORT_RANGE_MIN",
            &mut self.minecraft.port_range_min,
        );
        env_override(
            "DISCOPANEL_MINECRAFT__PORT_RANGE_MAX",
            &mut self.minecraft.port_range_max,
        );
        env_override(
            "DISCOPANEL_MINECRAFT__AUTOSTART_DELAY_SECS",
            &mut self.minecraft.autostart_delay_secs,
        );

        env_override("DISCOPANEL_LOGGING__LEVEL", &mut self.logging.level);
        env_override("DISCOPANEL_LOGGING__JSON", &mut self.logging.json);
        env_override(
            "DISCOPANEL_LOGGING__CONSOLE_BUFFER_CAPACITY",
            &mut self.logging.console_buffer_capacity,
        );

        env_override(
            "DISCOPANEL_UPLOAD__MAX_UPLOAD_SIZE",
            &mut self.upload.max_upload_size,
        );
        env_override(
            "DISCOPANEL_UPLOAD__SESSION_TTL_SECS",
            &mut self.upload.session_ttl_secs,
        );
    }

    /// Cross-field validation
    pub fn validate(&self) -> Result<()> {
        if self.minecraft.port_range_min >= self.minecraft.port_range_max {
            bail!(
                "minecraft.port_range_min ({}) must be below port_range_max ({})",
                self.minecraft.port_range_min,
                self.minecraft.port_range_max
            );
        }
        if !self.proxy.listeners.contains(&self.proxy.primary_port) {
            bail!(
                "proxy.listeners must include the primary port {}",
                self.proxy.primary_port
            );
        }
        Ok(())
    }
}

fn env_override<T: FromStr>(var: &str, field: &mut T) {
    if let Ok(value) = std::env::var(var) {
        if let Ok(parsed) = value.parse() {
            *field = parsed;
        }
    }
}

fn resolve_path(path: &std::path::Path, base_dir: &std::path::Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// HTTP server and daemon-level settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfiguration {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Default per-call deadline applied to every API request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Scheduler tick interval
    #[serde(default = "default_task_check_interval")]
    pub task_check_interval_secs: u64,
}

impl Default for ServerConfiguration {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            task_check_interval_secs: default_task_check_interval(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_task_check_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfiguration {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfiguration {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from(".discopanel/discopanel.db")
}

/// Container engine settings
#[derive(Debug, Clone, Deserialize)]
pub struct DockerConfiguration {
    /// Explicit socket path; local defaults when unset
    #[serde(default)]
    pub socket: Option<String>,

    /// Docker network servers are attached to
    #[serde(default = "default_network")]
    pub network: String,

    /// Grace period before a stop escalates
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Drift reconciliation interval
    #[serde(default = "default_drift_interval")]
    pub drift_interval_secs: u64,
}

impl Default for DockerConfiguration {
    fn default() -> Self {
        Self {
            socket: None,
            network: default_network(),
            stop_timeout_secs: default_stop_timeout(),
            drift_interval_secs: default_drift_interval(),
        }
    }
}

fn default_network() -> String {
    "discopanel".into()
}

fn default_stop_timeout() -> u64 {
    30
}

fn default_drift_interval() -> u64 {
    5
}

/// Host directory layout
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfiguration {
    /// Per-server world data and mods live under here
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Upload scratch files
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Reserved for the backup task type
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
}

impl StorageConfiguration {
    pub fn resolve_paths(&mut self, base_dir: &std::path::Path) {
        self.data_dir = resolve_path(&self.data_dir, base_dir);
        self.temp_dir = resolve_path(&self.temp_dir, base_dir);
        self.backup_dir = resolve_path(&self.backup_dir, base_dir);
    }

    /// Data directory for one server
    pub fn server_data_dir(&self, server_id: &uuid::Uuid) -> PathBuf {
        self.data_dir.join(server_id.to_string())
    }
}

impl Default for StorageConfiguration {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            temp_dir: default_temp_dir(),
            backup_dir: default_backup_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".discopanel/data")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from(".discopanel/tmp")
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from(".discopanel/backups")
}

/// Player-traffic proxy settings
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfiguration {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub bind_address: String,

    /// The port every deployment exposes; must be in `listeners`
    #[serde(default = "default_primary_port")]
    pub primary_port: u16,

    #[serde(default = "default_listeners")]
    pub listeners: Vec<u16>,
}

impl Default for ProxyConfiguration {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            bind_address: default_host(),
            primary_port: default_primary_port(),
            listeners: default_listeners(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_primary_port() -> u16 {
    25565
}

fn default_listeners() -> Vec<u16> {
    vec![25565]
}

/// Mod file management settings
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleConfiguration {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Extensions accepted into a server's mods directory
    #[serde(default = "default_mod_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl Default for ModuleConfiguration {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            allowed_extensions: default_mod_extensions(),
        }
    }
}

fn default_mod_extensions() -> Vec<String> {
    vec![".jar".into(), ".zip".into()]
}

/// Game-server defaults
#[derive(Debug, Clone, Deserialize)]
pub struct MinecraftConfiguration {
    /// Container image servers run in
    #[serde(default = "default_image")]
    pub image: String,

    /// Host port allocation range (player and RCON ports)
    #[serde(default = "default_port_range_min")]
    pub port_range_min: u16,

    #[serde(default = "default_port_range_max")]
    pub port_range_max: u16,

    /// Settle delay before the startup auto-start pass
    #[serde(default = "default_autostart_delay")]
    pub autostart_delay_secs: u64,

    /// Console lines matching any of these substrings are dropped
    #[serde(default = "default_noise_patterns")]
    pub noise_patterns: Vec<String>,
}

impl Default for MinecraftConfiguration {
    fn default() -> Self {
        Self {
            image: default_image(),
            port_range_min: default_port_range_min(),
            port_range_max: default_port_range_max(),
            autostart_delay_secs: default_autostart_delay(),
            noise_patterns: default_noise_patterns(),
        }
    }
}

fn default_image() -> String {
    "itzg/minecraft-server:latest".into()
}

fn default_port_range_min() -> u16 {
    25600
}

fn default_port_range_max() -> u16 {
    25699
}

fn default_autostart_delay() -> u64 {
    3
}

fn default_noise_patterns() -> Vec<String> {
    vec![
        "Thread RCON Listener".into(),
        "Thread RCON Client".into(),
        "RCON running on".into(),
    ]
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfiguration {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON log lines instead of the human format
    #[serde(default)]
    pub json: bool,

    /// Per-container console ring buffer capacity
    #[serde(default = "default_console_buffer")]
    pub console_buffer_capacity: usize,
}

impl Default for LoggingConfiguration {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            console_buffer_capacity: default_console_buffer(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_console_buffer() -> usize {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfiguration {
    /// Maximum accepted upload size in bytes; 0 means unlimited
    #[serde(default)]
    pub max_upload_size: u64,

    /// Idle lifetime of an upload session
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
}

impl Default for UploadConfiguration {
    fn default() -> Self {
        Self {
            max_upload_size: 0,
            session_ttl_secs: default_session_ttl(),
        }
    }
}

fn default_session_ttl() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Configuration::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.proxy.primary_port, 25565);
        assert_eq!(config.logging.console_buffer_capacity, 10_000);
    }

    #[test]
    fn test_port_range_validation() {
        let mut config = Configuration::default();
        config.minecraft.port_range_min = 26000;
        config.minecraft.port_range_max = 25000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_listeners_must_include_primary() {
        let mut config = Configuration::default();
        config.proxy.listeners = vec![25570];
        assert!(config.validate().is_err());

        config.proxy.listeners = vec![25565, 25570];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml_sections() {
        let raw = r#"
            [server]
            port = 9090

            [proxy]
            primary_port = 25565
            listeners = [25565, 25566]

            [minecraft]
            port_range_min = 30000
            port_range_max = 30100
        "#;
        let config: Configuration = toml::from_str(raw).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.proxy.listeners, vec![25565, 25566]);
        assert_eq!(config.minecraft.port_range_min, 30000);
        assert!(config.validate().is_ok());
    }
}
