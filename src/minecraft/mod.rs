//! Minecraft container rendering
//!
//! Turns a server record plus its effective settings overlay into the
//! container spec the engine runs, and builds the in-container RCON CLI
//! invocations used by command execution.

mod settings;

pub use settings::{seed_global_defaults, settings_schema, validate_setting, SettingDef, SettingKind};

use std::collections::HashMap;

use crate::config::MinecraftConfiguration;
use crate::engine::ContainerSpec;
use crate::model::Server;

/// Container-side player port of the game image
pub const CONTAINER_GAME_PORT: u16 = 25565;

/// Container-side RCON port of the game image
pub const CONTAINER_RCON_PORT: u16 = 25575;

/// Settings keys that are consumed structurally rather than as env vars
const RCON_PASSWORD_KEY: &str = "rcon_password";

/// Container name for a server
pub fn container_name(server: &Server) -> String {
    format!("discopanel-{}", server.id.simple())
}

/// Render the engine spec for a server from its record and effective
/// settings (global defaults overlaid with per-server rows).
pub fn render_container_spec(
    server: &Server,
    effective: &HashMap<String, String>,
    config: &MinecraftConfiguration,
) -> ContainerSpec {
    let mut env = HashMap::new();
    env.insert("EULA".to_string(), "TRUE".to_string());
    env.insert("TYPE".to_string(), server.mod_loader.image_type().to_string());
    env.insert("VERSION".to_string(), server.game_version.clone());
    env.insert("MEMORY".to_string(), format!("{}M", server.memory_mb));
    env.insert("ENABLE_RCON".to_string(), "true".to_string());
    env.insert("RCON_PORT".to_string(), CONTAINER_RCON_PORT.to_string());

    let rcon_password = effective
        .get(RCON_PASSWORD_KEY)
        .cloned()
        .unwrap_or_else(|| server.id.simple().to_string());
    env.insert("RCON_PASSWORD".to_string(), rcon_password);

    // Schema-known settings map onto the image's env surface
    for def in settings_schema() {
        if let Some(value) = effective.get(def.key) {
            env.insert(def.env.to_string(), value.clone());
        }
    }

    let mut labels = HashMap::new();
    labels.insert(
        crate::engine::SERVER_LABEL.to_string(),
        server.id.to_string(),
    );

    let mut port_bindings = HashMap::new();
    port_bindings.insert(CONTAINER_GAME_PORT, server.port);
    port_bindings.insert(CONTAINER_RCON_PORT, server.rcon_port);

    ContainerSpec {
        name: container_name(server),
        image: config.image.clone(),
        env,
        labels,
        port_bindings,
        memory_mb: server.memory_mb,
        data_dir: server.data_path.clone(),
    }
}

/// Argv for running one console command through the image's RCON CLI.
pub fn rcon_argv(command: &str) -> Vec<String> {
    vec!["rcon-cli".to_string(), command.to_string()]
}

/// Argv for a script task: the script path followed by its parsed arguments.
pub fn script_argv(script_path: &str, args: &str) -> Result<Vec<String>, String> {
    let mut argv = vec![script_path.to_string()];
    if !args.trim().is_empty() {
        let parsed = shell_words::split(args).map_err(|e| format!("bad script args: {}", e))?;
        argv.extend(parsed);
    }
    Ok(argv)
}
