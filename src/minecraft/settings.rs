//! Server settings schema
//!
//! The typed key space behind the settings property bag. Each key has a
//! category, a value kind used for validation, a default, and the container
//! image env var it renders to.

use crate::model::GLOBAL_SETTINGS_ID;
use crate::store::{Database, SettingRow, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    Text,
    Integer,
    Boolean,
    /// One of a closed set of values
    Choice(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
pub struct SettingDef {
    pub key: &'static str,
    pub category: &'static str,
    pub kind: SettingKind,
    pub default: &'static str,
    /// Container image env var this key renders to
    pub env: &'static str,
}

const SCHEMA: &[SettingDef] = &[
    SettingDef {
        key: "motd",
        category: "game",
        kind: SettingKind::Text,
        default: "A DiscoPanel Server",
        env: "MOTD",
    },
    SettingDef {
        key: "difficulty",
        category: "game",
        kind: SettingKind::Choice(&["peaceful", "easy", "normal", "hard"]),
        default: "normal",
        env: "DIFFICULTY",
    },
    SettingDef {
        key: "gamemode",
        category: "game",
        kind: SettingKind::Choice(&["survival", "creative", "adventure", "spectator"]),
        default: "survival",
        env: "MODE",
    },
    SettingDef {
        key: "max_players",
        category: "game",
        kind: SettingKind::Integer,
        default: "20",
        env: "MAX_PLAYERS",
    },
    SettingDef {
        key: "pvp",
        category: "game",
        kind: SettingKind::Boolean,
        default: "true",
        env: "PVP",
    },
    SettingDef {
        key: "hardcore",
        category: "game",
        kind: SettingKind::Boolean,
        default: "false",
        env: "HARDCORE",
    },
    SettingDef {
        key: "spawn_protection",
        category: "game",
        kind: SettingKind::Integer,
        default: "16",
        env: "SPAWN_PROTECTION",
    },
    SettingDef {
        key: "enable_command_block",
        category: "game",
        kind: SettingKind::Boolean,
        default: "false",
        env: "ENABLE_COMMAND_BLOCK",
    },
    SettingDef {
        key: "level_seed",
        category: "world",
        kind: SettingKind::Text,
        default: "",
        env: "SEED",
    },
    SettingDef {
        key: "level_type",
        category: "world",
        kind: SettingKind::Choice(&["default", "flat", "large_biomes", "amplified"]),
        default: "default",
        env: "LEVEL_TYPE",
    },
    SettingDef {
        key: "view_distance",
        category: "world",
        kind: SettingKind::Integer,
        default: "10",
        env: "VIEW_DISTANCE",
    },
    SettingDef {
        key: "online_mode",
        category: "network",
        kind: SettingKind::Boolean,
        default: "true",
        env: "ONLINE_MODE",
    },
    SettingDef {
        key: "allow_flight",
        category: "network",
        kind: SettingKind::Boolean,
        default: "false",
        env: "ALLOW_FLIGHT",
    },
    SettingDef {
        key: "ops",
        category: "players",
        kind: SettingKind::Text,
        default: "",
        env: "OPS",
    },
    SettingDef {
        key: "whitelist",
        category: "players",
        kind: SettingKind::Text,
        default: "",
        env: "WHITELIST",
    },
    SettingDef {
        key: "jvm_opts",
        category: "runtime",
        kind: SettingKind::Text,
        default: "",
        env: "JVM_OPTS",
    },
];

pub fn settings_schema() -> &'static [SettingDef] {
    SCHEMA
}

/// Validate one value against the schema; unknown keys are accepted as text.
pub fn validate_setting(key: &str, value: &str) -> Result<(), String> {
    let Some(def) = SCHEMA.iter().find(|d| d.key == key) else {
        return Ok(());
    };

    match def.kind {
        SettingKind::Text => Ok(()),
        SettingKind::Integer => value
            .parse::<i64>()
            .map(|_| ())
            .map_err(|_| format!("setting {} expects an integer, got {:?}", key, value)),
        SettingKind::Boolean => match value {
            "true" | "false" => Ok(()),
            _ => Err(format!("setting {} expects true/false, got {:?}", key, value)),
        },
        SettingKind::Choice(options) => {
            if options.contains(&value) {
                Ok(())
            } else {
                Err(format!(
                    "setting {} expects one of {:?}, got {:?}",
                    key, options, value
                ))
            }
        }
    }
}

/// Write schema defaults into the global settings row on first access.
pub async fn seed_global_defaults(db: &Database) -> StoreResult<bool> {
    let (_, is_new) = db.get_global_settings().await?;
    if !is_new {
        return Ok(false);
    }

    let rows: Vec<SettingRow> = SCHEMA
        .iter()
        .filter(|def| !def.default.is_empty())
        .map(|def| SettingRow {
            category: def.category.to_string(),
            key: def.key.to_string(),
            value: def.default.to_string(),
        })
        .collect();

    db.put_settings(&GLOBAL_SETTINGS_ID, &rows).await?;
    Ok(true)
}
