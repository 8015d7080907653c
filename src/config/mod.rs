//! Configuration management module
//!
//! TOML-based configuration with `DISCOPANEL_*` environment overrides.

mod config;

pub use config::*;
