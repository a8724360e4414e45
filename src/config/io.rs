//! Configuration I/O - Loading and saving configuration
//!
//! Handles reading configuration from files and environment variables.

use secrecy::SecretString;
use std::path::Path;

use super::types::Config;
use crate::error::{Error, Result};

/// Load configuration with layered precedence:
/// 1. Config file if it exists, otherwise defaults
/// 2. Environment variable overrides (including `.env`)
pub fn load_config() -> Result<Config> {
    let config_path = super::paths::config_path();

    let mut config = if config_path.exists() {
        load_config_from_path(&config_path)?
    } else {
        Config::default()
    };

    // Load .env file if it exists
    dotenvy::dotenv().ok();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    // Detect format by extension
    let config: Config = if path.extension().is_some_and(|ext| ext == "json") {
        // JSON5 is more lenient than strict JSON
        json5::from_str(&content).map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))?
    } else if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&content).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))?
    } else {
        // Try JSON5 first, then TOML
        json5::from_str(&content)
            .or_else(|_| toml::from_str(&content).map_err(|e| Error::Config(e.to_string())))
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?
    };

    Ok(config)
}

/// Overlay environment variables onto an existing config.
///
/// `lookup` resolves a variable name; production passes `std::env::var`.
/// Unparseable numeric values are ignored.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    // Sandbox overrides
    if let Some(image) = lookup("EXECBOX_IMAGE") {
        config.sandbox.image = image;
    }
    if let Some(v) = lookup("EXECBOX_PULL_IMAGE") {
        config.sandbox.pull_image = v == "true" || v == "1";
    }
    if let Some(v) = lookup("EXECBOX_PIDS_LIMIT").and_then(|v| v.parse().ok()) {
        config.sandbox.pids_limit = v;
    }

    // Audit overrides
    if let Some(v) = lookup("EXECBOX_AUDIT_CAPACITY").and_then(|v| v.parse().ok()) {
        config.audit.capacity = v;
    }

    // Gateway overrides
    if let Some(bind) = lookup("EXECBOX_GATEWAY_BIND") {
        config.gateway.bind = bind;
    }
    if let Some(port) = lookup("EXECBOX_GATEWAY_PORT").and_then(|v| v.parse().ok()) {
        config.gateway.port = port;
    }
    if let Some(token) = lookup("EXECBOX_ADMIN_TOKEN") {
        config.gateway.admin_token = Some(SecretString::from(token));
    }

    // Logging overrides
    if let Some(v) = lookup("EXECBOX_LOG_JSON") {
        config.logging.json = v == "true" || v == "1";
    }
}

/// Save configuration to a file
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    let content = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    } else {
        serde_json::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, content)?;
    Ok(())
}
