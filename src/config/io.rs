//! Configuration I/O - Loading and saving configuration
//!
//! Handles reading configuration from files and environment variables.

use std::path::Path;

use secrecy::SecretString;
use tracing::warn;

use super::types::storage::PostgresConfig;
use super::types::Config;
use crate::error::{Error, Result};

/// Load configuration with layered precedence:
/// 1. Config file (config.json / config.toml) if it exists, otherwise defaults
/// 2. Environment variable overrides (includes .env)
pub fn load_config() -> Result<Config> {
    let config_path = super::paths::config_path();

    let mut config = if config_path.exists() {
        load_config_from_path(&config_path)?
    } else {
        Config::default()
    };

    // Apply environment variable overrides (highest precedence)
    apply_env_overrides(&mut config);

    Ok(config)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    // Detect format by extension
    let config: Config = if path.extension().is_some_and(|ext| ext == "json") {
        // Parse as JSON5 (more lenient than strict JSON)
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

/// Apply environment variable overrides to an existing config.
///
/// Loads `.env` first, then overlays any set environment variables.
pub fn apply_env_overrides(config: &mut Config) {
    dotenvy::dotenv().ok();
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

/// Apply overrides from an arbitrary variable source
pub fn apply_overrides_from<F>(config: &mut Config, var: F)
where
    F: Fn(&str) -> Option<String>,
{
    // Workspace overrides
    if let Some(root) = var("CODECELL_WORKSPACE_ROOT") {
        config.workspace.root = std::path::PathBuf::from(root);
    }
    if let Some(max) = var("WORKSPACE_MAX_FILE_BYTES") {
        match max.parse() {
            Ok(v) => config.workspace.max_file_bytes = v,
            Err(_) => warn!("Ignoring invalid WORKSPACE_MAX_FILE_BYTES: {}", max),
        }
    }

    // Sandbox overrides
    if let Some(image) = var("SANDBOX_IMAGE") {
        config.sandbox.container.image = image;
    }
    if let Some(memory) = var("SANDBOX_MEMORY_LIMIT") {
        config.sandbox.container.memory_limit = memory;
    }
    if let Some(cpu) = var("SANDBOX_CPU_LIMIT") {
        match cpu.parse() {
            Ok(v) => config.sandbox.container.cpu_limit = v,
            Err(_) => warn!("Ignoring invalid SANDBOX_CPU_LIMIT: {}", cpu),
        }
    }
    if let Some(v) = var("ALLOW_UNSANDBOXED_EXECUTION") {
        config.sandbox.allow_unsandboxed = v == "true" || v == "1";
    }
    if let Some(env) = var("CODECELL_ENV").or_else(|| var("APP_ENV")) {
        match env.parse() {
            Ok(posture) => config.sandbox.posture = posture,
            Err(_) => warn!("Ignoring unknown deployment posture: {}", env),
        }
    }

    // Database overrides
    if let Some(database_url) = var("DATABASE_URL") {
        let pg = config
            .storage
            .postgres
            .get_or_insert_with(|| PostgresConfig::new(String::new()));
        pg.url = SecretString::from(database_url);
    }
    if let Some(max_conn) = var("DATABASE_MAX_CONNECTIONS") {
        if let Some(ref mut pg) = config.storage.postgres {
            if let Ok(v) = max_conn.parse() {
                pg.max_connections = v;
            }
        }
    }

    // Quota overrides
    if let Some(quota) = var("STORAGE_QUOTA_BYTES") {
        match quota.parse() {
            Ok(v) => config.storage.quota.default_max_bytes = Some(v),
            Err(_) => warn!("Ignoring invalid STORAGE_QUOTA_BYTES: {}", quota),
        }
    }

    // Credential overrides
    if let Some(key) = var("CREDENTIALS_ENCRYPTION_KEY") {
        config.credentials.encryption_key = Some(SecretString::from(key));
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
