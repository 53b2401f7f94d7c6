//! Configuration types module
//!
//! Re-exports all configuration types.

pub mod sandbox;
pub mod storage;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Workspace configuration
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    /// Sandbox configuration
    #[serde(default)]
    pub sandbox: sandbox::SandboxConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: storage::StorageConfig,

    /// Credential injection configuration
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

impl Config {
    /// Load configuration from environment variables and files
    ///
    /// It loads configuration from:
    /// 1. Default values
    /// 2. Config file (if present)
    /// 3. Environment variable overrides
    pub fn from_env() -> crate::error::Result<Self> {
        crate::config::load_config()
    }
}

/// Workspace configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Directory holding one tree per (organization, agent)
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Largest file accepted by a single write
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Extensions accepted by writes (lowercase, without the dot)
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        WorkspaceConfig {
            root: default_root(),
            max_file_bytes: default_max_file_bytes(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

fn default_root() -> PathBuf {
    crate::config::workspace_dir()
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024 // 1MB
}

fn default_allowed_extensions() -> Vec<String> {
    [
        "txt", "md", "markdown", "rst", "json", "jsonl", "yaml", "yml", "toml", "xml", "csv",
        "tsv", "html", "htm", "css", "svg", "js", "mjs", "cjs", "ts", "tsx", "jsx", "py", "ipynb",
        "sh", "bash", "sql", "log", "ini", "cfg", "conf",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Credential injection configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Base64-encoded AES-256 key used to decrypt connection records
    #[serde(default, skip_serializing)]
    pub encryption_key: Option<SecretString>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.workspace.max_file_bytes, 1024 * 1024);
        assert!(config
            .workspace
            .allowed_extensions
            .iter()
            .any(|e| e == "py"));
        assert!(!config
            .workspace
            .allowed_extensions
            .iter()
            .any(|e| e == "exe"));
        assert!(config.credentials.encryption_key.is_none());
    }
}
