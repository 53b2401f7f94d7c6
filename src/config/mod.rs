//! Configuration module
//!
//! Split into focused modules:
//! - types/mod.rs: Core configuration types (Config, WorkspaceConfig, CredentialsConfig)
//! - types/sandbox.rs: Execution backend configuration
//! - types/storage.rs: Database and quota configuration
//! - io.rs: Configuration loading and saving
//! - validation.rs: Configuration validation
//! - paths.rs: Configuration file paths

mod io;
mod paths;
mod types;
mod validation;

// Re-export core config types
pub use types::{Config, CredentialsConfig, WorkspaceConfig};

// Re-export storage types
pub use types::storage::{PostgresConfig, QuotaConfig, StorageConfig};

// Re-export sandbox types
pub use types::sandbox::{parse_memory_limit, ContainerConfig, Posture, SandboxConfig};

// Re-export IO and utilities
pub use io::{apply_env_overrides, apply_overrides_from, load_config, load_config_from_path, save_config};
pub use paths::{config_dir, config_path, state_dir, workspace_dir};
pub use validation::{validate_config, ConfigValidationResult, ValidationIssue};
