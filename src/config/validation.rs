//! Configuration validation
//!
//! Validates configuration and reports issues.

use super::types::sandbox::{parse_memory_limit, Posture};
use super::types::Config;

/// Result of configuration validation
#[derive(Debug, Clone)]
pub struct ConfigValidationResult {
    /// Whether the config is valid
    pub valid: bool,
    /// Validation errors (critical)
    pub errors: Vec<ValidationIssue>,
    /// Validation warnings (non-critical)
    pub warnings: Vec<ValidationIssue>,
}

impl ConfigValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        ConfigValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn with_error(mut self, issue: ValidationIssue) -> Self {
        self.valid = false;
        self.errors.push(issue);
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, issue: ValidationIssue) -> Self {
        self.warnings.push(issue);
        self
    }
}

/// A validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the config field
    pub path: String,
    /// Issue message
    pub message: String,
    /// Suggested fix
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();

    result = validate_workspace_config(config, result);
    result = validate_sandbox_config(config, result);
    result = validate_storage_config(config, result);

    result
}

fn validate_workspace_config(
    config: &Config,
    mut result: ConfigValidationResult,
) -> ConfigValidationResult {
    if !config.workspace.root.is_absolute() {
        result = result.with_warning(
            ValidationIssue::new(
                "workspace.root",
                "Workspace root is relative and will be resolved against the working directory",
            )
            .with_suggestion("Set CODECELL_WORKSPACE_ROOT to an absolute path"),
        );
    }

    if config.workspace.allowed_extensions.is_empty() {
        result = result.with_warning(ValidationIssue::new(
            "workspace.allowed_extensions",
            "Extension allow-list is empty; every file write will be rejected",
        ));
    }

    result
}

fn validate_sandbox_config(
    config: &Config,
    mut result: ConfigValidationResult,
) -> ConfigValidationResult {
    let sandbox = &config.sandbox;

    if sandbox.max_timeout_secs == 0 {
        result = result.with_error(ValidationIssue::new(
            "sandbox.max_timeout_secs",
            "Maximum timeout must be greater than zero",
        ));
    }

    if sandbox.default_timeout_secs > sandbox.max_timeout_secs {
        result = result.with_warning(ValidationIssue::new(
            "sandbox.default_timeout_secs",
            format!(
                "Default timeout {}s exceeds the cap of {}s and will be clamped",
                sandbox.default_timeout_secs, sandbox.max_timeout_secs
            ),
        ));
    }

    if sandbox.max_output_bytes == 0 {
        result = result.with_error(ValidationIssue::new(
            "sandbox.max_output_bytes",
            "Output cap must be greater than zero",
        ));
    }

    if sandbox.container.image.is_empty() {
        result = result.with_error(
            ValidationIssue::new("sandbox.container.image", "No isolation image specified")
                .with_suggestion("Set SANDBOX_IMAGE to a pre-built runtime image"),
        );
    }

    if parse_memory_limit(&sandbox.container.memory_limit).is_none() {
        result = result.with_error(
            ValidationIssue::new(
                "sandbox.container.memory_limit",
                format!(
                    "Unparsable memory limit: {}",
                    sandbox.container.memory_limit
                ),
            )
            .with_suggestion("Use a positive value such as 512m, 1.5g or 2GiB"),
        );
    }

    if !(sandbox.container.cpu_limit.is_finite() && sandbox.container.cpu_limit > 0.0) {
        result = result.with_error(ValidationIssue::new(
            "sandbox.container.cpu_limit",
            "CPU limit must be positive",
        ));
    }

    if sandbox.container.pids_limit <= 0 {
        result = result.with_error(ValidationIssue::new(
            "sandbox.container.pids_limit",
            "PID limit must be positive",
        ));
    }

    if sandbox.allow_unsandboxed && sandbox.posture == Posture::Production {
        result = result.with_warning(ValidationIssue::new(
            "sandbox.allow_unsandboxed",
            "Unsandboxed fallback is enabled but will be refused under the production posture",
        ));
    }

    result
}

fn validate_storage_config(
    config: &Config,
    mut result: ConfigValidationResult,
) -> ConfigValidationResult {
    if config.storage.postgres.is_none() {
        result = result.with_warning(
            ValidationIssue::new(
                "storage.postgres",
                "No database configured; usage accounting is kept in memory and lost on restart",
            )
            .with_suggestion("Set DATABASE_URL"),
        );
    }

    if config.credentials.encryption_key.is_some() && config.storage.postgres.is_none() {
        result = result.with_warning(ValidationIssue::new(
            "credentials.encryption_key",
            "Encryption key set but no database to read connections from; credential injection is disabled",
        ));
    }

    result
}
