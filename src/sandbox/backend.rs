//! Common backend trait and types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::credentials::CredentialEnvMap;
use crate::error::Result;

/// Exit code reported when an execution is killed for exceeding its timeout
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Supported languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Shell,
    Python,
    TypeScript,
}

impl Language {
    /// Extension of the temporary script file, `None` when code runs inline
    pub fn script_extension(&self) -> Option<&'static str> {
        match self {
            Language::Shell => None,
            Language::Python => Some("py"),
            Language::TypeScript => Some("ts"),
        }
    }
}

impl std::str::FromStr for Language {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "shell" | "bash" | "sh" => Ok(Language::Shell),
            "python" | "py" => Ok(Language::Python),
            "typescript" | "ts" => Ok(Language::TypeScript),
            _ => Err(crate::Error::UnsupportedLanguage(s.to_string())),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Language::Shell => write!(f, "shell"),
            Language::Python => write!(f, "python"),
            Language::TypeScript => write!(f, "typescript"),
        }
    }
}

/// Which backend produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Inside a container boundary
    Isolated,
    /// Restricted host process
    Fallback,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Isolated => write!(f, "isolated"),
            ExecutionMode::Fallback => write!(f, "fallback"),
        }
    }
}

/// One unit of work handed to a backend
#[derive(Debug)]
pub struct ExecutionJob<'a> {
    /// Language to dispatch on
    pub language: Language,
    /// Opaque source, never inspected
    pub code: &'a str,
    /// Workspace directory; the only writable location exposed
    pub workspace_dir: &'a Path,
    /// Already clamped timeout
    pub timeout: Duration,
    /// Allow outbound network
    pub network_access: bool,
    /// Credentials scoped to this execution only
    pub credentials: &'a CredentialEnvMap,
}

/// Result of code execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Standard output (possibly truncated)
    pub stdout: String,
    /// Standard error (possibly truncated)
    pub stderr: String,
    /// Whether stdout hit the capture cap
    #[serde(default)]
    pub stdout_truncated: bool,
    /// Whether stderr hit the capture cap
    #[serde(default)]
    pub stderr_truncated: bool,
    /// Process exit code
    pub exit_code: i32,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// Was execution terminated due to timeout?
    pub timed_out: bool,
    /// Backend that ran the code
    #[serde(rename = "executionMode")]
    pub mode: ExecutionMode,
}

impl ExecutionResult {
    /// Whether the process exited cleanly
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    /// Get combined output
    pub fn combined_output(&self) -> String {
        let mut output = String::new();
        if !self.stdout.is_empty() {
            output.push_str(&self.stdout);
        }
        if !self.stderr.is_empty() {
            if !output.is_empty() {
                output.push_str("\n--- stderr ---\n");
            }
            output.push_str(&self.stderr);
        }
        output
    }
}

/// Capability interface implemented by the isolated and fallback backends
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Get the backend name
    fn name(&self) -> &str;

    /// Mode reported in results
    fn mode(&self) -> ExecutionMode;

    /// Run a job to completion or timeout.
    ///
    /// Timeouts are not errors: they produce a result with `timed_out`
    /// set and [`TIMEOUT_EXIT_CODE`].
    async fn run(&self, job: ExecutionJob<'_>) -> Result<ExecutionResult>;
}
