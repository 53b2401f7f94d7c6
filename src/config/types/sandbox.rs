//! Sandbox configuration types
//!
//! Configuration for the isolated (container) and fallback (host process)
//! execution backends.

use serde::{Deserialize, Serialize};

/// Sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Container configuration
    #[serde(default)]
    pub container: ContainerConfig,
    /// Permit the unsandboxed host-process backend when no container runtime is reachable
    #[serde(default)]
    pub allow_unsandboxed: bool,
    /// Deployment posture; production refuses the fallback backend outright
    #[serde(default)]
    pub posture: Posture,
    /// Timeout used when the caller does not ask for one
    #[serde(default = "default_timeout")]
    pub default_timeout_secs: u64,
    /// Hard cap applied to every requested timeout
    #[serde(default = "default_max_timeout")]
    pub max_timeout_secs: u64,
    /// Maximum captured bytes per output stream
    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            container: ContainerConfig::default(),
            allow_unsandboxed: false,
            posture: Posture::default(),
            default_timeout_secs: default_timeout(),
            max_timeout_secs: default_max_timeout(),
            max_output_bytes: default_max_output(),
        }
    }
}

impl SandboxConfig {
    /// Whether the fallback backend may be selected at all
    pub fn fallback_permitted(&self) -> bool {
        self.allow_unsandboxed && self.posture != Posture::Production
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_max_timeout() -> u64 {
    120
}

fn default_max_output() -> usize {
    100 * 1024 // 100KB
}

/// Deployment posture
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Posture {
    /// Local or staging deployments
    #[default]
    Development,
    /// Production; the fallback backend is never used
    Production,
}

impl std::str::FromStr for Posture {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Ok(Posture::Production),
            "development" | "dev" | "staging" | "test" | "local" => Ok(Posture::Development),
            _ => Err(crate::error::Error::Config(format!(
                "Invalid posture: {}. Valid: development, production",
                s
            ))),
        }
    }
}

impl std::fmt::Display for Posture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Posture::Development => write!(f, "development"),
            Posture::Production => write!(f, "production"),
        }
    }
}

/// Container (Docker) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Pre-built image carrying the shell, Python and TypeScript toolchains
    #[serde(default = "default_image")]
    pub image: String,
    /// Memory limit
    #[serde(default = "default_memory")]
    pub memory_limit: String,
    /// CPU limit (number of CPUs)
    #[serde(default = "default_cpu")]
    pub cpu_limit: f64,
    /// Maximum number of processes inside the container
    #[serde(default = "default_pids")]
    pub pids_limit: i64,
    /// Pull the image at startup when it is not present locally
    #[serde(default)]
    pub pull_missing_image: bool,
    /// User to run as inside the container (e.g. "1000:1000")
    #[serde(default)]
    pub run_as_user: Option<String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        ContainerConfig {
            image: default_image(),
            memory_limit: default_memory(),
            cpu_limit: default_cpu(),
            pids_limit: default_pids(),
            pull_missing_image: false,
            run_as_user: None,
        }
    }
}

fn default_image() -> String {
    "codecell-runtime:latest".to_string()
}

fn default_memory() -> String {
    "512m".to_string()
}

fn default_cpu() -> f64 {
    1.0
}

fn default_pids() -> i64 {
    256
}

/// Parse a memory limit string (e.g. "512m", "1.5g", "2GiB", "512 MB") to bytes.
///
/// Units are binary. Returns `None` for zero, unknown units, malformed
/// numbers and values that do not fit in an `i64`.
pub fn parse_memory_limit(limit: &str) -> Option<i64> {
    let limit: String = limit
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();

    let split = limit
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(limit.len());
    let (num_str, unit) = limit.split_at(split);

    let multiplier: u64 = match unit {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1 << 10,
        "m" | "mb" | "mib" => 1 << 20,
        "g" | "gb" | "gib" => 1 << 30,
        "t" | "tb" | "tib" => 1 << 40,
        _ => return None,
    };

    let bytes = if num_str.contains('.') {
        let value: f64 = num_str.parse().ok()?;
        let bytes = value * multiplier as f64;
        if !bytes.is_finite() || bytes >= i64::MAX as f64 {
            return None;
        }
        bytes as i64
    } else {
        let num: u64 = num_str.parse().ok()?;
        i64::try_from(num.checked_mul(multiplier)?).ok()?
    };

    (bytes > 0).then_some(bytes)
}
