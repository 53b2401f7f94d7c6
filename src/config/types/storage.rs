//! Storage configuration types
//!
//! Configuration for the usage-accounting database and storage quotas.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// PostgreSQL configuration; in-memory accounting is used when absent
    pub postgres: Option<PostgresConfig>,
    /// Quota configuration
    #[serde(default)]
    pub quota: QuotaConfig,
}

/// PostgreSQL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Database URL
    #[serde(skip_serializing)]
    pub url: SecretString,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>) -> Self {
        PostgresConfig {
            url: SecretString::from(url.into()),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    30
}

/// Per-tenant storage ceilings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Ceiling applied to tenants without an explicit entry
    #[serde(default)]
    pub default_max_bytes: Option<u64>,
    /// Explicit per-tenant ceilings
    #[serde(default)]
    pub tenants: HashMap<String, u64>,
}

impl QuotaConfig {
    /// Byte ceiling for a tenant, if any
    pub fn limit_for(&self, tenant_id: &str) -> Option<u64> {
        self.tenants
            .get(tenant_id)
            .copied()
            .or(self.default_max_bytes)
    }
}
