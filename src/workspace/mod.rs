//! Workspace module - Per-tenant, per-agent confined directory trees
//!
//! Layout on disk is `<root>/<organization>/<agent>/...`. Workspaces are
//! created lazily on first access and never removed here.

mod path;

pub use path::PathResolver;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::WorkspaceConfig;
use crate::error::{Error, Result};

/// Tenant used when the caller supplies no organization
pub const DEFAULT_TENANT: &str = "default";

/// Agent used when the caller supplies none
pub const DEFAULT_AGENT: &str = "default";

const MAX_ID_LEN: usize = 128;

/// Identifies one workspace
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspaceRef {
    pub tenant_id: String,
    pub agent_id: String,
}

impl WorkspaceRef {
    /// Build a validated reference, applying defaults for missing ids
    pub fn new(tenant_id: Option<&str>, agent_id: Option<&str>) -> Result<Self> {
        let tenant_id = tenant_id.unwrap_or(DEFAULT_TENANT);
        let agent_id = agent_id.unwrap_or(DEFAULT_AGENT);
        validate_id("organizationId", tenant_id)?;
        validate_id("agentId", agent_id)?;
        Ok(WorkspaceRef {
            tenant_id: tenant_id.to_string(),
            agent_id: agent_id.to_string(),
        })
    }
}

impl std::fmt::Display for WorkspaceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.agent_id)
    }
}

/// Ids become directory names, so they must be a single plain segment
fn validate_id(field: &str, id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(Error::PathViolation(format!(
            "{} must be 1-{} characters of [A-Za-z0-9_.-]",
            field, MAX_ID_LEN
        )))
    }
}

/// Owns the workspace root and the write policy shared by all workspaces
#[derive(Debug, Clone)]
pub struct Workspaces {
    root: PathBuf,
    max_file_bytes: u64,
    allowed_extensions: HashSet<String>,
}

impl Workspaces {
    /// Create the root directory if needed and pin its canonical form
    pub fn new(config: &WorkspaceConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.root)?;
        let root = config.root.canonicalize()?;

        Ok(Workspaces {
            root,
            max_file_bytes: config.max_file_bytes,
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        })
    }

    /// Canonical root holding every tenant
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Per-file size ceiling for writes
    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_bytes
    }

    /// Workspace directory for `workspace`, created on first access
    pub async fn open(&self, workspace: &WorkspaceRef) -> Result<PathResolver> {
        let dir = self
            .root
            .join(&workspace.tenant_id)
            .join(&workspace.agent_id);

        // Tenant and agent directories must be real directories, never links
        for candidate in [self.root.join(&workspace.tenant_id), dir.clone()] {
            if let Ok(meta) = tokio::fs::symlink_metadata(&candidate).await {
                if !meta.is_dir() {
                    return Err(Error::PathViolation(format!(
                        "workspace {} is not a plain directory",
                        workspace
                    )));
                }
            }
        }

        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            debug!(workspace = %workspace, "Creating workspace directory");
            tokio::fs::create_dir_all(&dir).await?;
        }

        Ok(PathResolver::new(dir))
    }

    /// Check a resolved file path against the extension allow-list
    pub fn check_extension(&self, path: &Path) -> Result<()> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match extension {
            Some(ext) if self.allowed_extensions.contains(&ext) => Ok(()),
            Some(ext) => Err(Error::ExtensionNotAllowed(format!(".{}", ext))),
            None => Err(Error::ExtensionNotAllowed(
                "files without an extension".to_string(),
            )),
        }
    }

    /// Check content size against the per-file ceiling
    pub fn check_size(&self, size: u64) -> Result<()> {
        if size > self.max_file_bytes {
            return Err(Error::FileTooLarge {
                size,
                limit: self.max_file_bytes,
            });
        }
        Ok(())
    }
}
