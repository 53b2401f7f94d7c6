//! # CodeCell
//!
//! Multi-tenant code execution and workspace file engine.
//!
//! ## Features
//!
//! - **Confined Workspaces:** one directory tree per organization and agent
//! - **Isolated Execution:** ephemeral containers with resource ceilings and no network by default
//! - **Fail-Closed Fallback:** restricted host processes only where explicitly permitted
//! - **Per-Request Credentials:** provider secrets injected for one execution, never cached
//! - **Storage Quotas:** per-tenant ceilings with atomic usage accounting

pub mod config;
pub mod credentials;
pub mod database;
pub mod engine;
pub mod error;
pub mod quota;
pub mod sandbox;
pub mod workspace;

pub use config::Config;
pub use engine::{
    ExecuteCodeRequest, ExecutionEngine, FileEntry, FileKind, FileMutation, FileRequest,
    ListFilesResponse, ReadFileResponse, WriteFileRequest,
};
pub use error::{Error, Result};
pub use sandbox::{ExecutionMode, ExecutionResult, Language};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
