//! Sandbox module - Code execution backends
//!
//! Two backends share one interface:
//! - Isolated: ephemeral Docker containers with the workspace bind-mounted
//! - Fallback: restricted host processes, only where explicitly permitted
//!
//! The backend is chosen once at startup and never switches per request.

mod backend;
mod container;
mod env_scrub;
mod fallback;
mod output;
mod script;

pub use backend::{
    ExecutionBackend, ExecutionJob, ExecutionMode, ExecutionResult, Language, TIMEOUT_EXIT_CODE,
};
pub use container::{ContainerBackend, ResourceLimits, CONTAINER_WORKSPACE};
pub use env_scrub::{is_secret_name, scrub_environment};
pub use fallback::{build_environment, FallbackBackend};
pub use output::{cap_text, truncation_marker, CapturedOutput, OutputBuffer};
pub use script::{is_script_artifact, ScriptFile, SCRIPT_PREFIX};

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{Posture, SandboxConfig};
use crate::error::{Error, Result};

/// Pick the execution backend for this process.
///
/// The container runtime is always preferred. The host-process fallback is
/// only used when it is explicitly allowed and the posture is not
/// production; otherwise an unreachable runtime is an error. Invalid
/// container resource limits are returned as [`Error::Config`] and never
/// fall back.
pub async fn select_backend(config: &SandboxConfig) -> Result<Arc<dyn ExecutionBackend>> {
    match ContainerBackend::connect(&config.container, config.max_output_bytes).await {
        Ok(backend) => {
            info!(image = %config.container.image, "Using isolated container backend");
            Ok(Arc::new(backend))
        }
        Err(e @ Error::Config(_)) => Err(e),
        Err(e) if config.fallback_permitted() => {
            warn!(
                "Container runtime unavailable ({}); falling back to UNSANDBOXED host execution",
                e
            );
            Ok(Arc::new(FallbackBackend::new(config.max_output_bytes)))
        }
        Err(e) => {
            if config.allow_unsandboxed && config.posture == Posture::Production {
                error!("Unsandboxed execution was requested but is refused in production");
            }
            Err(Error::BackendUnavailable(format!(
                "no isolated backend available: {}",
                e
            )))
        }
    }
}
