//! Docker container-based execution
//!
//! Each execution gets an ephemeral container with the workspace directory
//! bind-mounted at `/workspace` as its only writable location. The
//! container is always force-removed, whether the run succeeds, fails or
//! times out.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::service::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::backend::{
    ExecutionBackend, ExecutionJob, ExecutionMode, ExecutionResult, Language, TIMEOUT_EXIT_CODE,
};
use super::output::OutputBuffer;
use super::script::ScriptFile;
use crate::config::{parse_memory_limit, ContainerConfig};
use crate::credentials::CredentialEnvMap;
use crate::error::{Error, Result};

/// Mount point of the workspace inside the container
pub const CONTAINER_WORKSPACE: &str = "/workspace";

/// Resource ceilings applied to every container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Memory ceiling in bytes; swap is pinned to the same value
    pub memory_bytes: i64,
    /// CPU quota in billionths of a CPU
    pub nano_cpus: i64,
    pub pids: i64,
}

impl ResourceLimits {
    /// Resolve the configured ceilings, refusing anything Docker would
    /// read as "unlimited".
    pub fn from_config(config: &ContainerConfig) -> Result<Self> {
        let memory_bytes = parse_memory_limit(&config.memory_limit).ok_or_else(|| {
            Error::Config(format!(
                "Invalid container memory limit: '{}'",
                config.memory_limit
            ))
        })?;

        let nano_cpus = config.cpu_limit * 1_000_000_000.0;
        if !nano_cpus.is_finite() || nano_cpus < 1.0 || nano_cpus >= i64::MAX as f64 {
            return Err(Error::Config(format!(
                "Invalid container CPU limit: {}",
                config.cpu_limit
            )));
        }

        if config.pids_limit <= 0 {
            return Err(Error::Config(format!(
                "Invalid container PID limit: {}",
                config.pids_limit
            )));
        }

        Ok(ResourceLimits {
            memory_bytes,
            nano_cpus: nano_cpus as i64,
            pids: config.pids_limit,
        })
    }
}

/// Get the command for a language
fn command_for(language: Language, code: &str, script_name: Option<&str>) -> Result<Vec<String>> {
    let in_workspace = |name: &str| format!("{}/{}", CONTAINER_WORKSPACE, name);
    match (language, script_name) {
        (Language::Shell, _) => Ok(vec!["sh".to_string(), "-c".to_string(), code.to_string()]),
        (Language::Python, Some(name)) => Ok(vec!["python3".to_string(), in_workspace(name)]),
        (Language::TypeScript, Some(name)) => Ok(vec!["tsx".to_string(), in_workspace(name)]),
        (language, None) => Err(Error::Internal(format!(
            "{} requires a script file",
            language
        ))),
    }
}

/// Host-level restrictions for one execution
fn host_config(limits: &ResourceLimits, workspace_dir: &Path, network_access: bool) -> HostConfig {
    let mut tmpfs = HashMap::new();
    tmpfs.insert("/tmp".to_string(), "rw,noexec,nosuid,size=64m".to_string());

    HostConfig {
        binds: Some(vec![format!(
            "{}:{}:rw",
            workspace_dir.display(),
            CONTAINER_WORKSPACE
        )]),
        network_mode: Some(if network_access { "bridge" } else { "none" }.to_string()),
        memory: Some(limits.memory_bytes),
        memory_swap: Some(limits.memory_bytes),
        nano_cpus: Some(limits.nano_cpus),
        pids_limit: Some(limits.pids),
        readonly_rootfs: Some(true),
        cap_drop: Some(vec!["ALL".to_string()]),
        security_opt: Some(vec!["no-new-privileges".to_string()]),
        tmpfs: Some(tmpfs),
        auto_remove: Some(false), // removed manually after logs are read
        ..Default::default()
    }
}

fn container_config(
    config: &ContainerConfig,
    limits: &ResourceLimits,
    cmd: Vec<String>,
    workspace_dir: &Path,
    network_access: bool,
    credentials: &CredentialEnvMap,
) -> Config<String> {
    let env: Vec<String> = credentials
        .iter()
        .map(|(k, v)| format!("{}={}", k, v.expose_secret()))
        .collect();

    let mut labels = HashMap::new();
    labels.insert("codecell.managed".to_string(), "true".to_string());

    Config {
        image: Some(config.image.clone()),
        cmd: Some(cmd),
        env: Some(env),
        working_dir: Some(CONTAINER_WORKSPACE.to_string()),
        user: config.run_as_user.clone(),
        labels: Some(labels),
        network_disabled: Some(!network_access),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        host_config: Some(host_config(limits, workspace_dir, network_access)),
        ..Default::default()
    }
}

/// Docker container executor
pub struct ContainerBackend {
    /// Docker client
    docker: Docker,
    /// Container configuration
    config: ContainerConfig,
    limits: ResourceLimits,
    max_output_bytes: usize,
}

impl ContainerBackend {
    /// Connect to the local container runtime and verify the image.
    ///
    /// Invalid resource ceilings are a configuration error and are
    /// reported before the runtime is contacted.
    pub async fn connect(config: &ContainerConfig, max_output_bytes: usize) -> Result<Self> {
        let limits = ResourceLimits::from_config(config)?;

        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            Error::BackendUnavailable(format!("Failed to connect to Docker: {}", e))
        })?;

        docker
            .ping()
            .await
            .map_err(|e| Error::BackendUnavailable(format!("Docker ping failed: {}", e)))?;

        info!(
            memory_bytes = limits.memory_bytes,
            nano_cpus = limits.nano_cpus,
            "Container backend connected to Docker"
        );

        let backend = ContainerBackend {
            docker,
            config: config.clone(),
            limits,
            max_output_bytes,
        };

        backend.ensure_image().await?;

        Ok(backend)
    }

    /// Ensure the runtime image is present locally
    async fn ensure_image(&self) -> Result<()> {
        let image = &self.config.image;
        if self.docker.inspect_image(image).await.is_ok() {
            debug!("Runtime image present: {}", image);
            return Ok(());
        }

        if !self.config.pull_missing_image {
            return Err(Error::BackendUnavailable(format!(
                "Runtime image '{}' is not present and pulling is disabled",
                image
            )));
        }

        info!("Pulling Docker image: {}", image);

        let options = CreateImageOptions {
            from_image: image.clone(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(Error::BackendUnavailable(format!(
                        "Failed to pull image: {}",
                        e
                    )));
                }
            }
        }

        info!("Image pulled successfully");
        Ok(())
    }

    /// Follow both streams until the container exits
    async fn collect_logs(&self, name: &str, stdout: &mut OutputBuffer, stderr: &mut OutputBuffer) {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let mut stream = self.docker.logs(name, Some(options));

        while let Some(result) = stream.next().await {
            match result {
                Ok(LogOutput::StdOut { message }) => stdout.push(&message),
                Ok(LogOutput::StdErr { message }) => stderr.push(&message),
                Ok(_) => {}
                Err(e) => {
                    warn!("Error reading logs: {}", e);
                    break;
                }
            }
        }
    }

    /// Wait for a container to finish
    async fn wait_for_container(&self, name: &str) -> Result<i32> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(name, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code as i32),
            // Non-zero exits surface as errors from the wait endpoint
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                Ok(code as i32)
            }
            Some(Err(e)) => Err(Error::Container(format!("Wait failed: {}", e))),
            None => Err(Error::Container("Container wait stream ended".to_string())),
        }
    }

    async fn kill_container(&self, name: &str) {
        if let Err(e) = self
            .docker
            .kill_container(name, Some(KillContainerOptions { signal: "SIGKILL" }))
            .await
        {
            debug!("Kill of {} failed (likely already stopped): {}", name, e);
        }
    }

    /// Remove a container
    async fn remove_container(&self, name: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => debug!("Removed container: {}", name),
            Err(e) => warn!("Failed to remove container {}: {}", name, e),
        }
    }

    async fn run_container(
        &self,
        name: &str,
        config: Config<String>,
        job: &ExecutionJob<'_>,
    ) -> Result<ExecutionResult> {
        let start = Instant::now();

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name,
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| Error::Container(format!("Failed to create container: {}", e)))?;

        debug!("Created container: {}", name);

        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::Container(format!("Failed to start container: {}", e)))?;

        let mut stdout_buf = OutputBuffer::new(self.max_output_bytes);
        let mut stderr_buf = OutputBuffer::new(self.max_output_bytes);

        let outcome = tokio::time::timeout(job.timeout, async {
            let (_, status) = tokio::join!(
                self.collect_logs(name, &mut stdout_buf, &mut stderr_buf),
                self.wait_for_container(name)
            );
            status
        })
        .await;

        let (exit_code, timed_out) = match outcome {
            Ok(status) => (status?, false),
            Err(_) => {
                warn!(timeout = ?job.timeout, "Container execution timed out");
                self.kill_container(name).await;
                (TIMEOUT_EXIT_CODE, true)
            }
        };

        let stdout = stdout_buf.finish();
        let stderr = stderr_buf.finish();

        Ok(ExecutionResult {
            stdout: stdout.text,
            stderr: stderr.text,
            stdout_truncated: stdout.truncated,
            stderr_truncated: stderr.truncated,
            exit_code,
            duration_ms: start.elapsed().as_millis() as u64,
            timed_out,
            mode: ExecutionMode::Isolated,
        })
    }
}

#[async_trait]
impl ExecutionBackend for ContainerBackend {
    fn name(&self) -> &str {
        "container"
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Isolated
    }

    async fn run(&self, job: ExecutionJob<'_>) -> Result<ExecutionResult> {
        let script = ScriptFile::create(job.workspace_dir, job.language, job.code).await?;
        let cmd = command_for(job.language, job.code, script.as_ref().map(|s| s.file_name()))?;
        let config = container_config(
            &self.config,
            &self.limits,
            cmd,
            job.workspace_dir,
            job.network_access,
            job.credentials,
        );

        let name = format!("codecell-exec-{}", uuid::Uuid::new_v4().simple());
        let result = self.run_container(&name, config, &job).await;

        // Always, including after create/start failures and timeouts
        self.remove_container(&name).await;

        result
    }
}
