//! Restricted host-process execution
//!
//! Runs code as a child process in the workspace directory with a scrubbed
//! environment. There is no isolation boundary here, so this backend is only
//! selected when explicitly permitted outside production.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::backend::{
    ExecutionBackend, ExecutionJob, ExecutionMode, ExecutionResult, Language, TIMEOUT_EXIT_CODE,
};
use super::env_scrub::scrub_environment;
use super::output::OutputBuffer;
use super::script::ScriptFile;
use crate::credentials::CredentialEnvMap;
use crate::error::{Error, Result};

/// Unroutable proxy used to discourage outbound traffic
const BLACKHOLE_PROXY: &str = "http://127.0.0.1:9";

const PROXY_VARS: &[&str] = &[
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "ALL_PROXY",
    "http_proxy",
    "https_proxy",
    "all_proxy",
];

/// Host-process executor
pub struct FallbackBackend {
    max_output_bytes: usize,
}

impl FallbackBackend {
    /// Create a new fallback backend
    pub fn new(max_output_bytes: usize) -> Self {
        FallbackBackend { max_output_bytes }
    }

    /// Get the program and arguments for a language
    fn get_command(
        &self,
        language: Language,
        code: &str,
        script: Option<&Path>,
        network_access: bool,
    ) -> Result<(String, Vec<String>)> {
        match (language, script) {
            (Language::Shell, _) => Ok(("sh".to_string(), vec!["-c".to_string(), code.to_string()])),
            (Language::Python, Some(script)) => {
                let python = if which::which("python3").is_ok() {
                    "python3"
                } else if which::which("python").is_ok() {
                    "python"
                } else {
                    return Err(Error::UnsupportedLanguage(
                        "python (no interpreter installed on this host)".to_string(),
                    ));
                };
                Ok((python.to_string(), vec![path_arg(script)]))
            }
            (Language::TypeScript, Some(script)) => {
                if which::which("tsx").is_ok() {
                    Ok(("tsx".to_string(), vec![path_arg(script)]))
                } else if which::which("ts-node").is_ok() {
                    Ok(("ts-node".to_string(), vec![path_arg(script)]))
                } else if which::which("deno").is_ok() {
                    let mut args = vec![
                        "run".to_string(),
                        "--quiet".to_string(),
                        "--allow-read=.".to_string(),
                        "--allow-write=.".to_string(),
                        "--allow-env".to_string(),
                    ];
                    if network_access {
                        args.push("--allow-net".to_string());
                    }
                    args.push(path_arg(script));
                    Ok(("deno".to_string(), args))
                } else {
                    Err(Error::UnsupportedLanguage(
                        "typescript (no runtime found: tsx, ts-node or deno)".to_string(),
                    ))
                }
            }
            (language, None) => Err(Error::Internal(format!(
                "{} requires a script file",
                language
            ))),
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Environment for the child: inherited variables minus anything
/// secret-shaped, then this request's credentials.
pub fn build_environment<I>(
    inherited: I,
    credentials: &CredentialEnvMap,
    network_access: bool,
) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (String, String)>,
{
    let (mut env, removed) = scrub_environment(inherited);
    if !removed.is_empty() {
        debug!(count = removed.len(), "Scrubbed secret-shaped variables from fallback environment");
    }

    if !network_access {
        env.retain(|(name, _)| !PROXY_VARS.contains(&name.as_str()) && name != "NO_PROXY" && name != "no_proxy");
        for var in PROXY_VARS {
            env.push((var.to_string(), BLACKHOLE_PROXY.to_string()));
        }
    }

    for (name, value) in credentials.iter() {
        env.retain(|(existing, _)| existing != name);
        env.push((name.to_string(), value.expose_secret().to_string()));
    }

    env
}

/// How long pipes may stay open once the shell itself has exited
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Background reader for one output pipe
struct Drain {
    handle: JoinHandle<OutputBuffer>,
    stop: oneshot::Sender<()>,
    limit: usize,
}

impl Drain {
    fn spawn<R>(reader: Option<R>, limit: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (stop, stopped) = oneshot::channel();
        let handle = tokio::spawn(drain(reader, OutputBuffer::new(limit), stopped));
        Drain {
            handle,
            stop,
            limit,
        }
    }

    /// Collect what was read, cutting the reader off if the pipe is still
    /// held open after the grace period.
    async fn finish(self) -> OutputBuffer {
        let Drain {
            mut handle,
            stop,
            limit,
        } = self;

        let waited = tokio::time::timeout(DRAIN_GRACE, &mut handle).await;
        let joined = match waited {
            Ok(joined) => joined,
            Err(_) => {
                debug!("Output pipe still open after exit; stopping reader");
                let _ = stop.send(());
                handle.await
            }
        };

        joined.unwrap_or_else(|e| {
            warn!("Output reader failed: {}", e);
            OutputBuffer::new(limit)
        })
    }
}

/// Read a pipe into a bounded buffer until EOF or until told to stop
async fn drain<R>(
    reader: Option<R>,
    mut buffer: OutputBuffer,
    mut stop: oneshot::Receiver<()>,
) -> OutputBuffer
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return buffer;
    };
    let mut chunk = [0u8; 8192];
    loop {
        tokio::select! {
            biased;
            read = reader.read(&mut chunk) => match read {
                Ok(0) => break,
                Ok(n) => buffer.push(&chunk[..n]),
                Err(e) => {
                    warn!("Error reading process output: {}", e);
                    break;
                }
            },
            _ = &mut stop => break,
        }
    }
    buffer
}

/// Signal every process in the child's group
#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let result = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
    if result == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!("Failed to kill process group {}: {}", pgid, err);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

#[cfg(unix)]
fn status_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn status_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[async_trait]
impl ExecutionBackend for FallbackBackend {
    fn name(&self) -> &str {
        "fallback"
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Fallback
    }

    async fn run(&self, job: ExecutionJob<'_>) -> Result<ExecutionResult> {
        let script = ScriptFile::create(job.workspace_dir, job.language, job.code).await?;
        let (program, args) = self.get_command(
            job.language,
            job.code,
            script.as_ref().map(|s| s.path()),
            job.network_access,
        )?;

        if !job.network_access {
            warn!("Fallback backend cannot enforce network isolation; proxies blackholed only");
        }

        let mut command = Command::new(&program);
        command
            .args(&args)
            .current_dir(job.workspace_dir)
            .env_clear()
            .envs(build_environment(
                std::env::vars(),
                job.credentials,
                job.network_access,
            ))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        command.process_group(0);

        let start = Instant::now();
        let mut child = command
            .spawn()
            .map_err(|e| Error::Internal(format!("Failed to spawn {}: {}", program, e)))?;
        let pid = child.id();

        let stdout = Drain::spawn(child.stdout.take(), self.max_output_bytes);
        let stderr = Drain::spawn(child.stderr.take(), self.max_output_bytes);

        // Completion is the shell's own exit, not EOF on its pipes
        let outcome = tokio::time::timeout(job.timeout, child.wait()).await;

        // Reap anything the snippet left behind in its group
        if let Some(pid) = pid {
            kill_process_group(pid);
        }

        let (exit_code, timed_out) = match outcome {
            Ok(Ok(status)) => (status_code(status), false),
            Ok(Err(e)) => return Err(Error::Internal(format!("Process error: {}", e))),
            Err(_) => {
                warn!(timeout = ?job.timeout, "Fallback execution timed out");
                if let Err(e) = child.kill().await {
                    debug!("Child already exited after group kill: {}", e);
                }
                (TIMEOUT_EXIT_CODE, true)
            }
        };

        let (stdout, stderr) = tokio::join!(stdout.finish(), stderr.finish());
        let stdout = stdout.finish();
        let stderr = stderr.finish();

        Ok(ExecutionResult {
            stdout: stdout.text,
            stderr: stderr.text,
            stdout_truncated: stdout.truncated,
            stderr_truncated: stderr.truncated,
            exit_code,
            duration_ms: start.elapsed().as_millis() as u64,
            timed_out,
            mode: ExecutionMode::Fallback,
        })
    }
}
