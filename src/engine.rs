//! Execution engine - the public surface
//!
//! Every operation resolves its workspace first and touches the filesystem
//! only through paths returned by the [`PathResolver`]. Usage accounting
//! after a write is detached from the write itself.

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::config::{validate_config, Config, SandboxConfig};
use crate::credentials::{
    AesGcmCipher, CredentialEnvMap, CredentialResolver, PgCredentialStore,
};
use crate::database;
use crate::error::{Error, Result};
use crate::quota::{InMemoryUsageStore, PgUsageStore, QuotaAccountant, StorageUsageRecord, UsageStore};
use crate::sandbox::{
    cap_text, is_script_artifact, select_backend, truncation_marker, ExecutionBackend,
    ExecutionJob, ExecutionMode, ExecutionResult, Language,
};
use crate::workspace::{PathResolver, WorkspaceRef, Workspaces};

/// Code execution invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteCodeRequest {
    pub language: String,
    pub code: String,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub network_access: bool,
    #[serde(default)]
    pub inject_credentials: Vec<String>,
}

/// File write invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteFileRequest {
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
}

/// Read, delete and list invocations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRequest {
    /// Relative path; empty means the workspace root
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
}

/// Result of a write or delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMutation {
    pub success: bool,
    pub path: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadFileResponse {
    pub content: String,
    pub size: u64,
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
    Symlink,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilesResponse {
    pub files: Vec<FileEntry>,
}

/// Multi-tenant execution and workspace file engine
pub struct ExecutionEngine {
    workspaces: Workspaces,
    backend: Option<Arc<dyn ExecutionBackend>>,
    credentials: Option<CredentialResolver>,
    quota: QuotaAccountant,
    sandbox: SandboxConfig,
}

impl ExecutionEngine {
    /// Assemble an engine from already-built parts.
    ///
    /// A `None` backend leaves file operations working while every
    /// execution fails with [`Error::BackendUnavailable`].
    pub fn new(
        workspaces: Workspaces,
        backend: Option<Arc<dyn ExecutionBackend>>,
        quota: QuotaAccountant,
        sandbox: SandboxConfig,
    ) -> Self {
        ExecutionEngine {
            workspaces,
            backend,
            credentials: None,
            quota,
            sandbox,
        }
    }

    /// Enable credential injection
    pub fn with_credentials(mut self, resolver: CredentialResolver) -> Self {
        self.credentials = Some(resolver);
        self
    }

    /// Build everything from configuration: storage, credentials, backend
    pub async fn from_config(config: &Config) -> Result<Self> {
        let validation = validate_config(config);
        for issue in &validation.warnings {
            warn!(path = %issue.path, "{}", issue.message);
        }
        if !validation.valid {
            let problems: Vec<String> = validation
                .errors
                .iter()
                .map(|issue| format!("{}: {}", issue.path, issue.message))
                .collect();
            return Err(Error::Config(format!(
                "refusing to start: {}",
                problems.join("; ")
            )));
        }

        let workspaces = Workspaces::new(&config.workspace)?;
        info!(root = %workspaces.root().display(), "Workspace root ready");

        let pool = match &config.storage.postgres {
            Some(pg) => {
                let pool = database::init_pool(pg).await?;
                database::migrations::run(&pool).await?;
                Some(pool)
            }
            None => None,
        };

        let usage_store: Arc<dyn UsageStore> = match &pool {
            Some(pool) => Arc::new(PgUsageStore::new(pool.clone())),
            None => {
                warn!("No database configured; storage usage is tracked in memory only");
                Arc::new(InMemoryUsageStore::new())
            }
        };
        let quota = QuotaAccountant::new(usage_store, config.storage.quota.clone());

        let backend = match select_backend(&config.sandbox).await {
            Ok(backend) => Some(backend),
            Err(e @ Error::Config(_)) => return Err(e),
            Err(e) => {
                error!("Code execution disabled: {}", e);
                None
            }
        };

        let engine = ExecutionEngine::new(workspaces, backend, quota, config.sandbox.clone());

        match (&pool, &config.credentials.encryption_key) {
            (Some(pool), Some(key)) => {
                let cipher = AesGcmCipher::from_base64_key(key)?;
                let store = PgCredentialStore::new(pool.clone());
                Ok(engine.with_credentials(CredentialResolver::new(Arc::new(store), Arc::new(cipher))))
            }
            (None, Some(_)) => {
                warn!("Credential encryption key set without a database; injection disabled");
                Ok(engine)
            }
            _ => Ok(engine),
        }
    }

    pub fn workspaces(&self) -> &Workspaces {
        &self.workspaces
    }

    /// Mode of the selected backend, if any
    pub fn backend_mode(&self) -> Option<ExecutionMode> {
        self.backend.as_ref().map(|b| b.mode())
    }

    /// Timeout actually applied for a requested value
    pub fn effective_timeout(&self, requested_secs: Option<u64>) -> Duration {
        let max = self.sandbox.max_timeout_secs.max(1);
        let secs = requested_secs
            .unwrap_or(self.sandbox.default_timeout_secs)
            .clamp(1, max);
        Duration::from_secs(secs)
    }

    /// Run code in the caller's workspace
    pub async fn execute_code(&self, request: ExecuteCodeRequest) -> Result<ExecutionResult> {
        let language: Language = request.language.parse()?;
        if request.code.is_empty() {
            return Err(Error::InvalidInput("code must not be empty".to_string()));
        }

        let workspace = WorkspaceRef::new(
            request.organization_id.as_deref(),
            request.agent_id.as_deref(),
        )?;

        let backend = self.backend.as_ref().ok_or_else(|| {
            Error::BackendUnavailable("no isolated backend and fallback not permitted".to_string())
        })?;

        let resolver = self.workspaces.open(&workspace).await?;
        let credentials = self
            .resolve_credentials(&request.inject_credentials, &workspace.tenant_id)
            .await;
        let timeout = self.effective_timeout(request.timeout_seconds);

        debug!(
            workspace = %workspace,
            language = %language,
            timeout_secs = timeout.as_secs(),
            network = request.network_access,
            credentials = ?credentials,
            "Executing code"
        );

        let result = backend
            .run(ExecutionJob {
                language,
                code: &request.code,
                workspace_dir: resolver.root(),
                timeout,
                network_access: request.network_access,
                credentials: &credentials,
            })
            .await?;

        info!(
            tenant = %workspace.tenant_id,
            agent = %workspace.agent_id,
            language = %language,
            mode = %result.mode,
            exit_code = result.exit_code,
            timed_out = result.timed_out,
            duration_ms = result.duration_ms,
            "Execution finished"
        );

        Ok(result)
    }

    async fn resolve_credentials(&self, providers: &[String], tenant_id: &str) -> CredentialEnvMap {
        if providers.is_empty() {
            return CredentialEnvMap::new();
        }
        match &self.credentials {
            Some(resolver) => resolver.resolve(providers, tenant_id).await,
            None => {
                warn!(
                    providers = ?providers,
                    "Credential injection requested but not configured; continuing without"
                );
                CredentialEnvMap::new()
            }
        }
    }

    /// Write a file, replacing any existing content
    pub async fn write_file(&self, request: WriteFileRequest) -> Result<FileMutation> {
        let workspace = WorkspaceRef::new(
            request.organization_id.as_deref(),
            request.agent_id.as_deref(),
        )?;
        let resolver = self.workspaces.open(&workspace).await?;
        let target = resolve_file_target(&resolver, &request.path)?;

        self.workspaces.check_extension(&target)?;
        let size = request.content.len() as u64;
        self.workspaces.check_size(size)?;

        let previous = match tokio::fs::symlink_metadata(&target).await {
            Ok(meta) if meta.is_dir() => {
                return Err(Error::InvalidInput(format!(
                    "'{}' is a directory",
                    request.path
                )));
            }
            Ok(meta) => Some(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let incoming = size.saturating_sub(previous.unwrap_or(0));
        self.quota
            .check_and_reserve(&workspace.tenant_id, incoming)
            .await?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = open_no_follow(&target, true).await?;
        file.write_all(request.content.as_bytes()).await?;
        file.flush().await?;

        let bytes_delta = size as i64 - previous.unwrap_or(0) as i64;
        let file_delta = if previous.is_some() { 0 } else { 1 };
        self.quota.commit(&workspace, bytes_delta, file_delta);

        let path = resolver.relative_display(&target);
        debug!(workspace = %workspace, path = %path, size, "File written");

        Ok(FileMutation {
            success: true,
            path,
            size,
        })
    }

    /// Read a file, capped at the execution output limit
    pub async fn read_file(&self, request: FileRequest) -> Result<ReadFileResponse> {
        let workspace = WorkspaceRef::new(
            request.organization_id.as_deref(),
            request.agent_id.as_deref(),
        )?;
        let resolver = self.workspaces.open(&workspace).await?;
        let target = resolve_file_target(&resolver, &request.path)?;

        let meta = existing_metadata(&target, &request.path).await?;
        if meta.is_dir() {
            return Err(Error::InvalidInput(format!(
                "'{}' is a directory",
                request.path
            )));
        }

        let limit = self.sandbox.max_output_bytes;
        let file = open_no_follow(&target, false).await?;
        let mut bytes = Vec::new();
        // A few spare bytes so a multi-byte char at the cap decodes cleanly
        file.take(limit as u64 + 4).read_to_end(&mut bytes).await?;

        let (mut content, truncated) = cap_text(String::from_utf8_lossy(&bytes).into_owned(), limit);
        if truncated {
            content.push_str(&truncation_marker(limit));
        }

        Ok(ReadFileResponse {
            content,
            size: meta.len(),
            truncated,
        })
    }

    /// List a directory; script artifacts are hidden
    pub async fn list_files(&self, request: FileRequest) -> Result<ListFilesResponse> {
        let workspace = WorkspaceRef::new(
            request.organization_id.as_deref(),
            request.agent_id.as_deref(),
        )?;
        let resolver = self.workspaces.open(&workspace).await?;
        let dir = resolver.resolve(&request.path)?;

        let meta = existing_metadata(&dir, &request.path).await?;
        if !meta.is_dir() {
            return Err(Error::InvalidInput(format!(
                "'{}' is not a directory",
                request.path
            )));
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_script_artifact(&name) {
                continue;
            }

            // DirEntry::file_type does not follow links
            let file_type = entry.file_type().await?;
            let (kind, size) = if file_type.is_symlink() {
                (FileKind::Symlink, None)
            } else if file_type.is_dir() {
                (FileKind::Directory, None)
            } else {
                (FileKind::File, Some(entry.metadata().await?.len()))
            };
            files.push(FileEntry { name, kind, size });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(ListFilesResponse { files })
    }

    /// Remove a single file and release its usage
    pub async fn delete_file(&self, request: FileRequest) -> Result<FileMutation> {
        let workspace = WorkspaceRef::new(
            request.organization_id.as_deref(),
            request.agent_id.as_deref(),
        )?;
        let resolver = self.workspaces.open(&workspace).await?;
        let target = resolve_file_target(&resolver, &request.path)?;

        let meta = existing_metadata(&target, &request.path).await?;
        if meta.is_dir() {
            return Err(Error::InvalidInput(format!(
                "'{}' is a directory",
                request.path
            )));
        }

        tokio::fs::remove_file(&target).await?;
        let size = meta.len();
        self.quota.commit(&workspace, -(size as i64), -1);

        Ok(FileMutation {
            success: true,
            path: resolver.relative_display(&target),
            size,
        })
    }

    /// Usage accounting for one workspace
    pub async fn storage_usage(
        &self,
        organization_id: Option<&str>,
        agent_id: Option<&str>,
    ) -> Result<StorageUsageRecord> {
        let workspace = WorkspaceRef::new(organization_id, agent_id)?;
        self.quota.usage(&workspace).await
    }
}

/// Resolve a path that must name something below the root
fn resolve_file_target(resolver: &PathResolver, path: &str) -> Result<std::path::PathBuf> {
    let target = resolver.resolve(path)?;
    if target == resolver.root() {
        return Err(Error::InvalidInput("path must name a file".to_string()));
    }
    Ok(target)
}

async fn existing_metadata(path: &Path, display: &str) -> Result<std::fs::Metadata> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => Ok(meta),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(Error::NotFound(format!("'{}'", display)))
        }
        Err(e) => Err(e.into()),
    }
}

/// Open without following a symlink at the final component
async fn open_no_follow(path: &Path, write: bool) -> Result<tokio::fs::File> {
    let mut options = tokio::fs::OpenOptions::new();
    if write {
        options.write(true).create(true).truncate(true);
    } else {
        options.read(true);
    }
    #[cfg(unix)]
    {
        options.custom_flags(libc::O_NOFOLLOW);
    }

    options.open(path).await.map_err(open_error)
}

fn open_error(e: std::io::Error) -> Error {
    #[cfg(unix)]
    {
        if e.raw_os_error() == Some(libc::ELOOP) {
            return Error::PathViolation("symbolic links are not allowed".to_string());
        }
    }
    Error::Io(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QuotaConfig, WorkspaceConfig};
    use crate::credentials::{ConnectionRecord, CredentialStore};
    use crate::sandbox::{FallbackBackend, TIMEOUT_EXIT_CODE};
    use async_trait::async_trait;
    use secrecy::SecretString;
    use tempfile::{tempdir, TempDir};

    fn engine_with(quota: QuotaConfig, backend: bool) -> (TempDir, ExecutionEngine) {
        let dir = tempdir().unwrap();
        let workspaces = Workspaces::new(&WorkspaceConfig {
            root: dir.path().join("workspaces"),
            ..Default::default()
        })
        .unwrap();
        let sandbox = SandboxConfig::default();
        let backend: Option<Arc<dyn ExecutionBackend>> = if backend {
            Some(Arc::new(FallbackBackend::new(sandbox.max_output_bytes)))
        } else {
            None
        };
        let quota = QuotaAccountant::new(Arc::new(InMemoryUsageStore::new()), quota);
        (dir, ExecutionEngine::new(workspaces, backend, quota, sandbox))
    }

    fn engine() -> (TempDir, ExecutionEngine) {
        engine_with(QuotaConfig::default(), true)
    }

    fn shell(code: &str, timeout: u64) -> ExecuteCodeRequest {
        ExecuteCodeRequest {
            language: "shell".to_string(),
            code: code.to_string(),
            timeout_seconds: Some(timeout),
            organization_id: Some("acme".to_string()),
            agent_id: Some("bot".to_string()),
            ..Default::default()
        }
    }

    fn write(path: &str, content: &str) -> WriteFileRequest {
        WriteFileRequest {
            path: path.to_string(),
            content: content.to_string(),
            organization_id: Some("acme".to_string()),
            agent_id: Some("bot".to_string()),
        }
    }

    fn file(path: &str) -> FileRequest {
        FileRequest {
            path: path.to_string(),
            organization_id: Some("acme".to_string()),
            agent_id: Some("bot".to_string()),
        }
    }

    /// Accounting is detached from the write; poll until it lands.
    async fn wait_for_usage(engine: &ExecutionEngine, expected_bytes: i64) -> StorageUsageRecord {
        for _ in 0..100 {
            let usage = engine.storage_usage(Some("acme"), Some("bot")).await.unwrap();
            if usage.total_bytes == expected_bytes {
                return usage;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        engine.storage_usage(Some("acme"), Some("bot")).await.unwrap()
    }

    #[tokio::test]
    async fn test_echo_hello() {
        let (_dir, engine) = engine();
        let result = engine.execute_code(shell("echo hello", 5)).await.unwrap();
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.exit_code, 0);
        assert!(!result.timed_out);
        assert_eq!(result.mode, ExecutionMode::Fallback);
    }

    #[tokio::test]
    async fn test_sleep_times_out() {
        let (_dir, engine) = engine();
        let result = engine.execute_code(shell("sleep 30", 1)).await.unwrap();
        assert!(result.timed_out);
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
    }

    #[tokio::test]
    async fn test_timeout_is_clamped() {
        let (_dir, engine) = engine();
        assert_eq!(engine.effective_timeout(Some(500)), Duration::from_secs(120));
        assert_eq!(engine.effective_timeout(Some(121)), Duration::from_secs(120));
        assert_eq!(engine.effective_timeout(Some(5)), Duration::from_secs(5));
        assert_eq!(engine.effective_timeout(Some(0)), Duration::from_secs(1));
        assert_eq!(engine.effective_timeout(None), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_execution_runs_in_workspace() {
        let (_dir, engine) = engine();
        engine.write_file(write("data.txt", "42")).await.unwrap();
        let result = engine.execute_code(shell("cat data.txt", 5)).await.unwrap();
        assert_eq!(result.stdout, "42");
    }

    #[tokio::test]
    async fn test_unsupported_language_is_rejected() {
        let (_dir, engine) = engine();
        let mut request = shell("print 1", 5);
        request.language = "cobol".to_string();
        assert!(matches!(
            engine.execute_code(request).await,
            Err(Error::UnsupportedLanguage(_))
        ));
    }

    #[tokio::test]
    async fn test_code_is_passed_through_untrimmed() {
        let (_dir, engine) = engine();
        let result = engine.execute_code(shell("  \n\t", 5)).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.is_empty());

        assert!(matches!(
            engine.execute_code(shell("", 5)).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_from_config_refuses_unlimited_containers() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("workspaces");
        let mut config = Config::default();
        config.workspace.root = root.clone();
        config.sandbox.container.memory_limit = "as much as it takes".to_string();

        let err = ExecutionEngine::from_config(&config).await.err().unwrap();
        assert!(matches!(err, Error::Config(ref m) if m.contains("memory_limit")));
        assert!(!root.exists());

        config.sandbox.container.memory_limit = "512m".to_string();
        config.sandbox.container.cpu_limit = 0.0;
        let err = ExecutionEngine::from_config(&config).await.err().unwrap();
        assert!(matches!(err, Error::Config(ref m) if m.contains("cpu_limit")));
    }

    #[tokio::test]
    async fn test_missing_backend_fails_closed() {
        let (_dir, engine) = engine_with(QuotaConfig::default(), false);
        let err = engine.execute_code(shell("echo hi", 5)).await.unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));
        assert!(err.is_security_violation());

        // File operations are unaffected
        engine.write_file(write("a.txt", "x")).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_executions_share_workspace() {
        let (_dir, engine) = engine();
        let (a, b) = tokio::join!(
            engine.execute_code(shell("printf first > a.txt", 5)),
            engine.execute_code(shell("printf second > b.txt", 5)),
        );
        assert_eq!(a.unwrap().exit_code, 0);
        assert_eq!(b.unwrap().exit_code, 0);

        assert_eq!(engine.read_file(file("a.txt")).await.unwrap().content, "first");
        assert_eq!(engine.read_file(file("b.txt")).await.unwrap().content, "second");
    }

    #[tokio::test]
    async fn test_write_traversal_is_a_path_violation() {
        let (_dir, engine) = engine();
        assert!(matches!(
            engine.write_file(write("../../etc/passwd", "x")).await,
            Err(Error::PathViolation(_))
        ));
        assert!(matches!(
            engine.write_file(write("..%2F..%2Fetc%2Fpasswd", "x")).await,
            Err(Error::PathViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_write_disallowed_extension() {
        let (_dir, engine) = engine();
        assert!(matches!(
            engine.write_file(write("notes.exe", "x")).await,
            Err(Error::ExtensionNotAllowed(_))
        ));
    }

    #[tokio::test]
    async fn test_write_too_large() {
        let (_dir, engine) = engine();
        let content = "a".repeat(1024 * 1024 + 1);
        assert!(matches!(
            engine.write_file(write("big.txt", &content)).await,
            Err(Error::FileTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let (_dir, engine) = engine();
        let written = engine
            .write_file(write("notes/today.md", "# hello\nworld"))
            .await
            .unwrap();
        assert!(written.success);
        assert_eq!(written.path, "notes/today.md");
        assert_eq!(written.size, 13);

        let read = engine.read_file(file("notes/today.md")).await.unwrap();
        assert_eq!(read.content, "# hello\nworld");
        assert_eq!(read.size, 13);
        assert!(!read.truncated);
    }

    #[tokio::test]
    async fn test_read_is_capped() {
        let (_dir, engine) = engine();
        let content = "b".repeat(200 * 1024);
        engine.write_file(write("big.log", &content)).await.unwrap();

        let read = engine.read_file(file("big.log")).await.unwrap();
        assert!(read.truncated);
        assert_eq!(read.size, 200 * 1024);
        assert!(read.content.ends_with(&truncation_marker(100 * 1024)));
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let (_dir, engine) = engine();
        assert!(matches!(
            engine.read_file(file("nope.txt")).await,
            Err(Error::NotFound(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_read_through_symlink_is_rejected() {
        let (dir, engine) = engine();
        let secret = dir.path().join("secret.txt");
        std::fs::write(&secret, "top secret").unwrap();

        engine.write_file(write("placeholder.txt", "x")).await.unwrap();
        let ws = engine.workspaces().root().join("acme").join("bot");
        std::os::unix::fs::symlink(&secret, ws.join("link.txt")).unwrap();

        assert!(matches!(
            engine.read_file(file("link.txt")).await,
            Err(Error::PathViolation(_))
        ));
        assert!(matches!(
            engine.write_file(write("link.txt", "overwrite")).await,
            Err(Error::PathViolation(_))
        ));
        assert_eq!(std::fs::read_to_string(&secret).unwrap(), "top secret");
    }

    #[tokio::test]
    async fn test_usage_sums_writes() {
        let (_dir, engine) = engine();
        let sizes = [3usize, 50, 700];
        for (i, size) in sizes.iter().enumerate() {
            let content = "z".repeat(*size);
            engine
                .write_file(write(&format!("f{}.txt", i), &content))
                .await
                .unwrap();
        }

        let usage = wait_for_usage(&engine, 753).await;
        assert_eq!(usage.total_bytes, 753);
        assert_eq!(usage.file_count, 3);
    }

    #[tokio::test]
    async fn test_overwrite_counts_the_difference() {
        let (_dir, engine) = engine();
        engine.write_file(write("a.txt", "0123456789")).await.unwrap();
        wait_for_usage(&engine, 10).await;
        engine.write_file(write("a.txt", "0123")).await.unwrap();

        let usage = wait_for_usage(&engine, 4).await;
        assert_eq!(usage.total_bytes, 4);
        assert_eq!(usage.file_count, 1);
    }

    #[tokio::test]
    async fn test_quota_rejects_before_touching_disk() {
        let quota = QuotaConfig {
            default_max_bytes: Some(10),
            ..Default::default()
        };
        let (_dir, engine) = engine_with(quota, true);

        engine.write_file(write("a.txt", "12345")).await.unwrap();
        wait_for_usage(&engine, 5).await;

        let err = engine
            .write_file(write("b.txt", "123456"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::QuotaExceeded {
                used: 5,
                requested: 6,
                limit: 10
            }
        ));
        assert!(matches!(
            engine.read_file(file("b.txt")).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_hides_script_artifacts() {
        let (_dir, engine) = engine();
        engine.write_file(write("b.txt", "bb")).await.unwrap();
        engine.write_file(write("a/inner.txt", "a")).await.unwrap();
        let ws = engine.workspaces().root().join("acme").join("bot");
        std::fs::write(ws.join(".codecell_exec_leftover.py"), "print(1)").unwrap();

        let listing = engine.list_files(file("")).await.unwrap();
        assert_eq!(
            listing.files,
            vec![
                FileEntry {
                    name: "a".to_string(),
                    kind: FileKind::Directory,
                    size: None,
                },
                FileEntry {
                    name: "b.txt".to_string(),
                    kind: FileKind::File,
                    size: Some(2),
                },
            ]
        );

        let json = serde_json::to_value(&listing).unwrap();
        assert_eq!(json["files"][0]["type"], "directory");
        assert!(json["files"][0].get("size").is_none());
    }

    #[tokio::test]
    async fn test_list_of_fresh_workspace_is_empty() {
        let (_dir, engine) = engine();
        let listing = engine
            .list_files(FileRequest {
                organization_id: Some("new-org".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(listing.files.is_empty());
    }

    #[tokio::test]
    async fn test_delete_releases_usage() {
        let (_dir, engine) = engine();
        engine.write_file(write("gone.txt", "123")).await.unwrap();
        wait_for_usage(&engine, 3).await;

        let deleted = engine.delete_file(file("gone.txt")).await.unwrap();
        assert_eq!(deleted.size, 3);

        let usage = wait_for_usage(&engine, 0).await;
        assert_eq!(usage.file_count, 0);
        assert!(matches!(
            engine.delete_file(file("gone.txt")).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_workspaces_are_isolated_per_tenant() {
        let (_dir, engine) = engine();
        engine.write_file(write("mine.txt", "acme")).await.unwrap();

        let other = FileRequest {
            path: "mine.txt".to_string(),
            organization_id: Some("globex".to_string()),
            agent_id: Some("bot".to_string()),
        };
        assert!(matches!(engine.read_file(other).await, Err(Error::NotFound(_))));

        let bad_tenant = FileRequest {
            path: "mine.txt".to_string(),
            organization_id: Some("../acme".to_string()),
            agent_id: Some("bot".to_string()),
        };
        assert!(matches!(
            engine.read_file(bad_tenant).await,
            Err(Error::PathViolation(_))
        ));
    }

    struct StripeStore {
        sealed: String,
    }

    #[async_trait]
    impl CredentialStore for StripeStore {
        async fn latest_active(
            &self,
            tenant_id: &str,
            provider: &str,
        ) -> Result<Option<ConnectionRecord>> {
            if tenant_id != "acme" || provider != "stripe" {
                return Ok(None);
            }
            Ok(Some(ConnectionRecord {
                id: uuid::Uuid::new_v4(),
                organization_id: tenant_id.to_string(),
                provider: provider.to_string(),
                encrypted_credentials: self.sealed.clone(),
                updated_at: chrono::Utc::now(),
            }))
        }
    }

    #[tokio::test]
    async fn test_injected_credentials_are_scoped_to_the_request() {
        let key = SecretString::from(base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            [9u8; 32],
        ));
        let cipher = AesGcmCipher::from_base64_key(&key).unwrap();
        let sealed = cipher.encrypt(r#"{"api_key":"sk_test_123"}"#).unwrap();
        let resolver = CredentialResolver::new(Arc::new(StripeStore { sealed }), Arc::new(cipher));

        let (_dir, engine) = engine();
        let engine = engine.with_credentials(resolver);

        let mut request = shell("printf '%s' \"${STRIPE_API_KEY:-unset}\"", 5);
        request.inject_credentials = vec!["stripe".to_string(), "unknown".to_string()];
        let result = engine.execute_code(request).await.unwrap();
        assert_eq!(result.stdout, "sk_test_123");

        let result = engine
            .execute_code(shell("printf '%s' \"${STRIPE_API_KEY:-unset}\"", 5))
            .await
            .unwrap();
        assert_eq!(result.stdout, "unset");
    }

    #[tokio::test]
    async fn test_parent_secrets_never_reach_the_child() {
        std::env::set_var("STRIPE_API_KEY", "sk_live_parent");
        std::env::set_var("AWS_SECRET_ACCESS_KEY", "parent-aws-secret");
        std::env::set_var("CELL_TEST_LOCALE_HINT", "visible");

        let (_dir, engine) = engine();
        let result = engine
            .execute_code(shell(
                "printf '%s|%s|%s' \"${STRIPE_API_KEY:-unset}\" \"${AWS_SECRET_ACCESS_KEY:-unset}\" \"${CELL_TEST_LOCALE_HINT:-unset}\"",
                5,
            ))
            .await
            .unwrap();

        std::env::remove_var("STRIPE_API_KEY");
        std::env::remove_var("AWS_SECRET_ACCESS_KEY");
        std::env::remove_var("CELL_TEST_LOCALE_HINT");

        assert_eq!(result.stdout, "unset|unset|visible");
        assert!(!result.stdout.contains("sk_live_parent"));
    }

    #[test]
    fn test_request_wire_names() {
        let request: ExecuteCodeRequest = serde_json::from_str(
            r#"{"language":"python","code":"print(1)","timeoutSeconds":10,
                "organizationId":"acme","networkAccess":true,"injectCredentials":["aws"]}"#,
        )
        .unwrap();
        assert_eq!(request.timeout_seconds, Some(10));
        assert_eq!(request.organization_id.as_deref(), Some("acme"));
        assert!(request.agent_id.is_none());
        assert!(request.network_access);
        assert_eq!(request.inject_credentials, vec!["aws"]);
    }
}
