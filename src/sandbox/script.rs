//! Temporary script files written into the workspace for interpreted languages

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::backend::Language;
use crate::error::Result;

/// Name prefix of every script artifact; listings hide these
pub const SCRIPT_PREFIX: &str = ".codecell_exec_";

/// Whether a directory entry is an internal script artifact
pub fn is_script_artifact(name: &str) -> bool {
    name.starts_with(SCRIPT_PREFIX)
}

/// A script file removed when dropped
#[derive(Debug)]
pub struct ScriptFile {
    path: PathBuf,
    file_name: String,
}

impl ScriptFile {
    /// Write `code` into `dir` when `language` runs from a file.
    ///
    /// Returns `None` for languages that take code inline.
    pub async fn create(dir: &Path, language: Language, code: &str) -> Result<Option<Self>> {
        let Some(extension) = language.script_extension() else {
            return Ok(None);
        };

        let file_name = format!("{}{}.{}", SCRIPT_PREFIX, uuid::Uuid::new_v4().simple(), extension);
        let path = dir.join(&file_name);

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(code.as_bytes()).await?;
        file.flush().await?;

        Ok(Some(ScriptFile { path, file_name }))
    }

    /// Host path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name relative to the workspace
    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

impl Drop for ScriptFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove script artifact {}: {}", self.file_name, e);
            }
        }
    }
}
