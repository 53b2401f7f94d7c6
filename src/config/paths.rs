//! Configuration and state locations
//!
//! Each location can be pinned with a `CODECELL_*` variable; otherwise it
//! lives under the platform directory, then under `$HOME`, and finally in
//! a relative `.codecell` directory when neither is known.

use std::path::{Path, PathBuf};

const APP_DIR: &str = "codecell";
const LOCAL_FALLBACK: &str = ".codecell";

/// Directories the engine keeps on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    /// Configuration files (`config.json`, `config.toml`)
    Config,
    /// Persistent state, including the default workspace root
    State,
}

impl Location {
    fn override_var(self) -> &'static str {
        match self {
            Location::Config => "CODECELL_CONFIG_DIR",
            Location::State => "CODECELL_STATE_DIR",
        }
    }

    fn platform_base(self) -> Option<PathBuf> {
        match self {
            Location::Config => dirs::config_dir(),
            Location::State => dirs::data_dir(),
        }
    }

    /// Home-relative base used when the platform reports none
    fn home_base(self, home: &Path) -> PathBuf {
        match self {
            Location::Config => home.join(".config"),
            Location::State => home.join(".local").join("share"),
        }
    }

    fn resolve_with(
        self,
        pinned: Option<String>,
        platform: Option<PathBuf>,
        home: Option<PathBuf>,
    ) -> PathBuf {
        if let Some(pinned) = pinned.filter(|p| !p.trim().is_empty()) {
            return PathBuf::from(pinned);
        }
        platform
            .or_else(|| home.map(|h| self.home_base(&h)))
            .map(|base| base.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from(LOCAL_FALLBACK))
    }

    fn resolve(self) -> PathBuf {
        self.resolve_with(
            std::env::var(self.override_var()).ok(),
            self.platform_base(),
            dirs::home_dir(),
        )
    }
}

pub fn config_dir() -> PathBuf {
    Location::Config.resolve()
}

/// Main configuration file; `CODECELL_CONFIG` names it directly
pub fn config_path() -> PathBuf {
    config_file(std::env::var("CODECELL_CONFIG").ok(), config_dir())
}

fn config_file(pinned: Option<String>, dir: PathBuf) -> PathBuf {
    match pinned.filter(|p| !p.trim().is_empty()) {
        Some(path) => PathBuf::from(path),
        None => dir.join("config.json"),
    }
}

pub fn state_dir() -> PathBuf {
    Location::State.resolve()
}

/// Default root for tenant workspaces
pub fn workspace_dir() -> PathBuf {
    state_dir().join("workspaces")
}
