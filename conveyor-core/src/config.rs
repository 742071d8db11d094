//! Configuration management for Conveyor
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (CONVEYOR_*)
//! 3. Config file (~/.config/conveyor/config.toml)
//! 4. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Where records are stored
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StateConfig {
    /// Root directory of the record store
    pub root: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".conveyor"),
        }
    }
}

/// Session staleness settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// An active session with no activity for this long is stale
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(4 * 60 * 60),
        }
    }
}

/// Issue lock settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LockConfig {
    /// A lock marker at least this old may be reclaimed
    #[serde(with = "humantime_serde")]
    pub stale_timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Branch bookkeeping settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GitConfig {
    /// Branch new issue branches are cut from
    pub base_branch: String,
    /// Prefix for issue branches (`<prefix>/<feature>/issue-<n>`)
    pub branch_prefix: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            base_branch: "main".to_string(),
            branch_prefix: "conveyor".to_string(),
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub state: StateConfig,
    pub session: SessionConfig,
    pub locks: LockConfig,
    pub git: GitConfig,
}

impl Config {
    /// Load configuration from the default config file location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();

        if let Some(path) = config_path {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/conveyor/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("conveyor").join("config.toml"))
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - CONVEYOR_STATE_ROOT: Record store directory
    /// - CONVEYOR_SESSION_TTL: Session TTL (e.g. "2h")
    /// - CONVEYOR_LOCK_TIMEOUT: Lock stale timeout (e.g. "15m")
    /// - CONVEYOR_BASE_BRANCH: Base branch for issue branches
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    fn with_overrides_from(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(root) = var("CONVEYOR_STATE_ROOT") {
            self.state.root = PathBuf::from(root);
        }

        if let Some(ttl) = var("CONVEYOR_SESSION_TTL") {
            self.session.ttl = parse_duration("CONVEYOR_SESSION_TTL", &ttl)?;
        }

        if let Some(timeout) = var("CONVEYOR_LOCK_TIMEOUT") {
            self.locks.stale_timeout = parse_duration("CONVEYOR_LOCK_TIMEOUT", &timeout)?;
        }

        if let Some(branch) = var("CONVEYOR_BASE_BRANCH") {
            self.git.base_branch = branch;
        }

        Ok(self)
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(mut self, state_root: Option<PathBuf>) -> Self {
        if let Some(root) = state_root {
            self.state.root = root;
        }

        self
    }

    /// Load configuration with all overrides applied
    ///
    /// Priority: CLI > env > config file > defaults
    pub fn load_with_overrides(state_root: Option<PathBuf>) -> Result<Self> {
        Ok(Self::load()?
            .with_env_overrides()?
            .with_cli_overrides(state_root))
    }
}

fn parse_duration(name: &str, value: &str) -> Result<Duration> {
    humantime_serde::re::humantime::parse_duration(value)
        .map_err(|e| Error::Config(format!("Invalid duration in {}: {}", name, e)))
}
