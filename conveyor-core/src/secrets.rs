//! Secrets management for Conveyor
//!
//! The state signing key is kept apart from configuration to avoid accidental
//! sharing. The secrets file is located at `~/.config/conveyor/secrets.toml`
//! and must have restrictive permissions (0600 on Unix).
//!
//! Loading priority:
//! 1. Environment variable (CONVEYOR_STATE_SECRET)
//! 2. Secrets file (~/.config/conveyor/secrets.toml)
//! 3. Built-in development key

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Environment variable holding the signing key
pub const SIGNING_KEY_ENV: &str = "CONVEYOR_STATE_SECRET";

/// Fallback key for local development; records signed with it are only
/// protected against accidental edits
pub const DEVELOPMENT_SIGNING_KEY: &str = "conveyor-development-signing-key";

/// Secrets structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Secrets {
    /// State store secrets
    pub state: StateSecrets,
}

/// State store secrets
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StateSecrets {
    /// HMAC key for record signatures
    pub signing_key: Option<String>,
}

impl Secrets {
    /// Load secrets from the default location
    ///
    /// Returns default (empty) secrets if file doesn't exist
    pub fn load() -> Result<Self> {
        let secrets_path = Self::default_secrets_path();

        if let Some(path) = secrets_path {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load secrets from a specific file with permission checking
    pub fn load_from_file(path: &Path) -> Result<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let metadata = std::fs::metadata(path).map_err(Error::Io)?;
            let mode = metadata.permissions().mode();

            if mode & 0o077 != 0 {
                return Err(Error::Config(format!(
                    "Secrets file {} has insecure permissions {:o}. \
                     Please run: chmod 600 {}",
                    path.display(),
                    mode & 0o777,
                    path.display()
                )));
            }

            debug!(path = %path.display(), mode = format!("{:o}", mode & 0o777), "Secrets file permissions OK");
        }

        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        let mut secrets: Secrets = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse secrets: {}", e)))?;

        if let Some(ref mut key) = secrets.state.signing_key {
            *key = key.trim().to_string();
        }

        Ok(secrets)
    }

    /// Get the default secrets file path
    ///
    /// Returns `~/.config/conveyor/secrets.toml` on Unix
    pub fn default_secrets_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("conveyor").join("secrets.toml"))
    }

    /// Get the signing key, falling back to the development key
    ///
    /// Priority: CONVEYOR_STATE_SECRET env var > secrets file > development key
    pub fn signing_key(&self) -> String {
        self.signing_key_from(std::env::var(SIGNING_KEY_ENV).ok())
    }

    fn signing_key_from(&self, env_value: Option<String>) -> String {
        if let Some(key) = env_value {
            let key = key.trim().to_string();
            if !key.is_empty() {
                debug!("Using signing key from {} environment variable", SIGNING_KEY_ENV);
                return key;
            }
        }

        if let Some(ref key) = self.state.signing_key {
            if !key.is_empty() {
                debug!("Using signing key from secrets file");
                return key.clone();
            }
        }

        warn!(
            "No signing key configured; records are signed with the development key. Set {} for real deployments.",
            SIGNING_KEY_ENV
        );
        DEVELOPMENT_SIGNING_KEY.to_string()
    }
}
