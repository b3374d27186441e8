//! Application configuration management.
//!
//! Holds the server base URL, request timeout, credential backend and the
//! last used username. Stored at `~/.config/transitpass/config.json`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::{ApiClient, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS};
use crate::auth::{CredentialStore, FileKv, KeyringKv};

/// Application name used for config directory paths
const APP_NAME: &str = "transitpass";

const CONFIG_FILE: &str = "config.json";
const CREDENTIALS_FILE: &str = "credentials.json";

pub const ENV_BASE_URL: &str = "TRANSITPASS_BASE_URL";
pub const ENV_USERNAME: &str = "TRANSITPASS_USERNAME";
pub const ENV_PASSWORD: &str = "TRANSITPASS_PASSWORD";

/// Where the session credential is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub credential_backend: CredentialBackend,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            credential_backend: CredentialBackend::default(),
            last_username: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Base URL with `TRANSITPASS_BASE_URL` taking precedence over the file.
    pub fn resolved_base_url(&self) -> String {
        self.base_url_with_override(std::env::var(ENV_BASE_URL).ok())
    }

    fn base_url_with_override(&self, env_value: Option<String>) -> String {
        env_value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| self.base_url.clone())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn api_client(&self) -> Result<ApiClient> {
        let base_url = self.resolved_base_url();
        ApiClient::new(&base_url, self.timeout())
            .with_context(|| format!("Failed to build HTTP client for {}", base_url))
    }

    /// Credential store for the configured backend, rooted in the default
    /// config directory.
    pub fn credential_store(&self) -> Result<CredentialStore> {
        Ok(self.credential_store_in(&Self::config_dir()?))
    }

    pub fn credential_store_in(&self, dir: &Path) -> CredentialStore {
        match self.credential_backend {
            CredentialBackend::File => {
                CredentialStore::new(Arc::new(FileKv::new(dir.join(CREDENTIALS_FILE))))
            }
            CredentialBackend::Keyring => CredentialStore::new(Arc::new(KeyringKv::new())),
        }
    }
}
