//! Application configuration management.
//!
//! Configuration is stored at `~/.config/sessionguard/config.json` and may be
//! overridden per field with `SESSIONGUARD_*` environment variables.
//! Without an API URL the session core talks to an in-process credential
//! authority.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::{AuthorityTransport, HttpTransport, Transport};
use crate::auth::credentials::SERVICE_NAME;
use crate::auth::{FileStore, KeyringStore, MemoryStore, RefreshTokenStore};
use crate::authority::{
    CredentialAuthority, Latency, RotationPolicy, TokenLifetimes, ACCESS_TOKEN_TTL_SECS,
    REFRESH_TOKEN_TTL_SECS,
};
use crate::cache::manager::DEFAULT_STALE_SECS;

/// Application name used for config/data directory paths
const APP_NAME: &str = "sessionguard";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const ENV_API_URL: &str = "SESSIONGUARD_API_URL";
const ENV_STORAGE: &str = "SESSIONGUARD_STORAGE";
const ENV_LATENCY: &str = "SESSIONGUARD_LATENCY";
const ENV_ACCESS_TTL: &str = "SESSIONGUARD_ACCESS_TTL_SECS";
const ENV_REFRESH_TTL: &str = "SESSIONGUARD_REFRESH_TTL_SECS";
const ENV_ROTATE: &str = "SESSIONGUARD_ROTATE_REFRESH";

/// Where the refresh token is persisted between runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Keyring,
    File,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyring" | "keychain" => Ok(StorageBackend::Keyring),
            "file" => Ok(StorageBackend::File),
            "memory" | "none" => Ok(StorageBackend::Memory),
            other => Err(anyhow::anyhow!("Unknown storage backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_secs: i64,
    pub rotate_refresh_tokens: bool,
    pub simulate_latency: bool,
    pub storage: StorageBackend,
    pub keyring_service: String,
    pub cache_stale_secs: i64,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            access_token_ttl_secs: ACCESS_TOKEN_TTL_SECS,
            refresh_token_ttl_secs: REFRESH_TOKEN_TTL_SECS,
            rotate_refresh_tokens: false,
            simulate_latency: true,
            storage: StorageBackend::default(),
            keyring_service: SERVICE_NAME.to_string(),
            cache_stale_secs: DEFAULT_STALE_SECS,
            last_username: None,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load the config file (defaults when missing), then apply environment
    /// overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Apply `SESSIONGUARD_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL) {
            let url = url.trim().to_string();
            self.api_base_url = if url.is_empty() { None } else { Some(url) };
        }
        if let Some(storage) = lookup(ENV_STORAGE) {
            self.storage = storage.parse()?;
        }
        if let Some(latency) = lookup(ENV_LATENCY) {
            self.simulate_latency = parse_bool(&latency)
                .ok_or_else(|| anyhow::anyhow!("Invalid {}: {}", ENV_LATENCY, latency))?;
        }
        if let Some(rotate) = lookup(ENV_ROTATE) {
            self.rotate_refresh_tokens = parse_bool(&rotate)
                .ok_or_else(|| anyhow::anyhow!("Invalid {}: {}", ENV_ROTATE, rotate))?;
        }
        if let Some(ttl) = lookup(ENV_ACCESS_TTL) {
            self.access_token_ttl_secs = ttl
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: {}", ENV_ACCESS_TTL, ttl))?;
        }
        if let Some(ttl) = lookup(ENV_REFRESH_TTL) {
            self.refresh_token_ttl_secs = ttl
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: {}", ENV_REFRESH_TTL, ttl))?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cache_stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache_stale_secs)
    }

    /// In-process authority configured from the token settings.
    pub fn authority(&self) -> CredentialAuthority {
        let rotation = if self.rotate_refresh_tokens {
            RotationPolicy::Rotate
        } else {
            RotationPolicy::Reuse
        };
        let latency = if self.simulate_latency {
            Latency::simulated()
        } else {
            Latency::none()
        };
        CredentialAuthority::new()
            .with_lifetimes(TokenLifetimes {
                access: chrono::Duration::seconds(self.access_token_ttl_secs),
                refresh: chrono::Duration::seconds(self.refresh_token_ttl_secs),
            })
            .with_rotation(rotation)
            .with_latency(latency)
    }

    pub fn transport(&self) -> Result<Arc<dyn Transport>> {
        match self.api_base_url {
            Some(ref url) => {
                debug!(url = %url, "Using HTTP transport");
                Ok(Arc::new(HttpTransport::new(url.clone(), self.request_timeout())?))
            }
            None => {
                debug!("Using in-process credential authority");
                Ok(Arc::new(AuthorityTransport::new(Arc::new(self.authority()))))
            }
        }
    }

    pub fn refresh_token_store(&self) -> Result<Arc<dyn RefreshTokenStore>> {
        let store: Arc<dyn RefreshTokenStore> = match self.storage {
            StorageBackend::Keyring => Arc::new(KeyringStore::new(self.keyring_service.clone())),
            StorageBackend::File => Arc::new(FileStore::new(self.data_dir()?)),
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
        };
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.api_base_url.is_none());
        assert_eq!(config.access_token_ttl_secs, 900);
        assert_eq!(config.refresh_token_ttl_secs, 604_800);
        assert_eq!(config.storage, StorageBackend::Keyring);
        assert!(!config.rotate_refresh_tokens);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{"storage":"file","rotate_refresh_tokens":true}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.storage, StorageBackend::File);
        assert!(config.rotate_refresh_tokens);
        assert_eq!(config.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.keyring_service, SERVICE_NAME);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[
                (ENV_API_URL, "https://api.example.com"),
                (ENV_STORAGE, "memory"),
                (ENV_LATENCY, "off"),
                (ENV_ACCESS_TTL, "60"),
                (ENV_ROTATE, "yes"),
            ]))
            .unwrap();
        assert_eq!(config.api_base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(config.storage, StorageBackend::Memory);
        assert!(!config.simulate_latency);
        assert_eq!(config.access_token_ttl_secs, 60);
        assert!(config.rotate_refresh_tokens);
    }

    #[test]
    fn test_invalid_override_is_an_error() {
        let mut config = Config::default();
        assert!(config.apply_overrides(lookup(&[(ENV_STORAGE, "floppy")])).is_err());
        assert!(config.apply_overrides(lookup(&[(ENV_ACCESS_TTL, "soon")])).is_err());
    }

    #[test]
    fn test_empty_url_means_in_process_authority() {
        let mut config = Config::default();
        config.api_base_url = Some("https://api.example.com".to_string());
        config.apply_overrides(lookup(&[(ENV_API_URL, "")])).unwrap();
        assert!(config.api_base_url.is_none());
    }
}
