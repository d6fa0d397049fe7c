//! Durable slot for the refresh token.
//!
//! Exactly one value lives here: the current refresh token string, stored
//! under a fixed key. Nothing else about the session survives a restart.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use keyring::Entry;

/// Key the refresh token is stored under in every backend
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Default keychain service name
pub const SERVICE_NAME: &str = "sessionguard";

pub trait RefreshTokenStore: Send + Sync {
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, token: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Refresh token kept in the OS keychain.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, REFRESH_TOKEN_KEY).context("Failed to create keyring entry")
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}

impl RefreshTokenStore for KeyringStore {
    fn load(&self) -> Result<Option<String>> {
        match self.entry()?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve refresh token from keychain"),
        }
    }

    fn save(&self, token: &str) -> Result<()> {
        self.entry()?
            .set_password(token)
            .context("Failed to store refresh token in keychain")
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete refresh token from keychain"),
        }
    }
}

/// Refresh token kept in a JSON file, for hosts without a keychain.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Session file name in the data directory
    pub const FILE_NAME: &'static str = "session.json";

    pub fn new(dir: PathBuf) -> Self {
        Self {
            path: dir.join(Self::FILE_NAME),
        }
    }
}

impl RefreshTokenStore for FileStore {
    fn load(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents =
            std::fs::read_to_string(&self.path).context("Failed to read session file")?;
        let value: serde_json::Value =
            serde_json::from_str(&contents).context("Failed to parse session file")?;
        Ok(value
            .get(REFRESH_TOKEN_KEY)
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    fn save(&self, token: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut body = serde_json::Map::new();
        body.insert(
            REFRESH_TOKEN_KEY.to_string(),
            serde_json::Value::String(token.to_string()),
        );
        let contents = serde_json::to_string_pretty(&body)?;
        std::fs::write(&self.path, contents).context("Failed to write session file")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).context("Failed to remove session file")?;
        }
        Ok(())
    }
}

/// Process-local slot; nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    token: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

impl RefreshTokenStore for MemoryStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.token.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, token: &str) -> Result<()> {
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert_eq!(store.load().unwrap(), None);
        store.save("r1").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("r1"));
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));
        assert_eq!(store.load().unwrap(), None);

        store.save("r1").unwrap();
        let raw = std::fs::read_to_string(dir.path().join("nested").join(FileStore::FILE_NAME)).unwrap();
        assert!(raw.contains(REFRESH_TOKEN_KEY));
        assert_eq!(store.load().unwrap().as_deref(), Some("r1"));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
        // Clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(FileStore::FILE_NAME), "{not json").unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        assert!(store.load().is_err());
    }
}
