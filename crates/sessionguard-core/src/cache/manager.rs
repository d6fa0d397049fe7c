use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Cached query results go stale after 5 minutes by default.
pub const DEFAULT_STALE_SECS: i64 = 5 * 60;

#[derive(Debug, Clone)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age(&self) -> Duration {
        Utc::now() - self.cached_at
    }

    pub fn age_display(&self) -> String {
        let seconds = self.age().num_seconds();
        if seconds < 5 {
            // Also covers clock skew
            "just now".to_string()
        } else if seconds < 60 {
            format!("{}s ago", seconds)
        } else if seconds < 3600 {
            format!("{}m ago", seconds / 60)
        } else {
            format!("{}h ago", seconds / 3600)
        }
    }

    pub fn is_stale(&self, stale_after: Duration) -> bool {
        self.age() > stale_after
    }
}

/// Query results for the signed-in session.
pub struct QueryCache {
    entries: Mutex<HashMap<String, CachedData<Value>>>,
    stale_after: Duration,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_STALE_SECS))
    }
}

impl QueryCache {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            stale_after,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CachedData<Value>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fresh cached value for `key`, if any.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.lock().get(key).cloned()?;
        if entry.is_stale(self.stale_after) {
            debug!(key = key, age = %entry.age_display(), "Cached query is stale");
            return None;
        }
        serde_json::from_value(entry.data).ok()
    }

    pub fn insert<T: Serialize>(&self, key: &str, data: &T) {
        match serde_json::to_value(data) {
            Ok(value) => {
                self.lock().insert(key.to_string(), CachedData::new(value));
            }
            Err(e) => warn!(key = key, error = %e, "Failed to cache query result"),
        }
    }

    pub fn invalidate(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn clear(&self) {
        let mut entries = self.lock();
        if !entries.is_empty() {
            debug!(entries = entries.len(), "Clearing query cache");
        }
        entries.clear();
    }

    /// How long ago `key` was cached, for display
    pub fn age_display(&self, key: &str) -> String {
        self.lock()
            .get(key)
            .map(|e| e.age_display())
            .unwrap_or_else(|| "never".to_string())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
