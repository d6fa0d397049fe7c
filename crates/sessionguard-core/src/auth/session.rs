use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{AccessCredential, RefreshCredential, Subject};

/// The credentials of the signed-in principal.
///
/// `access` is absent only between a resume and its first refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub subject: Subject,
    pub access: Option<AccessCredential>,
    pub refresh: RefreshCredential,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(subject: Subject, access: AccessCredential, refresh: RefreshCredential) -> Self {
        Self {
            subject,
            access: Some(access),
            refresh,
            created_at: Utc::now(),
        }
    }

    /// A session rebuilt from a persisted refresh token, before any access
    /// token has been minted for it.
    pub fn resumed(refresh: RefreshCredential) -> Option<Self> {
        let subject = refresh.subject()?;
        Some(Self {
            subject,
            access: None,
            refresh,
            created_at: Utc::now(),
        })
    }

    /// Check if the access token is present and not past its embedded expiry
    pub fn has_valid_access(&self) -> bool {
        self.access.as_ref().map(|a| !a.is_expired()).unwrap_or(false)
    }
}

#[derive(Debug, Default)]
struct Slot {
    session: Option<Session>,
    generation: u64,
}

/// In-memory holder for the current session.
///
/// Clone is cheap and every clone sees the same slot. The lock is only held
/// for the duration of a single read or write, never across an `.await`.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    slot: Arc<Mutex<Slot>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        // A poisoned slot still holds a consistent Option<Session>
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self) -> Option<Session> {
        self.lock().session.clone()
    }

    /// Install a session, starting a new generation.
    pub fn set(&self, session: Session) {
        let mut slot = self.lock();
        slot.session = Some(session);
        slot.generation += 1;
    }

    /// Drop both credentials at once, starting a new generation.
    pub fn clear(&self) {
        let mut slot = self.lock();
        slot.session = None;
        slot.generation += 1;
    }

    pub fn current_access_credential(&self) -> Option<AccessCredential> {
        self.lock().session.as_ref().and_then(|s| s.access.clone())
    }

    pub fn current_refresh_credential(&self) -> Option<RefreshCredential> {
        self.lock().session.as_ref().map(|s| s.refresh.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().session.is_some()
    }

    /// Counter bumped by every `set` and `clear`.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Swap in refreshed credentials, but only if no login, logout or clear
    /// happened since `generation` was read. Returns whether the write landed.
    pub fn refresh_if_generation(
        &self,
        generation: u64,
        access: AccessCredential,
        refresh: Option<RefreshCredential>,
    ) -> bool {
        let mut slot = self.lock();
        if slot.generation != generation {
            return false;
        }
        match slot.session.as_mut() {
            Some(session) => {
                session.access = Some(access);
                if let Some(refresh) = refresh {
                    session.refresh = refresh;
                }
                true
            }
            None => false,
        }
    }

    /// Clear the session only if it is still the one from `generation`.
    pub fn clear_if_generation(&self, generation: u64) -> bool {
        let mut slot = self.lock();
        if slot.generation != generation {
            return false;
        }
        slot.session = None;
        slot.generation += 1;
        true
    }
}
