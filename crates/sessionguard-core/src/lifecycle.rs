//! Session lifecycle: startup resume, login and logout.
//!
//! `SessionController` owns one session store and wires it to a refresh
//! coordinator and a dispatcher. It is the surface a presentation layer
//! talks to.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::api::transport::{Request, Transport};
use crate::api::{ApiError, Dispatcher};
use crate::auth::{
    AccessCredential, RefreshCredential, RefreshTokenStore, Session, SessionStore, Subject,
};
use crate::cache::QueryCache;
use crate::config::Config;
use crate::events::{SessionEvent, SessionEvents};
use crate::models::{LoginResponse, ProtectedData, Profile, User};
use crate::refresh::RefreshCoordinator;

/// Query keys for cached authenticated fetches
pub const PROFILE_QUERY: &str = "profile";
pub const PROTECTED_QUERY: &str = "protected-data";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    Authenticated(Profile),
    Unauthenticated,
}

pub struct SessionController {
    transport: Arc<dyn Transport>,
    store: SessionStore,
    persisted: Arc<dyn RefreshTokenStore>,
    coordinator: RefreshCoordinator,
    dispatcher: Dispatcher,
    events: SessionEvents,
    cache: QueryCache,
    user: Mutex<Option<User>>,
    ready: watch::Sender<bool>,
}

impl SessionController {
    pub fn new(transport: Arc<dyn Transport>, persisted: Arc<dyn RefreshTokenStore>) -> Self {
        Self::with_cache(transport, persisted, QueryCache::default())
    }

    pub fn with_cache(
        transport: Arc<dyn Transport>,
        persisted: Arc<dyn RefreshTokenStore>,
        cache: QueryCache,
    ) -> Self {
        let store = SessionStore::new();
        let events = SessionEvents::new();
        let coordinator = RefreshCoordinator::new(
            store.clone(),
            Arc::clone(&persisted),
            Arc::clone(&transport),
            events.clone(),
        );
        let dispatcher = Dispatcher::new(Arc::clone(&transport), store.clone(), coordinator.clone());
        let (ready, _) = watch::channel(false);

        Self {
            transport,
            store,
            persisted,
            coordinator,
            dispatcher,
            events,
            cache,
            user: Mutex::new(None),
            ready,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::with_cache(
            config.transport()?,
            config.refresh_token_store()?,
            QueryCache::new(config.cache_stale_after()),
        ))
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn user_slot(&self) -> MutexGuard<'_, Option<User>> {
        self.user.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn user(&self) -> Option<User> {
        self.user_slot().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Resolves once `resume` has finished, successfully or not.
    pub async fn wait_until_ready(&self) {
        let mut rx = self.ready.subscribe();
        // The sender lives in self, so this only fails if self is gone
        let _ = rx.wait_for(|ready| *ready).await;
    }

    // ===== Lifecycle =====

    /// Restore the session from the persisted refresh token, if any.
    pub async fn resume(&self) -> ResumeOutcome {
        let outcome = self.try_resume().await;
        self.ready.send_replace(true);
        outcome
    }

    async fn try_resume(&self) -> ResumeOutcome {
        let token = match self.persisted.load() {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!("No persisted refresh token");
                return ResumeOutcome::Unauthenticated;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read persisted refresh token");
                return ResumeOutcome::Unauthenticated;
            }
        };

        let Some(session) = Session::resumed(RefreshCredential::new(token)) else {
            warn!("Persisted refresh token is unreadable, discarding it");
            self.discard_persisted();
            return ResumeOutcome::Unauthenticated;
        };
        let subject = session.subject.clone();
        self.store.set(session);

        let resumed = async {
            self.coordinator.request_refresh(None).await?;
            self.dispatcher.fetch_profile().await
        }
        .await;

        match resumed {
            Ok(profile) => {
                info!(subject = %subject, "Session resumed");
                *self.user_slot() = Some(profile.user());
                self.cache.insert(PROFILE_QUERY, &profile);
                self.events.emit(SessionEvent::SignedIn { subject });
                ResumeOutcome::Authenticated(profile)
            }
            Err(e) => {
                info!(error = %e, "Could not resume session");
                self.store.clear();
                self.discard_persisted();
                ResumeOutcome::Unauthenticated
            }
        }
    }

    /// Sign in with identity and secret.
    pub async fn login(&self, identity: &str, secret: &str) -> Result<User, ApiError> {
        let value = self
            .transport
            .send(&Request::login(identity, secret))
            .await
            .inspect_err(|e| debug!(error = %e, "Login failed"))?;
        let response: LoginResponse = serde_json::from_value(value)?;

        let refresh = RefreshCredential::new(response.refresh_token);
        let subject = Subject::new(response.user.email.clone());
        self.cache.clear();
        self.store.set(Session::new(
            subject.clone(),
            AccessCredential::new(response.access_token),
            refresh.clone(),
        ));
        if let Err(e) = self.persisted.save(refresh.as_str()) {
            warn!(error = %e, "Failed to persist refresh token");
        }
        *self.user_slot() = Some(response.user.clone());

        info!(subject = %subject, "Signed in");
        self.events.emit(SessionEvent::SignedIn { subject });
        Ok(response.user)
    }

    /// Forget the session and everything fetched under it.
    pub fn logout(&self) {
        self.store.clear();
        self.discard_persisted();
        self.forget_session_data();
        info!("Signed out");
        self.events.emit(SessionEvent::SignedOut);
    }

    fn discard_persisted(&self) {
        if let Err(e) = self.persisted.clear() {
            warn!(error = %e, "Failed to clear persisted refresh token");
        }
    }

    fn forget_session_data(&self) {
        self.cache.clear();
        *self.user_slot() = None;
    }

    // ===== Authenticated Queries =====

    pub async fn profile(&self) -> Result<Profile, ApiError> {
        self.cached(PROFILE_QUERY, || self.dispatcher.fetch_profile())
            .await
    }

    pub async fn protected_data(&self) -> Result<ProtectedData, ApiError> {
        self.cached(PROTECTED_QUERY, || self.dispatcher.fetch_protected_data())
            .await
    }

    async fn cached<T, F, Fut>(&self, key: &str, fetch: F) -> Result<T, ApiError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        if let Some(hit) = self.cache.get::<T>(key) {
            debug!(key = key, "Query served from cache");
            return Ok(hit);
        }

        let generation = self.store.generation();
        match fetch().await {
            Ok(value) => {
                // Don't keep data for a session that ended mid-fetch
                if self.store.generation() == generation && self.store.is_authenticated() {
                    self.cache.insert(key, &value);
                }
                Ok(value)
            }
            Err(e) => {
                if e.ends_session() || !self.store.is_authenticated() {
                    self.forget_session_data();
                }
                Err(e)
            }
        }
    }
}
