//! Single-flight refresh of the access token.
//!
//! However many callers ask for a refresh at once, one refresh request goes
//! upstream. The first caller moves the coordinator from `Idle` to
//! `Refreshing` and starts the upstream call on its own task; everyone who
//! arrives meanwhile (the first caller included) waits on a oneshot handle in
//! a FIFO queue. When the call finishes the session store is updated, the
//! queue is drained in arrival order, and the state returns to `Idle` under
//! the same lock, so no new refresh can start until every waiter has its
//! answer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::api::transport::{Request, Transport};
use crate::api::ApiError;
use crate::auth::{AccessCredential, RefreshCredential, RefreshTokenStore, SessionStore};
use crate::events::{SessionEvent, SessionEvents};
use crate::models::RefreshResponse;

type Outcome = Result<AccessCredential, ApiError>;
type Waiter = oneshot::Sender<Outcome>;

enum State {
    Idle,
    Refreshing { waiters: VecDeque<Waiter> },
}

struct Inner {
    state: Mutex<State>,
    store: SessionStore,
    persisted: Arc<dyn RefreshTokenStore>,
    transport: Arc<dyn Transport>,
    events: SessionEvents,
}

/// Clone is cheap; clones share one state machine.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        store: SessionStore,
        persisted: Arc<dyn RefreshTokenStore>,
        transport: Arc<dyn Transport>,
        events: SessionEvents,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Idle),
                store,
                persisted,
                transport,
                events,
            }),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.inner.lock(), State::Refreshing { .. })
    }

    /// Number of callers waiting on the in-flight refresh
    #[cfg(test)]
    fn pending_waiters(&self) -> usize {
        match &*self.inner.lock() {
            State::Idle => 0,
            State::Refreshing { waiters } => waiters.len(),
        }
    }

    /// Get a new access token, joining the in-flight refresh if there is one.
    ///
    /// `stale` is the credential the caller found unusable (`None` if it had
    /// none). When the store already holds a different, unexpired credential,
    /// a refresh finished since the caller looked, and that credential is
    /// returned without going upstream again.
    pub async fn request_refresh(
        &self,
        stale: Option<&AccessCredential>,
    ) -> Result<AccessCredential, ApiError> {
        let (tx, rx) = oneshot::channel();

        let start = {
            let mut state = self.inner.lock();
            match &mut *state {
                State::Idle => {
                    // Decided under the state lock: a finished refresh writes
                    // the store before it returns to Idle
                    if let Some(current) = self.inner.store.current_access_credential() {
                        if Some(&current) != stale && !current.is_expired() {
                            debug!("Token already refreshed by another caller");
                            return Ok(current);
                        }
                    }
                    *state = State::Refreshing {
                        waiters: VecDeque::from([tx]),
                    };
                    true
                }
                State::Refreshing { waiters } => {
                    waiters.push_back(tx);
                    debug!(queued = waiters.len(), "Refresh in flight, waiting");
                    false
                }
            }
        };

        if start {
            debug!("Starting token refresh");
            let inner = Arc::clone(&self.inner);
            // Runs detached so a caller that stops polling cannot strand the queue
            tokio::spawn(async move {
                let mut guard = ReleaseGuard {
                    inner: Arc::clone(&inner),
                    released: false,
                };
                let outcome = inner.perform_refresh().await;
                inner.release(outcome);
                guard.released = true;
            });
        }

        rx.await.unwrap_or_else(|_| {
            Err(ApiError::Transport(
                "refresh ended without a result".to_string(),
            ))
        })
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn perform_refresh(&self) -> Outcome {
        let generation = self.store.generation();

        // No session means nothing to expire: leave the durable slot and
        // listeners alone
        let Some(refresh) = self.store.current_refresh_credential() else {
            debug!("No session to refresh");
            return Err(ApiError::InvalidOrExpiredToken);
        };

        let response = self
            .transport
            .send(&Request::refresh(&refresh))
            .await
            .and_then(|value| Ok(serde_json::from_value::<RefreshResponse>(value)?));

        match response {
            Ok(response) => self.apply(generation, refresh, response),
            // One attempt per demand cycle; any failure ends the session
            Err(err) => {
                self.expire(generation);
                match err {
                    ApiError::InvalidOrExpiredToken
                    | ApiError::Unauthorized
                    | ApiError::InvalidCredentials => {
                        info!("Refresh token rejected, session cleared");
                        Err(ApiError::InvalidOrExpiredToken)
                    }
                    other => {
                        warn!(error = %other, "Token refresh failed, session cleared");
                        Err(other)
                    }
                }
            }
        }
    }

    fn apply(
        &self,
        generation: u64,
        presented: RefreshCredential,
        response: RefreshResponse,
    ) -> Outcome {
        let access = AccessCredential::new(response.access_token);
        let rotated = response
            .refresh_token
            .map(RefreshCredential::new)
            .filter(|r| *r != presented);

        if !self
            .store
            .refresh_if_generation(generation, access.clone(), rotated.clone())
        {
            warn!("Session changed during refresh, discarding refreshed token");
            return Err(ApiError::InvalidOrExpiredToken);
        }

        let current = rotated.unwrap_or(presented);
        if let Err(e) = self.persisted.save(current.as_str()) {
            warn!(error = %e, "Failed to persist refresh token");
        }

        if let Some(subject) = self.store.get().map(|s| s.subject) {
            debug!(subject = %subject, "Token refreshed");
            self.events.emit(SessionEvent::Refreshed { subject });
        }
        Ok(access)
    }

    /// Drop the session the refresh started from, and its persisted token.
    fn expire(&self, generation: u64) {
        if self.store.clear_if_generation(generation) {
            if let Err(e) = self.persisted.clear() {
                warn!(error = %e, "Failed to clear persisted refresh token");
            }
            self.events.emit(SessionEvent::Expired);
        }
    }

    fn release(&self, outcome: Outcome) {
        let mut state = self.lock();
        if let State::Refreshing { waiters } = std::mem::replace(&mut *state, State::Idle) {
            debug!(waiters = waiters.len(), ok = outcome.is_ok(), "Releasing refresh waiters");
            for waiter in waiters {
                // A waiter whose caller went away just drops the result
                let _ = waiter.send(outcome.clone());
            }
        }
    }
}

/// Resolves the queue with a failure if the refresh task dies before
/// releasing it.
struct ReleaseGuard {
    inner: Arc<Inner>,
    released: bool,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if !self.released {
            warn!("Refresh task ended early, failing waiters");
            self.inner.release(Err(ApiError::Transport(
                "refresh task aborted".to_string(),
            )));
        }
    }
}
