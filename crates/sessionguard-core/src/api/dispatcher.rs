//! Authenticated request dispatch.
//!
//! Attaches the current access token, and on `Unauthorized` obtains a new one
//! from the refresh coordinator and sends the request one more time. The
//! retry is a single extra transport call, never a recursive dispatch.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::auth::SessionStore;
use crate::models::{ProtectedData, Profile};
use crate::refresh::RefreshCoordinator;

use super::transport::{Request, Transport, PROFILE_PATH, PROTECTED_PATH};
use super::ApiError;

#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    store: SessionStore,
    coordinator: RefreshCoordinator,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: SessionStore,
        coordinator: RefreshCoordinator,
    ) -> Self {
        Self {
            transport,
            store,
            coordinator,
        }
    }

    pub async fn dispatch(&self, mut request: Request) -> Result<Value, ApiError> {
        if request.requires_auth {
            if let Some(access) = self.store.current_access_credential() {
                if access.is_expired() {
                    // Known to be stale: refresh first, then this is the only send
                    debug!(path = %request.path, "Access token past expiry, refreshing before send");
                    let fresh = self.coordinator.request_refresh(Some(&access)).await?;
                    return self.transport.send(&request.with_bearer(fresh)).await;
                }
                request.bearer = Some(access);
            }
        }

        match self.transport.send(&request).await {
            Err(ApiError::Unauthorized) if request.requires_auth && !request.is_refresh() => {
                debug!(path = %request.path, "Unauthorized, refreshing token");
                // Hands back the stored token instead if another caller
                // already replaced the one this request was sent with
                let fresh = self
                    .coordinator
                    .request_refresh(request.bearer.as_ref())
                    .await?;
                request.bearer = Some(fresh);
                self.transport.send(&request).await
            }
            other => other,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let value = self.dispatch(Request::get(path)).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)?;
        let value = self.dispatch(Request::post(path, body)).await?;
        Ok(serde_json::from_value(value)?)
    }

    // ===== Resource Endpoints =====

    pub async fn fetch_profile(&self) -> Result<Profile, ApiError> {
        self.get(PROFILE_PATH).await
    }

    pub async fn fetch_protected_data(&self) -> Result<ProtectedData, ApiError> {
        self.get(PROTECTED_PATH).await
    }
}
