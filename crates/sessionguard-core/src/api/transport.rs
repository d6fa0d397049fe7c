//! Transport collaborators the dispatcher sends requests through.
//!
//! `AuthorityTransport` routes the four endpoints to an in-process
//! `CredentialAuthority`; `HttpTransport` talks JSON to a real server.
//! Neither knows anything about refresh or retries on 401.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::{AccessCredential, RefreshCredential};
use crate::authority::CredentialAuthority;
use crate::models::{LoginRequest, RefreshRequest};

use super::ApiError;

pub const LOGIN_PATH: &str = "/login";
pub const REFRESH_PATH: &str = "/refresh";
pub const PROFILE_PATH: &str = "/profile";
pub const PROTECTED_PATH: &str = "/protected";

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub requires_auth: bool,
    pub bearer: Option<AccessCredential>,
}

impl Request {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
            requires_auth: true,
            bearer: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Some(body),
            requires_auth: true,
            bearer: None,
        }
    }

    pub fn login(identity: &str, secret: &str) -> Self {
        let body = serde_json::json!({ "email": identity, "password": secret });
        Self::post(LOGIN_PATH, body).without_auth()
    }

    pub fn refresh(refresh: &RefreshCredential) -> Self {
        let body = serde_json::json!({ "refreshToken": refresh.as_str() });
        Self::post(REFRESH_PATH, body).without_auth()
    }

    pub fn without_auth(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    pub fn with_bearer(mut self, access: AccessCredential) -> Self {
        self.bearer = Some(access);
        self
    }

    /// Refresh requests never trigger another refresh.
    pub fn is_refresh(&self) -> bool {
        self.path == REFRESH_PATH
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one call. No retry on authorization failure.
    async fn send(&self, request: &Request) -> Result<Value, ApiError>;
}

fn parse_body<T: DeserializeOwned>(request: &Request) -> Result<T, ApiError> {
    let body = request.body.clone().unwrap_or(Value::Null);
    serde_json::from_value(body).map_err(|e| {
        ApiError::from_status(StatusCode::BAD_REQUEST, &format!("{} body: {}", request.path, e))
    })
}

fn to_value<T: Serialize>(value: T) -> Result<Value, ApiError> {
    Ok(serde_json::to_value(value)?)
}

/// Transport backed by an in-process authority.
#[derive(Clone)]
pub struct AuthorityTransport {
    authority: Arc<CredentialAuthority>,
}

impl AuthorityTransport {
    pub fn new(authority: Arc<CredentialAuthority>) -> Self {
        Self { authority }
    }

    pub fn authority(&self) -> &Arc<CredentialAuthority> {
        &self.authority
    }
}

#[async_trait]
impl Transport for AuthorityTransport {
    async fn send(&self, request: &Request) -> Result<Value, ApiError> {
        let bearer = request.bearer.as_ref();
        match request.path.as_str() {
            LOGIN_PATH => {
                let body: LoginRequest = parse_body(request)?;
                to_value(self.authority.issue_session(&body.email, &body.password).await?)
            }
            REFRESH_PATH => {
                let body: RefreshRequest = parse_body(request)?;
                let refresh = RefreshCredential::new(body.refresh_token);
                to_value(self.authority.refresh_session(&refresh).await?)
            }
            PROFILE_PATH => to_value(self.authority.get_profile(bearer).await?),
            PROTECTED_PATH => to_value(self.authority.get_protected_resource(bearer).await?),
            other => Err(ApiError::NotFound(other.to_string())),
        }
    }
}

/// Transport for a real HTTP API.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// 401 means different things depending on which endpoint said it.
    fn classify(path: &str, status: StatusCode, body: &str) -> ApiError {
        match (ApiError::from_status(status, body), path) {
            (ApiError::Unauthorized, LOGIN_PATH) => ApiError::InvalidCredentials,
            (ApiError::Unauthorized, REFRESH_PATH) => ApiError::InvalidOrExpiredToken,
            (err, _) => err,
        }
    }

    async fn send_once(&self, request: &Request) -> Result<reqwest::Response, ApiError> {
        let url = self.url(&request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        }
        .header(header::ACCEPT, "application/json");

        if let Some(ref bearer) = request.bearer {
            builder = builder.bearer_auth(bearer.as_str());
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        Ok(builder.send().await?)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &Request) -> Result<Value, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self.send_once(request).await?;
            let status = response.status();

            if status.is_success() {
                let text = response.text().await?;
                if text.trim().is_empty() {
                    return Ok(Value::Null);
                }
                return Ok(serde_json::from_str(&text)?);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited);
                }
                warn!(path = %request.path, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            debug!(path = %request.path, status = %status, "Request failed");
            return Err(Self::classify(&request.path, status, &body));
        }
    }
}
