//! Minimal credential authority standing in for the real backend.
//!
//! Issues access/refresh token pairs for known principals, refreshes access
//! tokens, verifies them, and serves the two resource endpoints the client
//! talks to. Every operation sleeps for a configurable delay so callers see
//! the same suspension points a network round trip would give them.

pub mod registry;
pub mod token;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use thiserror::Error;
use tracing::debug;

use crate::api::ApiError;
use crate::auth::{AccessCredential, RefreshCredential, Subject};
use crate::models::{LoginResponse, ProtectedData, Profile, RefreshResponse};

pub use registry::{Principal, PrincipalRegistry};
pub use token::{Claims, TokenError, TokenKind};

/// Access tokens live 15 minutes
pub const ACCESS_TOKEN_TTL_SECS: i64 = 15 * 60;

/// Refresh tokens live 7 days
pub const REFRESH_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid refresh token")]
    InvalidOrExpiredToken,

    #[error("Unauthorized")]
    Unauthorized,
}

impl From<AuthFailure> for ApiError {
    fn from(failure: AuthFailure) -> Self {
        match failure {
            AuthFailure::InvalidCredentials => ApiError::InvalidCredentials,
            AuthFailure::InvalidOrExpiredToken => ApiError::InvalidOrExpiredToken,
            AuthFailure::Unauthorized => ApiError::Unauthorized,
        }
    }
}

/// Whether a refresh hands back a new refresh token or the presented one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationPolicy {
    #[default]
    Reuse,
    Rotate,
}

/// Simulated round-trip delay per operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Latency {
    pub login: Duration,
    pub refresh: Duration,
    pub profile: Duration,
    pub protected: Duration,
}

impl Latency {
    pub fn simulated() -> Self {
        Self {
            login: Duration::from_millis(800),
            refresh: Duration::from_millis(500),
            profile: Duration::from_millis(400),
            protected: Duration::from_millis(600),
        }
    }

    pub fn none() -> Self {
        Self {
            login: Duration::ZERO,
            refresh: Duration::ZERO,
            profile: Duration::ZERO,
            protected: Duration::ZERO,
        }
    }
}

impl Default for Latency {
    fn default() -> Self {
        Self::simulated()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLifetimes {
    pub access: chrono::Duration,
    pub refresh: chrono::Duration,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            access: chrono::Duration::seconds(ACCESS_TOKEN_TTL_SECS),
            refresh: chrono::Duration::seconds(REFRESH_TOKEN_TTL_SECS),
        }
    }
}

/// Snapshot of how many times each endpoint was hit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub login: usize,
    pub refresh: usize,
    pub profile: usize,
    pub protected: usize,
}

#[derive(Debug, Default)]
struct Counters {
    login: AtomicUsize,
    refresh: AtomicUsize,
    profile: AtomicUsize,
    protected: AtomicUsize,
}

pub struct CredentialAuthority {
    registry: PrincipalRegistry,
    lifetimes: TokenLifetimes,
    rotation: RotationPolicy,
    latency: Latency,
    counters: Counters,
}

impl Default for CredentialAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialAuthority {
    pub fn new() -> Self {
        Self {
            registry: PrincipalRegistry::default(),
            lifetimes: TokenLifetimes::default(),
            rotation: RotationPolicy::default(),
            latency: Latency::default(),
            counters: Counters::default(),
        }
    }

    pub fn with_registry(mut self, registry: PrincipalRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_lifetimes(mut self, lifetimes: TokenLifetimes) -> Self {
        self.lifetimes = lifetimes;
        self
    }

    pub fn with_rotation(mut self, rotation: RotationPolicy) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_latency(mut self, latency: Latency) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            login: self.counters.login.load(Ordering::SeqCst),
            refresh: self.counters.refresh.load(Ordering::SeqCst),
            profile: self.counters.profile.load(Ordering::SeqCst),
            protected: self.counters.protected.load(Ordering::SeqCst),
        }
    }

    /// Mint a token for `subject` expiring at `expires_at_ms` (epoch millis).
    pub fn mint(
        &self,
        subject: &str,
        role: Option<&str>,
        kind: TokenKind,
        expires_at_ms: i64,
    ) -> String {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LEN)
            .map(char::from)
            .collect();

        token::encode(&Claims {
            sub: subject.to_string(),
            role: role.map(str::to_string),
            kind,
            iat: Utc::now().timestamp_millis(),
            exp: expires_at_ms,
            jti: nonce,
        })
    }

    fn mint_access(&self, principal: &Principal) -> AccessCredential {
        let exp = (Utc::now() + self.lifetimes.access).timestamp_millis();
        AccessCredential::new(self.mint(
            &principal.email,
            Some(&principal.role),
            TokenKind::Access,
            exp,
        ))
    }

    fn mint_refresh(&self, principal: &Principal) -> RefreshCredential {
        let exp = (Utc::now() + self.lifetimes.refresh).timestamp_millis();
        RefreshCredential::new(self.mint(&principal.email, None, TokenKind::Refresh, exp))
    }

    /// Check identity and secret against the registry and mint a session.
    pub async fn issue_session(
        &self,
        identity: &str,
        secret: &str,
    ) -> Result<LoginResponse, AuthFailure> {
        self.counters.login.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency.login).await;

        let principal = self
            .registry
            .authenticate(identity, secret)
            .ok_or(AuthFailure::InvalidCredentials)?;

        debug!(subject = %principal.email, "Issued session");
        Ok(LoginResponse {
            access_token: self.mint_access(principal).into_string(),
            refresh_token: self.mint_refresh(principal).into_string(),
            user: principal.user(),
        })
    }

    /// Mint a new access token from a valid, unexpired refresh token.
    pub async fn refresh_session(
        &self,
        refresh: &RefreshCredential,
    ) -> Result<RefreshResponse, AuthFailure> {
        self.counters.refresh.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency.refresh).await;

        let claims = token::verify(
            refresh.as_str(),
            TokenKind::Refresh,
            Utc::now().timestamp_millis(),
        )
        .map_err(|e| {
            debug!(error = %e, "Rejected refresh token");
            AuthFailure::InvalidOrExpiredToken
        })?;

        let principal = self
            .registry
            .find(&claims.sub)
            .ok_or(AuthFailure::InvalidOrExpiredToken)?;

        let refresh_token = match self.rotation {
            RotationPolicy::Reuse => refresh.as_str().to_string(),
            RotationPolicy::Rotate => self.mint_refresh(principal).into_string(),
        };

        debug!(subject = %principal.email, rotation = ?self.rotation, "Refreshed session");
        Ok(RefreshResponse {
            access_token: self.mint_access(principal).into_string(),
            refresh_token: Some(refresh_token),
        })
    }

    /// Decode an access token and check its expiry. Pure; no simulated delay.
    pub fn verify(&self, access: &AccessCredential) -> Result<Subject, AuthFailure> {
        token::verify(access.as_str(), TokenKind::Access, Utc::now().timestamp_millis())
            .map(|claims| Subject::new(claims.sub))
            .map_err(|_| AuthFailure::Unauthorized)
    }

    fn verified_principal(&self, access: Option<&AccessCredential>) -> Result<&Principal, AuthFailure> {
        let access = access.ok_or(AuthFailure::Unauthorized)?;
        let subject = self.verify(access)?;
        self.registry
            .find(subject.as_str())
            .ok_or(AuthFailure::Unauthorized)
    }

    pub async fn get_profile(
        &self,
        access: Option<&AccessCredential>,
    ) -> Result<Profile, AuthFailure> {
        self.counters.profile.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency.profile).await;

        let principal = self.verified_principal(access)?;
        Ok(Profile {
            email: principal.email.clone(),
            name: principal.name.clone(),
            role: principal.role.clone(),
            last_login: Utc::now(),
        })
    }

    pub async fn get_protected_resource(
        &self,
        access: Option<&AccessCredential>,
    ) -> Result<ProtectedData, AuthFailure> {
        self.counters.protected.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency.protected).await;

        self.verified_principal(access)?;
        Ok(ProtectedData {
            message: "Successfully fetched protected data!".to_string(),
            timestamp: Utc::now(),
            items: (1..=4).map(|i| format!("Secure Item {}", i)).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority() -> CredentialAuthority {
        CredentialAuthority::new().with_latency(Latency::none())
    }

    #[tokio::test]
    async fn test_issue_and_verify() {
        let authority = authority();
        let session = authority
            .issue_session("demo@example.com", "password123")
            .await
            .unwrap();
        let access = AccessCredential::new(session.access_token);
        assert_eq!(authority.verify(&access).unwrap().as_str(), "demo@example.com");
        assert_eq!(session.user.name, "Demo User");
        assert_eq!(authority.calls().login, 1);
    }

    #[tokio::test]
    async fn test_issue_rejects_wrong_secret() {
        let authority = authority();
        let result = authority.issue_session("demo@example.com", "nope").await;
        assert!(matches!(result, Err(AuthFailure::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_access_and_refresh_expiries_are_independent() {
        let authority = authority();
        let session = authority
            .issue_session("demo@example.com", "password123")
            .await
            .unwrap();
        let access = AccessCredential::new(session.access_token).expires_at().unwrap();
        let refresh = RefreshCredential::new(session.refresh_token).expires_at().unwrap();
        let gap = refresh - access;
        assert!(gap > chrono::Duration::days(6));
    }

    #[test]
    fn test_expired_access_is_unauthorized() {
        let authority = authority();
        let expired = AccessCredential::new(authority.mint(
            "demo@example.com",
            Some("user"),
            TokenKind::Access,
            Utc::now().timestamp_millis() - 1,
        ));
        assert_eq!(authority.verify(&expired), Err(AuthFailure::Unauthorized));
    }

    #[test]
    fn test_refresh_token_is_not_an_access_token() {
        let authority = authority();
        let refresh = AccessCredential::new(authority.mint(
            "demo@example.com",
            None,
            TokenKind::Refresh,
            Utc::now().timestamp_millis() + 60_000,
        ));
        assert_eq!(authority.verify(&refresh), Err(AuthFailure::Unauthorized));
    }

    #[tokio::test]
    async fn test_refresh_reuses_token_by_default() {
        let authority = authority();
        let session = authority
            .issue_session("demo@example.com", "password123")
            .await
            .unwrap();
        let refresh = RefreshCredential::new(session.refresh_token.clone());
        let refreshed = authority.refresh_session(&refresh).await.unwrap();
        assert_eq!(refreshed.refresh_token.as_deref(), Some(session.refresh_token.as_str()));
        assert_ne!(refreshed.access_token, session.access_token);
        assert_eq!(authority.calls().refresh, 1);
    }

    #[tokio::test]
    async fn test_refresh_rotates_when_configured() {
        let authority = authority().with_rotation(RotationPolicy::Rotate);
        let session = authority
            .issue_session("demo@example.com", "password123")
            .await
            .unwrap();
        let refresh = RefreshCredential::new(session.refresh_token.clone());
        let refreshed = authority.refresh_session(&refresh).await.unwrap();
        let rotated = refreshed.refresh_token.unwrap();
        assert_ne!(rotated, session.refresh_token);
        assert!(token::verify(&rotated, TokenKind::Refresh, Utc::now().timestamp_millis()).is_ok());
    }

    #[tokio::test]
    async fn test_refresh_rejects_corrupt_and_expired_tokens() {
        let authority = authority();
        let corrupt = RefreshCredential::new("garbage");
        assert_eq!(
            authority.refresh_session(&corrupt).await.unwrap_err(),
            AuthFailure::InvalidOrExpiredToken
        );

        let expired = RefreshCredential::new(authority.mint(
            "demo@example.com",
            None,
            TokenKind::Refresh,
            Utc::now().timestamp_millis() - 1,
        ));
        assert_eq!(
            authority.refresh_session(&expired).await.unwrap_err(),
            AuthFailure::InvalidOrExpiredToken
        );
    }

    #[tokio::test]
    async fn test_resources_require_valid_access() {
        let authority = authority();
        assert_eq!(
            authority.get_profile(None).await.unwrap_err(),
            AuthFailure::Unauthorized
        );

        let session = authority
            .issue_session("admin@example.com", "admin123")
            .await
            .unwrap();
        let access = AccessCredential::new(session.access_token);
        let profile = authority.get_profile(Some(&access)).await.unwrap();
        assert_eq!(profile.role, "admin");

        let data = authority.get_protected_resource(Some(&access)).await.unwrap();
        assert_eq!(data.items.len(), 4);
        assert_eq!(data.items[0], "Secure Item 1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_take_simulated_time() {
        let authority = CredentialAuthority::new();
        let started = tokio::time::Instant::now();
        authority
            .issue_session("demo@example.com", "password123")
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(800));
    }
}
