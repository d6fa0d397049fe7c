//! Sessionguard Core - token-based session management.
//!
//! This crate holds everything below the presentation layer: a credential
//! authority that mints and verifies tokens, the in-memory session store,
//! single-flight token refresh, and a request dispatcher that transparently
//! recovers from expired access tokens.

pub mod api;
pub mod auth;
pub mod authority;
pub mod cache;
pub mod config;
pub mod events;
pub mod lifecycle;
pub mod models;
pub mod refresh;

pub use api::{ApiError, AuthorityTransport, Dispatcher, HttpTransport, Request, Transport};
pub use auth::{AccessCredential, RefreshCredential, RefreshTokenStore, Session, SessionStore, Subject};
pub use authority::{CredentialAuthority, RotationPolicy};
pub use config::{Config, StorageBackend};
pub use events::{SessionEvent, SessionEvents};
pub use lifecycle::{ResumeOutcome, SessionController};
pub use models::{ProtectedData, Profile, User};
pub use refresh::RefreshCoordinator;
