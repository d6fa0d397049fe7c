//! Session state and credential storage.
//!
//! This module provides:
//! - `AccessCredential`, `RefreshCredential`, `Subject`: opaque token newtypes
//! - `SessionStore`: the in-memory session slot shared by the dispatcher,
//!   the refresh coordinator and the lifecycle controller
//! - `RefreshTokenStore`: the one durable slot (keychain, file or memory)

pub mod credentials;
pub mod session;
pub mod tokens;

pub use credentials::{FileStore, KeyringStore, MemoryStore, RefreshTokenStore};
pub use session::{Session, SessionStore};
pub use tokens::{AccessCredential, RefreshCredential, Subject};
