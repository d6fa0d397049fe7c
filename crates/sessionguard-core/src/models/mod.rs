//! Data models exchanged between the session core and the API.
//!
//! - `User`, `Profile`: the signed-in principal
//! - `ProtectedData`: payload of the protected resource endpoint
//! - Request/response bodies for login and refresh

pub mod profile;
pub mod wire;

pub use profile::{ProtectedData, Profile, User};
pub use wire::{LoginRequest, LoginResponse, RefreshRequest, RefreshResponse};
