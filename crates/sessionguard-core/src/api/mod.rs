//! Request dispatch for the authenticated API.
//!
//! This module provides the `Dispatcher`, which attaches bearer tokens and
//! recovers from expired access tokens, and the `Transport` implementations
//! it sends requests through.
//!
//! Requests travel to four endpoints: `/login` and `/refresh` (never
//! authenticated) and `/profile` and `/protected` (bearer token required).

pub mod dispatcher;
pub mod error;
pub mod transport;

pub use dispatcher::Dispatcher;
pub use error::ApiError;
pub use transport::{AuthorityTransport, HttpTransport, Method, Request, Transport};
