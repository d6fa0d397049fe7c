//! In-memory cache for authenticated query results.
//!
//! This module provides the `QueryCache`, which holds the results of
//! authenticated fetches keyed by query name. Everything in it belongs to the
//! current session and is discarded on logout or when the session expires.

pub mod manager;

pub use manager::{CachedData, QueryCache};
