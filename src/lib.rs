//! Ephemeral shared-state layer for the PromptHub platform.
//!
//! Short-lived, time-bounded, cross-request state on a shared key-value
//! store with per-key expiry: rate limiting, server-side sessions, token
//! revocation, presence, one-time tokens and a read-through cache. The
//! store may be unavailable at any moment; every operation here degrades
//! to "feature disabled" rather than failing the request. Nothing in this
//! crate is durable — the document store remains the system of record.

pub mod config;
pub mod error;
pub mod state;

pub mod kvs {
    pub mod client;
    pub mod memory;
}

pub mod services {
    pub mod cache;
    pub mod one_time_token;
    pub mod presence;
    pub mod rate_limit;
    pub mod revocation;
    pub mod session;
}

pub mod middleware_layer {
    pub mod auth;
    pub mod cache;
    pub mod rate_limit;
}

pub use config::Config;
pub use error::{AppError, Result};
pub use state::AppState;
