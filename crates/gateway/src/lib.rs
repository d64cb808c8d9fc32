//! Gateway: HTTP front door for every channel.
//!
//! Lifecycle:
//! 1. Load + validate config
//! 2. Build shared state (credentials, sessions, rate limiter, AI client)
//! 3. Start the HTTP server and the idle sweeper
//! 4. Stop both when the shutdown token fires
//!
//! Each request runs through [`dispatcher::Dispatcher`], which owns the
//! authenticate → normalize → rate check → AI → sanitize → respond sequence.
//! Route modules only translate wire formats in and out.

pub mod auth;
pub mod chat_routes;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod platform_routes;
pub mod rate_limit;
pub mod server;
pub mod state;
pub mod telephony_routes;

pub use {
    error::RelayError,
    server::{build_gateway_app, start_gateway},
    state::GatewayState,
};

/// Current time as RFC 3339, for response timestamps.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
