//! Session storage.
//!
//! Sessions live in memory for the lifetime of the process, keyed by a
//! channel-derived [`SessionKey`]. Each session sits behind its own async
//! mutex so one conversation is strictly sequential while distinct
//! conversations run in parallel. Idle sessions are reaped by
//! [`SessionStore::evict_idle`].

pub mod error;
pub mod key;
pub mod session;
pub mod store;

pub use {
    error::{Error, Result},
    key::SessionKey,
    session::{Session, SessionSnapshot, Turn},
    store::{SessionGuard, SessionHandle, SessionStore, StoreLimits},
};
