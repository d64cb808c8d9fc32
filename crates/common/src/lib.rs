//! Shared types, error definitions, and utilities used across all nexza crates.

pub mod error;
pub mod redact;
pub mod types;

pub use {
    error::{Error, Result},
    types::{Channel, Role, now_ms},
};
