//! Configuration loading, validation, env substitution, and env overrides.
//!
//! Config files: `nexza.toml`, `nexza.yaml`, or `nexza.json`
//! Searched in `./` then `~/.config/nexza/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values, then applies
//! `NEXZA_*` environment overrides on top of whatever the file set.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{apply_env_overrides, config_dir, discover_and_load, load_config},
    schema::{
        AiConfig, ChannelsConfig, NexzaConfig, PersonaConfig, RateLimitConfig, ServerConfig,
        SessionsConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult},
};
