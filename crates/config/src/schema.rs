/// Config schema types (server, AI backend, sessions, rate limiting, channels, personas).
use std::collections::BTreeMap;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NexzaConfig {
    pub server: ServerConfig,
    pub ai: AiConfig,
    pub sessions: SessionsConfig,
    pub rate_limit: RateLimitConfig,
    pub channels: ChannelsConfig,
    /// Persona overrides and additions, keyed by persona id.
    pub personas: BTreeMap<String, PersonaConfig>,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "127.0.0.1".
    pub bind: String,
    pub port: u16,
    /// Trust `X-Forwarded-*` headers from a reverse proxy.
    pub behind_proxy: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 5000,
            behind_proxy: false,
        }
    }
}

/// External completion service (any OpenAI-compatible chat completions API).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Base URL; `/chat/completions` is appended.
    pub base_url: String,
    pub model: String,
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_key: Option<Secret<String>>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-attempt timeout.
    pub timeout_secs: u64,
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234/v1".into(),
            model: "local-model".into(),
            api_key: None,
            temperature: 0.7,
            max_tokens: 800,
            timeout_secs: 60,
            max_attempts: 3,
            base_backoff_ms: 1_500,
            max_backoff_ms: 10_000,
        }
    }
}

/// Session history and lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Upper bound on turns kept per session; oldest are trimmed first.
    pub max_turns: usize,
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    /// Upper bound on live sessions.
    pub max_sessions: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_turns: 50,
            idle_timeout_secs: 30 * 60,
            sweep_interval_secs: 60,
            max_sessions: 10_000,
        }
    }
}

/// Per-session token bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub refill_per_sec: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_per_sec: 0.2,
        }
    }
}

/// Per-channel credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub telephony: TelephonyConfig,
    pub chat_platform: ChatPlatformConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelephonyConfig {
    /// Provider auth token used to sign webhook requests.
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub auth_token: Option<Secret<String>>,
    /// Public origin the provider calls, e.g. `https://relay.example.com`.
    /// Signatures cover the URL as the provider saw it, not as the socket did.
    pub public_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatPlatformConfig {
    /// Shared secret expected in `X-API-Key`.
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_key: Option<Secret<String>>,
}

/// Persona override or addition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    pub prompt: Option<String>,
    /// Elevated personas are only selectable from channels that prove a secret.
    pub elevated: Option<bool>,
}

impl ChannelsConfig {
    /// Whether the telephony channel can verify anything at all.
    pub fn telephony_configured(&self) -> bool {
        self.telephony
            .auth_token
            .as_ref()
            .is_some_and(|s| !s.expose_secret().is_empty())
    }

    pub fn chat_platform_configured(&self) -> bool {
        self.chat_platform
            .api_key
            .as_ref()
            .is_some_and(|s| !s.expose_secret().is_empty())
    }
}

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(_) => serializer.serialize_some("[REDACTED]"),
        None => serializer.serialize_none(),
    }
}
