use std::time::{Duration, Instant};

use {
    nexza_agents::{AiClient, PersonaCatalog},
    nexza_config::NexzaConfig,
    nexza_sessions::{SessionStore, StoreLimits},
    tokio_util::sync::CancellationToken,
};

use crate::{auth::CredentialStore, metrics::RelayMetrics, rate_limit::RateLimiter};

/// Everything a request needs, shared by all handlers.
pub struct GatewayState {
    pub version: String,
    pub started_at: Instant,
    pub behind_proxy: bool,
    pub credentials: CredentialStore,
    pub sessions: SessionStore,
    pub rate_limiter: RateLimiter,
    pub personas: PersonaCatalog,
    pub ai: AiClient,
    pub metrics: RelayMetrics,
    pub sweep_interval: Duration,
    /// Fired on shutdown; background tasks stop when it is cancelled.
    pub shutdown: CancellationToken,
}

impl GatewayState {
    /// State for `config`, talking to the AI backend through `ai`.
    #[must_use]
    pub fn new(config: &NexzaConfig, ai: AiClient) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Instant::now(),
            behind_proxy: config.server.behind_proxy,
            credentials: CredentialStore::from_config(&config.channels),
            sessions: SessionStore::new(StoreLimits {
                max_turns: config.sessions.max_turns,
                idle_timeout: Duration::from_secs(config.sessions.idle_timeout_secs),
                max_sessions: config.sessions.max_sessions,
            }),
            rate_limiter: RateLimiter::from_config(&config.rate_limit),
            personas: PersonaCatalog::with_overrides(&config.personas),
            ai,
            metrics: RelayMetrics::new(),
            sweep_interval: Duration::from_secs(config.sessions.sweep_interval_secs.max(1)),
            shutdown: CancellationToken::new(),
        }
    }

    /// State with the configured OpenAI-compatible backend.
    pub fn from_config(config: &NexzaConfig) -> anyhow::Result<Self> {
        let ai = AiClient::from_config(&config.ai)?;
        Ok(Self::new(config, ai))
    }

    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
