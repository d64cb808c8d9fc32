//! Semantic validation of a loaded configuration.
//!
//! Parsing already guarantees the shape; this pass catches values that parse
//! but would make the relay misbehave, and flags channels that will fail
//! closed because their secret is missing.

use std::fmt;

use crate::schema::NexzaConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "range", "url", "security"
    pub category: &'static str,
    /// Dotted path, e.g. "sessions.max_turns"
    pub path: &'static str,
    pub message: String,
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(
        &mut self,
        severity: Severity,
        category: &'static str,
        path: &'static str,
        message: impl Into<String>,
    ) {
        self.diagnostics.push(Diagnostic {
            severity,
            category,
            path,
            message: message.into(),
        });
    }
}

/// Validate `config`, returning every problem found (not just the first).
#[must_use]
pub fn validate(config: &NexzaConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    if config.sessions.max_turns == 0 {
        result.push(
            Severity::Error,
            "range",
            "sessions.max_turns",
            "must be at least 1",
        );
    }
    if config.sessions.max_sessions == 0 {
        result.push(
            Severity::Error,
            "range",
            "sessions.max_sessions",
            "must be at least 1",
        );
    }
    if config.sessions.sweep_interval_secs == 0 {
        result.push(
            Severity::Error,
            "range",
            "sessions.sweep_interval_secs",
            "must be at least 1",
        );
    }
    if config.rate_limit.capacity == 0 {
        result.push(
            Severity::Error,
            "range",
            "rate_limit.capacity",
            "a zero-capacity bucket rejects every request",
        );
    }
    if !(config.rate_limit.refill_per_sec.is_finite() && config.rate_limit.refill_per_sec > 0.0) {
        result.push(
            Severity::Error,
            "range",
            "rate_limit.refill_per_sec",
            "must be a positive number",
        );
    }
    if config.ai.max_attempts == 0 {
        result.push(
            Severity::Error,
            "range",
            "ai.max_attempts",
            "must be at least 1",
        );
    }
    if config.ai.timeout_secs == 0 {
        result.push(
            Severity::Error,
            "range",
            "ai.timeout_secs",
            "must be at least 1",
        );
    }
    if config.ai.base_backoff_ms > config.ai.max_backoff_ms {
        result.push(
            Severity::Warning,
            "range",
            "ai.base_backoff_ms",
            "larger than ai.max_backoff_ms; every retry waits the maximum",
        );
    }

    match url::Url::parse(&config.ai.base_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {},
        Ok(url) => result.push(
            Severity::Error,
            "url",
            "ai.base_url",
            format!("unsupported scheme '{}'", url.scheme()),
        ),
        Err(e) => result.push(Severity::Error, "url", "ai.base_url", e.to_string()),
    }

    if !config.channels.chat_platform_configured() {
        result.push(
            Severity::Warning,
            "security",
            "channels.chat_platform.api_key",
            "not set; /api/discord rejects every request",
        );
    }
    if config.channels.telephony_configured() {
        match config.channels.telephony.public_url.as_deref() {
            None => result.push(
                Severity::Warning,
                "security",
                "channels.telephony.public_url",
                "not set; signatures are checked against the local request URL",
            ),
            Some(raw) if url::Url::parse(raw).is_err() => result.push(
                Severity::Error,
                "url",
                "channels.telephony.public_url",
                format!("'{raw}' is not an absolute URL"),
            ),
            Some(_) => {},
        }
    } else {
        result.push(
            Severity::Warning,
            "security",
            "channels.telephony.auth_token",
            "not set; telephony webhooks reject every request",
        );
    }

    result
}
