//! Process-wide request counters reported by `/health/detailed`.

use std::{
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use serde::Serialize;

use crate::error::FailureKind;

/// Most recent failure. Only the kind is kept; error details may carry
/// request content and stay in the logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastError {
    pub kind: &'static str,
    pub timestamp: String,
}

#[derive(Debug, Default)]
pub struct RelayMetrics {
    requests: AtomicU64,
    errors: AtomicU64,
    chats: AtomicU64,
    last_error: Mutex<Option<LastError>>,
}

/// Point-in-time view of [`RelayMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub total_chats: u64,
    pub error_rate: f64,
    pub average_requests_per_minute: f64,
    pub last_error: Option<LastError>,
}

impl RelayMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatch started.
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// A dispatch produced a real reply (not an apology).
    pub fn record_chat(&self) {
        self.chats.fetch_add(1, Ordering::Relaxed);
    }

    /// A dispatch failed, or degraded to an apology.
    pub fn record_error(&self, kind: FailureKind, timestamp: String) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(LastError {
                kind: kind.as_str(),
                timestamp,
            });
        }
    }

    #[must_use]
    pub fn snapshot(&self, uptime: Duration) -> MetricsSnapshot {
        let total_requests = self.requests.load(Ordering::Relaxed);
        let total_errors = self.errors.load(Ordering::Relaxed);
        let minutes = uptime.as_secs_f64().max(1.0) / 60.0;
        MetricsSnapshot {
            total_requests,
            total_errors,
            total_chats: self.chats.load(Ordering::Relaxed),
            error_rate: total_errors as f64 / total_requests.max(1) as f64,
            average_requests_per_minute: total_requests as f64 / minutes,
            last_error: self.last_error.lock().ok().and_then(|last| last.clone()),
        }
    }
}
