//! Relay failure taxonomy and how each kind is rendered per channel.

use std::time::Duration;

use {
    axum::{
        http::{HeaderValue, StatusCode, header},
        response::{IntoResponse, Json, Response},
    },
    nexza_channels::markup::{self, Language, Notice},
    nexza_common::Channel,
};

/// Every way a request can stop short of a normal reply.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Client input is invalid. No session was touched.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Signature or secret mismatch. No session was touched.
    #[error("unauthorized")]
    Unauthorized,

    /// The session's bucket is empty. No session was touched.
    #[error("rate limited, retry after {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// The AI backend could not produce a reply after retries.
    #[error("service unavailable")]
    ServiceUnavailable,

    /// Unexpected fault; details are logged, never returned.
    #[error("internal error: {0}")]
    InternalError(String),
}

/// Discriminant of [`RelayError`], for state tracking and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    MalformedRequest,
    Unauthorized,
    RateLimited,
    ServiceUnavailable,
    InternalError,
}

impl FailureKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MalformedRequest => "malformed_request",
            Self::Unauthorized => "unauthorized",
            Self::RateLimited => "rate_limited",
            Self::ServiceUnavailable => "service_unavailable",
            Self::InternalError => "internal_error",
        }
    }
}

impl From<nexza_channels::Error> for RelayError {
    fn from(err: nexza_channels::Error) -> Self {
        Self::MalformedRequest(err.to_string())
    }
}

impl RelayError {
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedRequest(message.into())
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError(message.into())
    }

    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::MalformedRequest(_) => FailureKind::MalformedRequest,
            Self::Unauthorized => FailureKind::Unauthorized,
            Self::RateLimited { .. } => FailureKind::RateLimited,
            Self::ServiceUnavailable => FailureKind::ServiceUnavailable,
            Self::InternalError(_) => FailureKind::InternalError,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::ServiceUnavailable => StatusCode::OK,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text safe to show a client.
    fn client_message(&self, channel: Channel) -> String {
        match self {
            Self::MalformedRequest(message) => message.clone(),
            Self::Unauthorized => "unauthorized".into(),
            Self::RateLimited { .. } => "too many requests".into(),
            Self::ServiceUnavailable => Notice::Unavailable
                .text(channel, Language::English)
                .to_string(),
            Self::InternalError(_) => "internal error".into(),
        }
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after } => Some(retry_after.as_secs().max(1)),
            _ => None,
        }
    }

    /// `POST /chat` rendering: `{error}` with the mapped status.
    #[must_use]
    pub fn chat_response(&self, session_id: Option<&str>) -> Response {
        let channel = Channel::MobileApp;
        let body = match self {
            Self::ServiceUnavailable => serde_json::json!({
                "response": self.client_message(channel),
                "session_id": session_id,
                "timestamp": crate::now_rfc3339(),
            }),
            Self::RateLimited { .. } => serde_json::json!({
                "error": self.client_message(channel),
                "retry_after_seconds": self.retry_after_secs(),
            }),
            _ => serde_json::json!({ "error": self.client_message(channel) }),
        };
        self.with_retry_after((self.status(), Json(body)).into_response())
    }

    /// `POST /api/discord` rendering: `{ok:false, error}` with the mapped status.
    #[must_use]
    pub fn platform_response(&self) -> Response {
        let channel = Channel::ChatPlatform;
        let mut body = serde_json::json!({
            "ok": false,
            "error": self.client_message(channel),
        });
        if let Some(secs) = self.retry_after_secs() {
            body["retry_after_seconds"] = secs.into();
        }
        self.with_retry_after((self.status(), Json(body)).into_response())
    }

    /// Telephony rendering: provider markup, mostly with a 200 so the provider
    /// plays the apology instead of its own error prompt.
    #[must_use]
    pub fn markup_response(&self, channel: Channel, language: Language) -> Response {
        let (status, body) = match self {
            Self::MalformedRequest(_) => (
                StatusCode::BAD_REQUEST,
                markup::render(channel, Notice::NotUnderstood.text(channel, language), language),
            ),
            Self::Unauthorized => (StatusCode::FORBIDDEN, markup::empty()),
            Self::RateLimited { .. } => (
                StatusCode::OK,
                markup::render(channel, Notice::Busy.text(channel, language), language),
            ),
            Self::ServiceUnavailable => (
                StatusCode::OK,
                markup::render(channel, Notice::Unavailable.text(channel, language), language),
            ),
            Self::InternalError(_) => (
                StatusCode::OK,
                markup::render(channel, Notice::Internal.text(channel, language), language),
            ),
        };
        xml_response(status, body)
    }

    fn with_retry_after(&self, mut response: Response) -> Response {
        if let Some(secs) = self.retry_after_secs()
            && let Ok(value) = secs.to_string().parse()
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

/// Provider markup response.
#[must_use]
pub fn xml_response(status: StatusCode, body: String) -> Response {
    let mut response = (status, body).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/xml; charset=utf-8"),
    );
    response
}
