//! Per-channel payloads and their mapping into a canonical [`Request`].

use {
    nexza_common::Channel,
    nexza_sessions::SessionKey,
    serde::Deserialize,
    url::form_urlencoded,
};

use crate::{
    error::{Error, Result},
    request::{ChannelMetadata, Request},
};

/// Longest user message forwarded to the model, in characters.
pub const MAX_INPUT_CHARS: usize = 2_000;
/// Longest accepted client session identifier.
pub const MAX_SESSION_ID_CHARS: usize = 128;

pub const SUMMARY_DEFAULT_TURNS: usize = 50;
pub const SUMMARY_MIN_TURNS: usize = 5;
pub const SUMMARY_MAX_TURNS: usize = 200;

/// `[A-Za-z0-9_-]{1,128}`.
#[must_use]
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_SESSION_ID_CHARS
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Trim, reject empty, and cap at [`MAX_INPUT_CHARS`].
fn clean_text(raw: Option<&str>) -> Result<String> {
    let trimmed = raw.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return Err(Error::EmptyText);
    }
    Ok(match trimmed.char_indices().nth(MAX_INPUT_CHARS) {
        Some((cut, _)) => trimmed[..cut].trim_end().to_string(),
        None => trimmed.to_string(),
    })
}

fn required<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::missing(field))
}

fn persona_override(raw: Option<String>) -> Option<String> {
    raw.map(|p| p.trim().to_string()).filter(|p| !p.is_empty())
}

// ── Mobile / web client ─────────────────────────────────────────────────────

/// `POST /chat` body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppPayload {
    pub message: Option<String>,
    pub session_id: Option<String>,
    pub persona: Option<String>,
}

pub fn normalize_app(payload: AppPayload) -> Result<Request> {
    let session_id = required(payload.session_id.as_deref(), "session_id")?;
    if !is_valid_session_id(session_id) {
        return Err(Error::invalid(
            "session_id",
            "expected 1-128 characters of [A-Za-z0-9_-]",
        ));
    }
    let text = clean_text(payload.message.as_deref())?;
    Ok(Request {
        channel: Channel::MobileApp,
        session_key: SessionKey::device(session_id),
        text,
        explicit_persona: persona_override(payload.persona),
        metadata: ChannelMetadata::Device {
            session_id: session_id.to_string(),
        },
    })
}

// ── Chat platform ───────────────────────────────────────────────────────────

/// `POST /api/discord` body. One shape covers every command; which fields
/// are required depends on `type`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformPayload {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub prompt: Option<String>,
    pub text: Option<String>,
    pub task: Option<String>,
    pub limit: Option<i64>,
    pub persona: Option<String>,
    pub discord: Option<PlatformContext>,
    // Tooling shape: `{message, session_id, persona}` without `type`.
    pub message: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformContext {
    pub user: Option<String>,
    pub channel: Option<String>,
    pub assignee: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformAction {
    /// Normal AI round trip.
    Ask,
    /// Record text in the conversation without asking the model.
    Note,
    /// Record a task for someone without asking the model.
    Assign { assignee: String },
    /// Summarise the last `limit` turns; not appended to history.
    Summary { limit: usize },
}

#[derive(Debug, Clone)]
pub struct PlatformCommand {
    pub action: PlatformAction,
    pub request: Request,
}

pub fn normalize_platform(payload: PlatformPayload) -> Result<PlatformCommand> {
    let Some(kind) = payload.kind.as_deref().map(str::trim) else {
        return normalize_tooling(payload);
    };

    let context = payload.discord.clone().unwrap_or_default();
    let user = required(context.user.as_deref(), "discord.user")?;
    let channel_id = required(context.channel.as_deref(), "discord.channel")?;
    let session_key = SessionKey::platform(user, channel_id);
    let metadata = ChannelMetadata::Platform {
        user: user.to_string(),
        channel: channel_id.to_string(),
    };

    let (action, text) = match kind {
        "ask" => (
            PlatformAction::Ask,
            clean_text(payload.prompt.as_deref().or(payload.message.as_deref()))?,
        ),
        "note" => (PlatformAction::Note, clean_text(payload.text.as_deref())?),
        "assign" => {
            let assignee = required(context.assignee.as_deref(), "discord.assignee")?;
            (
                PlatformAction::Assign {
                    assignee: assignee.to_string(),
                },
                clean_text(payload.task.as_deref())?,
            )
        },
        "summary" => {
            let limit = summary_limit(payload.limit);
            (
                PlatformAction::Summary { limit },
                format!(
                    "Summarize the last {limit} messages of this conversation in a few short bullet points."
                ),
            )
        },
        other => {
            return Err(Error::UnknownType {
                kind: other.to_string(),
            });
        },
    };

    Ok(PlatformCommand {
        action,
        request: Request {
            channel: Channel::ChatPlatform,
            session_key,
            text,
            explicit_persona: persona_override(payload.persona),
            metadata,
        },
    })
}

/// Clamp a requested summary window into the supported range.
#[must_use]
pub fn summary_limit(requested: Option<i64>) -> usize {
    match requested {
        None => SUMMARY_DEFAULT_TURNS,
        Some(n) => usize::try_from(n)
            .unwrap_or(0)
            .clamp(SUMMARY_MIN_TURNS, SUMMARY_MAX_TURNS),
    }
}

fn normalize_tooling(payload: PlatformPayload) -> Result<PlatformCommand> {
    let session_id = required(payload.session_id.as_deref(), "session_id")?;
    if !is_valid_session_id(session_id) {
        return Err(Error::invalid(
            "session_id",
            "expected 1-128 characters of [A-Za-z0-9_-]",
        ));
    }
    let text = clean_text(payload.message.as_deref().or(payload.prompt.as_deref()))?;
    Ok(PlatformCommand {
        action: PlatformAction::Ask,
        request: Request {
            channel: Channel::Other,
            session_key: SessionKey::other(session_id),
            text,
            explicit_persona: persona_override(payload.persona),
            metadata: ChannelMetadata::Device {
                session_id: session_id.to_string(),
            },
        },
    })
}

// ── Telephony ───────────────────────────────────────────────────────────────

/// Decoded provider form parameters, in wire order.
#[derive(Debug, Clone, Default)]
pub struct TelephonyForm {
    params: Vec<(String, String)>,
}

impl TelephonyForm {
    #[must_use]
    pub fn new(params: Vec<(String, String)>) -> Self {
        Self { params }
    }

    /// Parse an `application/x-www-form-urlencoded` body.
    #[must_use]
    pub fn parse(body: &[u8]) -> Self {
        Self::new(form_urlencoded::parse(body).into_owned().collect())
    }

    #[must_use]
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// First non-blank value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.trim())
            .find(|v| !v.is_empty())
    }
}

/// Map a voice or SMS webhook into a request keyed by the caller's number.
pub fn normalize_telephony(channel: Channel, form: &TelephonyForm) -> Result<Request> {
    let from = required(form.get("From"), "From")?;
    let text = match channel {
        Channel::Sms => form.get("Body"),
        _ => form
            .get("SpeechResult")
            .or_else(|| form.get("TranscriptionText"))
            .or_else(|| form.get("Body")),
    };
    let text = clean_text(text)?;
    Ok(Request {
        channel,
        session_key: SessionKey::phone(channel, from),
        text,
        explicit_persona: None,
        metadata: ChannelMetadata::Phone {
            from: from.to_string(),
            to: form.get("To").map(str::to_string),
            call_sid: form
                .get("CallSid")
                .or_else(|| form.get("MessageSid"))
                .map(str::to_string),
        },
    })
}
