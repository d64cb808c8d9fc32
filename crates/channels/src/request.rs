use {
    nexza_common::{
        Channel,
        redact::{mask_identifier, mask_phone},
    },
    nexza_sessions::SessionKey,
};

/// Channel-specific identifying fields carried alongside a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMetadata {
    Phone {
        from: String,
        to: Option<String>,
        call_sid: Option<String>,
    },
    Platform {
        user: String,
        channel: String,
    },
    Device {
        session_id: String,
    },
}

impl ChannelMetadata {
    /// Log-safe rendering: numbers and ids are masked.
    #[must_use]
    pub fn masked(&self) -> String {
        match self {
            Self::Phone { from, .. } => format!("from={}", mask_phone(from)),
            Self::Platform { user, channel } => format!(
                "user={} channel={}",
                mask_identifier(user),
                mask_identifier(channel)
            ),
            Self::Device { session_id } => format!("session={}", mask_identifier(session_id)),
        }
    }
}

/// Canonical request after normalization.
#[derive(Debug, Clone)]
pub struct Request {
    pub channel: Channel,
    pub session_key: SessionKey,
    /// Trimmed, non-empty user text.
    pub text: String,
    pub explicit_persona: Option<String>,
    pub metadata: ChannelMetadata,
}
