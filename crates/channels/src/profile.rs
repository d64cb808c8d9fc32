use nexza_common::Channel;

/// How a channel proves a request came from where it claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRule {
    /// Provider HMAC over URL + sorted form parameters.
    ProviderSignature,
    /// Shared secret in a request header.
    SharedSecret,
    /// Self-reported identifier, syntax-checked only.
    SelfReported,
}

/// Static per-channel behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelProfile {
    pub channel: Channel,
    pub default_persona: &'static str,
    pub auth: AuthRule,
    /// Upper bound on reply length, in characters.
    pub max_reply_chars: usize,
}

impl ChannelProfile {
    /// Whether the channel proved possession of a secret. Untrusted channels
    /// never unlock elevated personas.
    #[must_use]
    pub const fn trusted(&self) -> bool {
        !matches!(self.auth, AuthRule::SelfReported)
    }

    /// Replies are rendered as provider markup rather than JSON.
    #[must_use]
    pub const fn uses_markup(&self) -> bool {
        matches!(self.channel, Channel::Telephone | Channel::Sms)
    }
}

const PROFILES: [ChannelProfile; 5] = [
    ChannelProfile {
        channel: Channel::Telephone,
        default_persona: "PHONE_AGENT",
        auth: AuthRule::ProviderSignature,
        max_reply_chars: 600,
    },
    ChannelProfile {
        channel: Channel::Sms,
        default_persona: "PHONE_AGENT",
        auth: AuthRule::ProviderSignature,
        max_reply_chars: 320,
    },
    ChannelProfile {
        channel: Channel::ChatPlatform,
        default_persona: "DISCORD_HELPER",
        auth: AuthRule::SharedSecret,
        max_reply_chars: 1_900,
    },
    ChannelProfile {
        channel: Channel::MobileApp,
        default_persona: "NEXZA_ASSISTANT",
        auth: AuthRule::SelfReported,
        max_reply_chars: 4_000,
    },
    ChannelProfile {
        channel: Channel::Other,
        default_persona: "NEXZA_ASSISTANT",
        auth: AuthRule::SharedSecret,
        max_reply_chars: 2_000,
    },
];

/// Look up the table row for `channel`.
#[must_use]
pub fn profile(channel: Channel) -> &'static ChannelProfile {
    match channel {
        Channel::Telephone => &PROFILES[0],
        Channel::Sms => &PROFILES[1],
        Channel::ChatPlatform => &PROFILES[2],
        Channel::MobileApp => &PROFILES[3],
        Channel::Other => &PROFILES[4],
    }
}
