use std::fmt;

use {
    nexza_common::Channel,
    serde::{Deserialize, Serialize},
};

/// Session key: `voice:<phone>`, `sms:<phone>`, `discord:<user>:<channel>`,
/// `app:<device>` or `other:<id>`.
///
/// The prefix keeps identities from different channels apart even when the
/// raw identifiers collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey(String);

impl SessionKey {
    /// Telephony identity: the caller's number, split by voice vs SMS.
    #[must_use]
    pub fn phone(channel: Channel, number: &str) -> Self {
        let prefix = match channel {
            Channel::Sms => "sms",
            _ => "voice",
        };
        Self(format!("{prefix}:{number}"))
    }

    /// Chat platform identity: one conversation per user per channel.
    ///
    /// `%` and `:` inside either id are percent-escaped so distinct pairs
    /// never render to the same key.
    #[must_use]
    pub fn platform(user_id: &str, channel_id: &str) -> Self {
        Self(format!(
            "discord:{}:{}",
            escape_part(user_id),
            escape_part(channel_id)
        ))
    }

    /// Mobile or web client identity, as reported by the client.
    #[must_use]
    pub fn device(device_id: &str) -> Self {
        Self(format!("app:{device_id}"))
    }

    /// Tooling or test client identity.
    #[must_use]
    pub fn other(id: &str) -> Self {
        Self(format!("other:{id}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn escape_part(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            c => out.push(c),
        }
    }
    out
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
