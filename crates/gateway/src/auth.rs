//! Channel authentication: provider webhook signatures, shared secrets, and
//! self-reported client identifiers.
//!
//! Every check runs before the request body is normalized and before any
//! session is looked up, so a rejected request never touches state.

use std::collections::BTreeMap;

use {
    base64::{Engine, engine::general_purpose::STANDARD as BASE64},
    hmac::{Hmac, Mac},
    nexza_channels::{AuthRule, normalize::TelephonyForm, profile::profile},
    nexza_common::{
        Channel,
        redact::{mask_identifier, mask_phone},
    },
    nexza_config::ChannelsConfig,
    secrecy::{ExposeSecret, Secret},
    sha1::Sha1,
    tracing::warn,
};

use crate::error::RelayError;

type HmacSha1 = Hmac<Sha1>;

/// Header carrying the telephony provider's request signature.
pub const SIGNATURE_HEADER: &str = "x-twilio-signature";
/// Header carrying the chat platform shared secret.
pub const API_KEY_HEADER: &str = "x-api-key";

// ── Credential store ────────────────────────────────────────────────────────

/// Per-channel secrets, loaded once at startup and never mutated.
pub struct CredentialStore {
    telephony_token: Option<Secret<String>>,
    public_url: Option<String>,
    platform_key: Option<Secret<String>>,
}

fn non_empty(secret: Option<&Secret<String>>) -> Option<Secret<String>> {
    secret
        .filter(|s| !s.expose_secret().trim().is_empty())
        .map(|s| Secret::new(s.expose_secret().trim().to_string()))
}

impl CredentialStore {
    #[must_use]
    pub fn from_config(channels: &ChannelsConfig) -> Self {
        Self {
            telephony_token: non_empty(channels.telephony.auth_token.as_ref()),
            public_url: channels
                .telephony
                .public_url
                .as_deref()
                .map(|u| u.trim().trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),
            platform_key: non_empty(channels.chat_platform.api_key.as_ref()),
        }
    }

    #[must_use]
    pub fn telephony_configured(&self) -> bool {
        self.telephony_token.is_some()
    }

    #[must_use]
    pub fn chat_platform_configured(&self) -> bool {
        self.platform_key.is_some()
    }

    /// Channels that can currently authenticate anything, for diagnostics.
    #[must_use]
    pub fn configured_channels(&self) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|&channel| match profile(channel).auth {
                AuthRule::ProviderSignature => self.telephony_configured(),
                AuthRule::SharedSecret => self.chat_platform_configured(),
                AuthRule::SelfReported => true,
            })
            .collect()
    }

    /// The URL the provider signed: public base + path + query. The
    /// configured public URL wins over whatever the request says it hit.
    fn signed_url(&self, origin: Option<&str>, path_and_query: &str) -> Option<String> {
        let base = self
            .public_url
            .as_deref()
            .or_else(|| origin.map(|o| o.trim_end_matches('/')))?;
        Some(format!("{base}{path_and_query}"))
    }
}

// ── Proofs ──────────────────────────────────────────────────────────────────

/// What the request presented to prove where it came from.
pub enum Proof<'a> {
    /// Telephony webhook: signature header over URL and form parameters.
    Signature {
        /// `scheme://host` the request arrived on, used only when no public
        /// URL is configured.
        origin: Option<&'a str>,
        path_and_query: &'a str,
        form: &'a TelephonyForm,
        header: Option<&'a str>,
    },
    /// Shared secret header.
    SharedSecret { header: Option<&'a str> },
    /// Client-chosen session identifier.
    SelfReported { session_id: Option<&'a str> },
}

impl Proof<'_> {
    fn rule(&self) -> AuthRule {
        match self {
            Self::Signature { .. } => AuthRule::ProviderSignature,
            Self::SharedSecret { .. } => AuthRule::SharedSecret,
            Self::SelfReported { .. } => AuthRule::SelfReported,
        }
    }

    /// Masked identity for rejection logs.
    fn subject(&self) -> String {
        match self {
            Self::Signature { form, .. } => form
                .get("From")
                .map(mask_phone)
                .unwrap_or_else(|| "-".into()),
            Self::SharedSecret { .. } => "-".into(),
            Self::SelfReported { session_id } => session_id
                .map(mask_identifier)
                .unwrap_or_else(|| "-".into()),
        }
    }
}

/// Why a proof was refused. Only ever logged; callers see `Unauthorized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The channel has no secret configured, so nothing can be verified.
    NotConfigured,
    /// The request carried no proof.
    MissingProof,
    /// The proof did not match.
    Mismatch,
    /// The proof kind is not the one the channel requires.
    WrongRule,
}

impl Rejection {
    fn as_str(self) -> &'static str {
        match self {
            Self::NotConfigured => "channel secret not configured",
            Self::MissingProof => "missing credential",
            Self::Mismatch => "credential mismatch",
            Self::WrongRule => "wrong credential kind for channel",
        }
    }
}

// ── Authenticator ───────────────────────────────────────────────────────────

pub struct Authenticator<'a> {
    credentials: &'a CredentialStore,
}

impl<'a> Authenticator<'a> {
    #[must_use]
    pub fn new(credentials: &'a CredentialStore) -> Self {
        Self { credentials }
    }

    /// Accept or reject `proof` for a request declared to be on `channel`.
    pub fn authenticate(&self, channel: Channel, proof: &Proof<'_>) -> Result<(), RelayError> {
        match self.check(channel, proof) {
            Ok(()) => Ok(()),
            Err(rejection) => {
                warn!(
                    channel = %channel,
                    subject = %proof.subject(),
                    reason = rejection.as_str(),
                    "request rejected"
                );
                Err(RelayError::Unauthorized)
            },
        }
    }

    fn check(&self, channel: Channel, proof: &Proof<'_>) -> Result<(), Rejection> {
        if profile(channel).auth != proof.rule() {
            return Err(Rejection::WrongRule);
        }

        match *proof {
            Proof::Signature {
                origin,
                path_and_query,
                form,
                header,
            } => {
                let token = self
                    .credentials
                    .telephony_token
                    .as_ref()
                    .ok_or(Rejection::NotConfigured)?;
                let url = self
                    .credentials
                    .signed_url(origin, path_and_query)
                    .ok_or(Rejection::NotConfigured)?;
                let header = header
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .ok_or(Rejection::MissingProof)?;
                if verify_signature(token.expose_secret(), &url, form.params(), header) {
                    Ok(())
                } else {
                    Err(Rejection::Mismatch)
                }
            },
            Proof::SharedSecret { header } => {
                let key = self
                    .credentials
                    .platform_key
                    .as_ref()
                    .ok_or(Rejection::NotConfigured)?;
                let header = header
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .ok_or(Rejection::MissingProof)?;
                if constant_time_eq(header.as_bytes(), key.expose_secret().as_bytes()) {
                    Ok(())
                } else {
                    Err(Rejection::Mismatch)
                }
            },
            Proof::SelfReported { session_id } => {
                let session_id = session_id
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or(Rejection::MissingProof)?;
                if nexza_channels::normalize::is_valid_session_id(session_id) {
                    Ok(())
                } else {
                    Err(Rejection::Mismatch)
                }
            },
        }
    }
}

// ── Provider signature ──────────────────────────────────────────────────────

/// String the provider signs: the full URL followed by every POST parameter
/// as `key` + `value`, sorted by key (byte order, distinct values for a
/// repeated key sorted too), with no separators.
#[must_use]
pub fn signature_base(url: &str, params: &[(String, String)]) -> String {
    let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (key, value) in params {
        grouped.entry(key).or_default().push(value);
    }

    let mut base = String::from(url);
    for (key, mut values) in grouped {
        values.sort_unstable();
        values.dedup();
        for value in values {
            base.push_str(key);
            base.push_str(value);
        }
    }
    base
}

/// Base64 HMAC-SHA1 of [`signature_base`], keyed with the auth token.
#[must_use]
pub fn compute_signature(
    auth_token: &str,
    url: &str,
    params: &[(String, String)],
) -> Option<String> {
    let mac = signature_mac(auth_token, url, params)?;
    Some(BASE64.encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a signature header.
///
/// Proxies and the provider disagree on whether the port is part of the
/// URL, so the URL is also tried with the port toggled.
#[must_use]
pub fn verify_signature(
    auth_token: &str,
    url: &str,
    params: &[(String, String)],
    header: &str,
) -> bool {
    let Ok(provided) = BASE64.decode(header.trim()) else {
        return false;
    };
    std::iter::once(url.to_string())
        .chain(toggle_port(url))
        .any(|candidate| match signature_mac(auth_token, &candidate, params) {
            Some(mac) => mac.verify_slice(&provided).is_ok(),
            None => {
                warn!("failed to create HMAC");
                false
            },
        })
}

/// `url` with its explicit port removed, or with the scheme's default port
/// added when it has none. `None` for schemes other than http(s).
fn toggle_port(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    let default_port = match scheme.to_ascii_lowercase().as_str() {
        "https" => 443,
        "http" => 80,
        _ => return None,
    };
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(end);
    match authority.rsplit_once(':') {
        Some((host, port))
            if !host.is_empty() && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) =>
        {
            Some(format!("{scheme}://{host}{tail}"))
        },
        _ => Some(format!("{scheme}://{authority}:{default_port}{tail}")),
    }
}

fn signature_mac(auth_token: &str, url: &str, params: &[(String, String)]) -> Option<HmacSha1> {
    let mut mac = HmacSha1::new_from_slice(auth_token.as_bytes()).ok()?;
    mac.update(signature_base(url, params).as_bytes());
    Some(mac)
}

/// Length-leaking but content-constant-time byte comparison.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
