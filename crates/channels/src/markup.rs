//! Telephony provider markup and the canned replies every channel falls back to.

use nexza_common::Channel;

const XML_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
const VOICE: &str = "alice";

const SPANISH_WORDS: &[&str] = &[
    "hola",
    "gracias",
    "cómo",
    "necesito",
    "cita",
    "servicio",
    "vehículo",
    "vehiculo",
];
const SPANISH_PHRASES: &[[&str; 2]] = &[["por", "favor"]];

/// Spoken/written language for a telephony reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    English,
    Spanish,
}

impl Language {
    /// BCP-47 tag understood by the provider's text-to-speech.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::English => "en-US",
            Self::Spanish => "es-MX",
        }
    }
}

/// Keyword sniffing, good enough to pick a TTS voice. Keywords only count as
/// whole words, so "citation" stays English.
#[must_use]
pub fn detect_language(text: &str) -> Language {
    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let has_word = words.iter().any(|w| SPANISH_WORDS.contains(w));
    let has_phrase = words
        .windows(2)
        .any(|pair| SPANISH_PHRASES.iter().any(|phrase| pair == phrase.as_slice()));
    if has_word || has_phrase {
        Language::Spanish
    } else {
        Language::English
    }
}

#[must_use]
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Voice reply: text read aloud.
#[must_use]
pub fn say(text: &str, language: Language) -> String {
    format!(
        r#"{XML_HEADER}<Response><Say voice="{VOICE}" language="{}">{}</Say></Response>"#,
        language.tag(),
        escape_xml(text)
    )
}

/// SMS reply.
#[must_use]
pub fn message(text: &str) -> String {
    format!(
        "{XML_HEADER}<Response><Message>{}</Message></Response>",
        escape_xml(text)
    )
}

/// Reply that tells the provider to do nothing.
#[must_use]
pub fn empty() -> String {
    format!("{XML_HEADER}<Response/>")
}

/// Render `text` in the markup for a telephony channel.
#[must_use]
pub fn render(channel: Channel, text: &str, language: Language) -> String {
    match channel {
        Channel::Sms => message(text),
        _ => say(text, language),
    }
}

/// Canned replies for failures that still owe the caller an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// AI backend unreachable after retries.
    Unavailable,
    /// Rate limited.
    Busy,
    /// No usable text in the request.
    NotUnderstood,
    /// Unexpected fault.
    Internal,
}

impl Notice {
    #[must_use]
    pub fn text(self, channel: Channel, language: Language) -> &'static str {
        use {Language::*, Notice::*};

        match (self, channel, language) {
            (Unavailable, Channel::Telephone, English) => {
                "I'm having trouble connecting right now. Please call back later."
            },
            (Unavailable, Channel::Telephone, Spanish) => {
                "Tengo problemas para conectarme en este momento. Por favor llame más tarde."
            },
            (Unavailable, Channel::Sms, English) => {
                "Sorry, I'm having trouble right now. Please call us and we'll help you directly."
            },
            (Unavailable, Channel::Sms, Spanish) => {
                "Lo siento, tengo problemas en este momento. Llámenos y le ayudaremos directamente."
            },
            (Unavailable, ..) => {
                "I'm having trouble connecting to the AI model. Please try again in a moment."
            },
            (Busy, _, English) => {
                "You're sending messages faster than I can answer. Please wait a moment."
            },
            (Busy, _, Spanish) => "Está enviando mensajes muy rápido. Por favor espere un momento.",
            (NotUnderstood, _, English) => "Sorry, I didn't catch that. Please try again.",
            (NotUnderstood, _, Spanish) => "Lo siento, no le entendí. Por favor intente de nuevo.",
            (Internal, _, English) => "Something went wrong on our side. Please try again later.",
            (Internal, _, Spanish) => "Algo salió mal. Por favor intente más tarde.",
        }
    }
}
