//! Named system prompts and the rule for picking one per request.

use std::collections::HashMap;

use {
    nexza_channels::{ChannelProfile, markup::Language},
    nexza_config::PersonaConfig,
    tracing::{debug, warn},
};

const NEXZA_ASSISTANT: &str = "## Persona: NEXZA Assistant
You are NEXZA, a professional and efficient AI assistant. Answer the user's questions clearly and concisely and stay on topic. Maintain a helpful, friendly, and professional tone.";

const ADMIN_MODE: &str = "## Persona: NEXZA (Admin Mode)
You are the technical console for the NEXZA AI system. Provide detailed, factual, and technical information about the system's state. Do not use conversational filler. Be precise and direct.";

const PHONE_AGENT: &str = "## Persona: NEXZA Phone Agent
You are a friendly and helpful assistant speaking over the phone. Your tone should be conversational, warm, and clear. Avoid jargon. Keep your answers relatively short and easy to understand.";

const DISCORD_HELPER: &str = "## Persona: NEXZA Discord Helper
You are a bot in a Discord server. Be concise and direct. Get straight to the point.";

const RESTAURANT_INFO: &str = "## Persona: Taqueria Mexicano Grill Host
You are a friendly and welcoming virtual host for \"Taqueria Mexicano Grill\".
- Location: 123 Fiesta Lane, Arlington, TX
- Hours: 11:00 AM - 10:00 PM, Tuesday to Sunday. Closed on Mondays.
- Specialty: Tacos al Pastor.
- Reservations: You can take reservations but must state they are not confirmed until a human calls back.
Stay in character. If a user asks about something unrelated, politely steer them back to the restaurant.";

const DEALERSHIP_AGENT: &str = "You are a friendly and efficient assistant for a car dealership. \
Your goal is to answer questions and capture leads. Keep your voice responses short and to the point. \
If the user is interested, ask for their name and phone number to schedule a test drive. \
Always be polite and professional.";

const DEALERSHIP_AGENT_ES: &str = "Eres un asistente amigable y eficiente para un concesionario de autos. \
Tu objetivo es responder preguntas y capturar clientes potenciales. Mantén tus respuestas de voz cortas y al grano. \
Si el usuario está interesado, pide su nombre y número de teléfono para agendar una prueba de manejo. \
Sé siempre cortés y profesional.";

/// A named system prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    /// Canonical upper-case identifier.
    pub id: String,
    pub prompt: String,
    /// Spanish prompt, when the persona has one.
    pub prompt_es: Option<String>,
    /// Only selectable from trusted channels.
    pub elevated: bool,
}

impl Persona {
    fn builtin(id: &str, prompt: &str, elevated: bool) -> Self {
        Self {
            id: id.to_string(),
            prompt: prompt.to_string(),
            prompt_es: None,
            elevated,
        }
    }

    #[must_use]
    pub fn prompt_for(&self, language: Language) -> &str {
        match (language, &self.prompt_es) {
            (Language::Spanish, Some(es)) => es,
            _ => &self.prompt,
        }
    }
}

/// All personas known to this process, keyed by canonical id.
#[derive(Debug, Clone)]
pub struct PersonaCatalog {
    personas: HashMap<String, Persona>,
}

impl Default for PersonaCatalog {
    fn default() -> Self {
        let mut dealership = Persona::builtin("DEALERSHIP_AGENT", DEALERSHIP_AGENT, false);
        dealership.prompt_es = Some(DEALERSHIP_AGENT_ES.to_string());

        let personas = [
            Persona::builtin("NEXZA_ASSISTANT", NEXZA_ASSISTANT, false),
            Persona::builtin("ADMIN_MODE", ADMIN_MODE, true),
            Persona::builtin("PHONE_AGENT", PHONE_AGENT, false),
            Persona::builtin("DISCORD_HELPER", DISCORD_HELPER, false),
            Persona::builtin("RESTAURANT_INFO", RESTAURANT_INFO, false),
            dealership,
        ]
        .into_iter()
        .map(|p| (p.id.clone(), p))
        .collect();

        Self { personas }
    }
}

impl PersonaCatalog {
    /// Built-ins with config entries layered on top. An entry for an existing
    /// id replaces only the fields it sets; an unknown id adds a persona.
    #[must_use]
    pub fn with_overrides<'a>(
        overrides: impl IntoIterator<Item = (&'a String, &'a PersonaConfig)>,
    ) -> Self {
        let mut catalog = Self::default();
        for (raw_id, cfg) in overrides {
            let id = canonical(raw_id);
            if id.is_empty() {
                continue;
            }
            match catalog.personas.get_mut(&id) {
                Some(existing) => {
                    if let Some(prompt) = &cfg.prompt {
                        existing.prompt = prompt.clone();
                        existing.prompt_es = None;
                    }
                    if let Some(elevated) = cfg.elevated {
                        existing.elevated = elevated;
                    }
                },
                None => {
                    let Some(prompt) = &cfg.prompt else {
                        warn!(persona = %id, "persona without a prompt ignored");
                        continue;
                    };
                    catalog.personas.insert(
                        id.clone(),
                        Persona {
                            id,
                            prompt: prompt.clone(),
                            prompt_es: None,
                            elevated: cfg.elevated.unwrap_or(false),
                        },
                    );
                },
            }
        }
        catalog
    }

    /// Case-insensitive lookup.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Persona> {
        self.personas.get(&canonical(id))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.personas.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.personas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    /// Persona for a request: the explicit override when it exists and the
    /// channel may use it, the channel default otherwise.
    ///
    /// An elevated persona is never granted to an untrusted channel, no matter
    /// what the request asks for.
    #[must_use]
    pub fn select(&self, profile: &ChannelProfile, explicit: Option<&str>) -> &Persona {
        if let Some(requested) = explicit.map(str::trim).filter(|s| !s.is_empty()) {
            match self.get(requested) {
                Some(persona) if persona.elevated && !profile.trusted() => {
                    warn!(
                        channel = %profile.channel,
                        persona = %persona.id,
                        "elevated persona refused for untrusted channel"
                    );
                },
                Some(persona) => return persona,
                None => {
                    debug!(channel = %profile.channel, requested, "unknown persona, using default");
                },
            }
        }
        self.default_for(profile)
    }

    fn default_for(&self, profile: &ChannelProfile) -> &Persona {
        self.get(profile.default_persona)
            .or_else(|| self.get("NEXZA_ASSISTANT"))
            .unwrap_or(&*FALLBACK)
    }
}

/// Used only if config removed every default, which `with_overrides` cannot do.
static FALLBACK: std::sync::LazyLock<Persona> =
    std::sync::LazyLock::new(|| Persona::builtin("NEXZA_ASSISTANT", NEXZA_ASSISTANT, false));

fn canonical(id: &str) -> String {
    id.trim().to_ascii_uppercase()
}
