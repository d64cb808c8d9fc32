use std::collections::VecDeque;

use {
    nexza_common::{Channel, Role, now_ms},
    serde::Serialize,
};

use crate::key::SessionKey;

/// One authored message. Never modified after it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl Turn {
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::at(Role::User, text, now_ms())
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::at(Role::Assistant, text, now_ms())
    }

    #[must_use]
    pub fn at(role: Role, text: impl Into<String>, timestamp: u64) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp,
        }
    }
}

/// Conversation state bound to one channel-derived identity.
///
/// History is only reachable read-only from outside the crate; the store's
/// guard is the single place that appends and trims.
#[derive(Debug)]
pub struct Session {
    id: SessionKey,
    channel: Channel,
    persona: String,
    history: VecDeque<Turn>,
    created_at: u64,
    last_active_at: u64,
}

impl Session {
    pub(crate) fn new(id: SessionKey, channel: Channel, persona: &str, now: u64) -> Self {
        Self {
            id,
            channel,
            persona: persona.to_string(),
            history: VecDeque::new(),
            created_at: now,
            last_active_at: now,
        }
    }

    pub fn id(&self) -> &SessionKey {
        &self.id
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Persona used for the most recent exchange (the channel default until
    /// an override is honoured).
    pub fn persona(&self) -> &str {
        &self.persona
    }

    /// Turns in insertion order, oldest first.
    pub fn history(&self) -> impl ExactSizeIterator<Item = &Turn> + DoubleEndedIterator {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn last_active_at(&self) -> u64 {
        self.last_active_at
    }

    /// Append and trim from the front until within `max_turns`.
    pub(crate) fn push_bounded(&mut self, turn: Turn, max_turns: usize) {
        self.last_active_at = self.last_active_at.max(turn.timestamp);
        self.history.push_back(turn);
        while self.history.len() > max_turns {
            self.history.pop_front();
        }
    }

    pub(crate) fn set_persona(&mut self, persona: &str) {
        if self.persona != persona {
            self.persona = persona.to_string();
        }
    }

    pub(crate) fn touch(&mut self, now: u64) {
        self.last_active_at = self.last_active_at.max(now);
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.as_str().to_string(),
            channel: self.channel,
            persona: self.persona.clone(),
            history: self.history.iter().cloned().collect(),
            created_at: self.created_at,
            last_active_at: self.last_active_at,
        }
    }
}

/// Owned copy of a session for diagnostics and tests.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub channel: Channel,
    pub persona: String,
    pub history: Vec<Turn>,
    pub created_at: u64,
    pub last_active_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(SessionKey::device("t"), Channel::MobileApp, "NEXZA_ASSISTANT", 1)
    }

    #[test]
    fn trims_oldest_first() {
        let mut s = session();
        for i in 0..7 {
            s.push_bounded(Turn::at(Role::User, format!("m{i}"), 10 + i), 3);
        }
        let texts: Vec<&str> = s.history().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["m4", "m5", "m6"]);
        assert_eq!(s.last_active_at(), 16);
    }

    #[test]
    fn touch_never_moves_backwards() {
        let mut s = session();
        s.touch(50);
        s.touch(20);
        assert_eq!(s.last_active_at(), 50);
        assert_eq!(s.created_at(), 1);
    }
}
