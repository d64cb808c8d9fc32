use std::{sync::Arc, time::Duration};

use {
    dashmap::{DashMap, mapref::entry::Entry},
    nexza_common::{Channel, now_ms},
    tokio::sync::{Mutex, OwnedMutexGuard},
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    key::SessionKey,
    session::{Session, SessionSnapshot, Turn},
};

/// Bounds applied by the store.
#[derive(Debug, Clone, Copy)]
pub struct StoreLimits {
    pub max_turns: usize,
    pub idle_timeout: Duration,
    pub max_sessions: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_turns: 50,
            idle_timeout: Duration::from_secs(30 * 60),
            max_sessions: 10_000,
        }
    }
}

/// Session-keyed map of owned sessions, each behind its own async mutex.
///
/// The map itself is only locked (per shard) for lookups and inserts; no
/// map-wide lock is held while a session is locked, so slow AI calls on one
/// session never block another.
pub struct SessionStore {
    sessions: DashMap<SessionKey, Arc<Mutex<Session>>>,
    limits: StoreLimits,
}

/// A reference to one session. Holding it pins the session: eviction skips
/// sessions with outstanding handles.
#[derive(Clone)]
pub struct SessionHandle {
    key: SessionKey,
    inner: Arc<Mutex<Session>>,
    max_turns: usize,
}

/// Exclusive access to one session for the duration of a request.
///
/// Dropping the guard releases the session on every exit path, including
/// cancellation of the surrounding future.
pub struct SessionGuard {
    session: OwnedMutexGuard<Session>,
    max_turns: usize,
}

impl SessionStore {
    #[must_use]
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            sessions: DashMap::new(),
            limits: StoreLimits {
                max_turns: limits.max_turns.max(1),
                ..limits
            },
        }
    }

    #[must_use]
    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    /// Return the existing session for `key`, or create it with
    /// `default_persona`.
    pub fn get_or_create(
        &self,
        key: &SessionKey,
        channel: Channel,
        default_persona: &str,
    ) -> SessionHandle {
        self.get_or_create_at(key, channel, default_persona, now_ms())
    }

    pub fn get_or_create_at(
        &self,
        key: &SessionKey,
        channel: Channel,
        default_persona: &str,
        now: u64,
    ) -> SessionHandle {
        if let Some(existing) = self.sessions.get(key) {
            return self.handle(key, Arc::clone(existing.value()));
        }

        // Make room before taking the entry lock: scanning the map while
        // holding a shard write guard would deadlock.
        if self.sessions.len() >= self.limits.max_sessions {
            self.evict_least_recent();
        }

        let inner = match self.sessions.entry(key.clone()) {
            Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            Entry::Vacant(vacant) => {
                debug!(session = %key, channel = %channel, persona = default_persona, "creating session");
                let session = Session::new(key.clone(), channel, default_persona, now);
                Arc::clone(vacant.insert(Arc::new(Mutex::new(session))).value())
            },
        };
        self.handle(key, inner)
    }

    fn handle(&self, key: &SessionKey, inner: Arc<Mutex<Session>>) -> SessionHandle {
        SessionHandle {
            key: key.clone(),
            inner,
            max_turns: self.limits.max_turns,
        }
    }

    /// Append one turn to an existing session, trimming to `max_turns`.
    ///
    /// Waits for the session lock, so concurrent appends on the same key are
    /// serialized in arrival order.
    pub async fn append_turn(&self, key: &SessionKey, turn: Turn) -> Result<usize> {
        let handle = self
            .sessions
            .get(key)
            .map(|entry| self.handle(key, Arc::clone(entry.value())))
            .ok_or_else(|| Error::NotFound { key: key.clone() })?;
        let mut guard = handle.lock().await;
        guard.append(turn);
        Ok(guard.session().len())
    }

    /// Copy of the session's current state, waiting for any in-flight
    /// request on it to finish.
    pub async fn snapshot(&self, key: &SessionKey) -> Option<SessionSnapshot> {
        let inner = self.sessions.get(key).map(|e| Arc::clone(e.value()))?;
        let session = inner.lock().await;
        Some(session.snapshot())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove sessions idle for longer than the configured timeout.
    ///
    /// Sessions that are locked or have outstanding handles are in use and
    /// are kept regardless of their timestamps. Returns the number removed.
    pub fn evict_idle(&self, now: u64) -> usize {
        let idle_ms = u64::try_from(self.limits.idle_timeout.as_millis()).unwrap_or(u64::MAX);
        let before = self.sessions.len();
        self.sessions.retain(|_, inner| {
            if Arc::strong_count(inner) > 1 {
                return true;
            }
            match inner.try_lock() {
                Ok(session) => now.saturating_sub(session.last_active_at()) <= idle_ms,
                Err(_) => true,
            }
        });
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            info!(evicted, remaining = self.sessions.len(), "evicted idle sessions");
        }
        evicted
    }

    /// Drop the least recently active session that is not in use.
    fn evict_least_recent(&self) {
        let candidate = self
            .sessions
            .iter()
            .filter(|entry| Arc::strong_count(entry.value()) == 1)
            .filter_map(|entry| {
                let last_active = entry.value().try_lock().ok()?.last_active_at();
                Some((entry.key().clone(), last_active))
            })
            .min_by_key(|(_, last_active)| *last_active);

        match candidate {
            Some((key, _)) => {
                if self
                    .sessions
                    .remove_if(&key, |_, inner| Arc::strong_count(inner) == 1)
                    .is_some()
                {
                    debug!(session = %key, "evicted least recently active session at capacity");
                }
            },
            None => warn!(
                sessions = self.sessions.len(),
                max = self.limits.max_sessions,
                "session capacity reached and every session is in use"
            ),
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(StoreLimits::default())
    }
}

impl SessionHandle {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Wait for exclusive access. Waiters are served in arrival order.
    pub async fn lock(&self) -> SessionGuard {
        SessionGuard {
            session: Arc::clone(&self.inner).lock_owned().await,
            max_turns: self.max_turns,
        }
    }
}

impl SessionGuard {
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The most recent `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Turn> {
        let skip = self.session.len().saturating_sub(n);
        self.session.history().skip(skip).cloned().collect()
    }

    pub fn append(&mut self, turn: Turn) {
        self.session.push_bounded(turn, self.max_turns);
    }

    /// Append a user turn and its reply as one step, so a cancelled request
    /// can never leave half an exchange behind.
    pub fn append_exchange(&mut self, user: Turn, assistant: Turn) {
        self.session.push_bounded(user, self.max_turns);
        self.session.push_bounded(assistant, self.max_turns);
    }

    pub fn set_persona(&mut self, persona: &str) {
        self.session.set_persona(persona);
    }

    pub fn touch(&mut self) {
        self.session.touch(now_ms());
    }
}
