//! Request lifecycle as an explicit state machine.
//!
//! ```text
//! Received → Authenticated → Normalized → RateChecked → HistoryLoaded
//!          → AIQueried → Sanitized → Responded
//! ```
//!
//! Any gate may move the dispatch to `Failed(kind)`; once failed, no later
//! gate runs. The session lock is taken at `HistoryLoaded` and held through
//! the append, so turns for one session land in submission order. Dropping
//! the dispatch future (client disconnect) releases the lock without
//! appending anything.

use std::{fmt, time::Instant};

use {
    nexza_agents::{
        Persona,
        prompt::{build_messages, build_summary_messages},
        sanitize::sanitize,
    },
    nexza_channels::{
        ChannelProfile, Request,
        markup::{Language, Notice, detect_language},
        normalize::PlatformAction,
        profile::profile,
    },
    nexza_common::Channel,
    nexza_sessions::{SessionGuard, SessionKey, Turn},
    tracing::{debug, error, info, warn},
};

use crate::{
    auth::{Authenticator, Proof},
    error::{FailureKind, RelayError},
    rate_limit::RateDecision,
    state::GatewayState,
};

/// Where a dispatch currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Authenticated,
    Normalized,
    RateChecked,
    HistoryLoaded,
    AIQueried,
    Sanitized,
    Responded,
    Failed(FailureKind),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => f.write_str("received"),
            Self::Authenticated => f.write_str("authenticated"),
            Self::Normalized => f.write_str("normalized"),
            Self::RateChecked => f.write_str("rate_checked"),
            Self::HistoryLoaded => f.write_str("history_loaded"),
            Self::AIQueried => f.write_str("ai_queried"),
            Self::Sanitized => f.write_str("sanitized"),
            Self::Responded => f.write_str("responded"),
            Self::Failed(kind) => write!(f, "failed({})", kind.as_str()),
        }
    }
}

/// What to do with a normalized request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// AI round trip; the exchange is appended to history.
    Converse,
    /// Record the text as a note, no AI call.
    Note,
    /// Record a task for `assignee`, no AI call.
    Assign { assignee: String },
    /// Summarise the last `limit` turns; nothing is appended.
    Summarize { limit: usize },
}

impl From<PlatformAction> for Action {
    fn from(action: PlatformAction) -> Self {
        match action {
            PlatformAction::Ask => Self::Converse,
            PlatformAction::Note => Self::Note,
            PlatformAction::Assign { assignee } => Self::Assign { assignee },
            PlatformAction::Summary { limit } => Self::Summarize { limit },
        }
    }
}

/// A finished dispatch, ready for channel rendering.
#[derive(Debug, Clone)]
pub struct Reply {
    pub channel: Channel,
    pub text: String,
    pub session_key: SessionKey,
    pub persona: String,
    pub language: Language,
    pub meta: Option<serde_json::Value>,
    /// The text is an apology because the AI backend failed.
    pub degraded: bool,
}

/// Context known once the request is normalized; used to turn an AI failure
/// into a well-formed apology.
struct Normalized {
    session_key: SessionKey,
    language: Language,
    persona: String,
}

pub struct Dispatcher<'a> {
    state: &'a GatewayState,
    channel: Channel,
    stage: Stage,
    started: Instant,
    normalized: Option<Normalized>,
}

impl<'a> Dispatcher<'a> {
    #[must_use]
    pub fn new(state: &'a GatewayState, channel: Channel) -> Self {
        Self {
            state,
            channel,
            stage: Stage::Received,
            started: Instant::now(),
            normalized: None,
        }
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Drive a request from `Received` to `Responded` or `Failed`.
    ///
    /// `normalize` runs only after `proof` is accepted, so a rejected request
    /// is never parsed past what authentication needed.
    pub async fn run<F>(&mut self, proof: Proof<'_>, normalize: F) -> Result<Reply, RelayError>
    where
        F: FnOnce() -> Result<(Request, Action), nexza_channels::Error>,
    {
        if self.stage != Stage::Received {
            return Err(RelayError::internal(format!(
                "dispatch re-entered at stage {}",
                self.stage
            )));
        }

        self.state.metrics.record_request();
        match self.drive(proof, normalize).await {
            Ok(reply) => {
                self.advance(Stage::Responded);
                self.state.metrics.record_chat();
                info!(
                    channel = %self.channel,
                    session = %reply.session_key,
                    persona = %reply.persona,
                    reply_chars = reply.text.chars().count(),
                    elapsed_ms = self.started.elapsed().as_millis() as u64,
                    "request handled"
                );
                Ok(reply)
            },
            Err(err) => {
                let kind = err.kind();
                self.advance(Stage::Failed(kind));
                self.state
                    .metrics
                    .record_error(kind, crate::now_rfc3339());
                self.fail(err)
            },
        }
    }

    fn advance(&mut self, next: Stage) {
        debug!(channel = %self.channel, from = %self.stage, to = %next, "dispatch stage");
        self.stage = next;
    }

    /// Log a failure and, for AI failures after normalization, substitute the
    /// channel's apology so the caller still gets a well-formed reply.
    fn fail(&self, err: RelayError) -> Result<Reply, RelayError> {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        if matches!(err, RelayError::ServiceUnavailable)
            && let Some(ctx) = &self.normalized
        {
            warn!(
                channel = %self.channel,
                session = %ctx.session_key,
                elapsed_ms,
                "AI backend unavailable, replying with apology"
            );
            return Ok(Reply {
                channel: self.channel,
                text: Notice::Unavailable
                    .text(self.channel, ctx.language)
                    .to_string(),
                session_key: ctx.session_key.clone(),
                persona: ctx.persona.clone(),
                language: ctx.language,
                meta: None,
                degraded: true,
            });
        }

        match &err {
            RelayError::InternalError(detail) => {
                error!(channel = %self.channel, elapsed_ms, detail = %detail, "request failed");
            },
            // Already logged with the rejection reason.
            RelayError::Unauthorized => {},
            _ => {
                info!(
                    channel = %self.channel,
                    kind = err.kind().as_str(),
                    elapsed_ms,
                    error = %err,
                    "request refused"
                );
            },
        }
        Err(err)
    }

    async fn drive<F>(&mut self, proof: Proof<'_>, normalize: F) -> Result<Reply, RelayError>
    where
        F: FnOnce() -> Result<(Request, Action), nexza_channels::Error>,
    {
        Authenticator::new(&self.state.credentials).authenticate(self.channel, &proof)?;
        self.advance(Stage::Authenticated);

        let (request, action) = normalize()?;
        // A route may narrow its declared channel (tooling bodies on the chat
        // platform endpoint), but never to one with a different auth rule.
        if profile(request.channel).auth != profile(self.channel).auth {
            return Err(RelayError::internal(format!(
                "normalizer produced {} for a {} request",
                request.channel, self.channel
            )));
        }
        self.channel = request.channel;
        let channel_profile = profile(request.channel);
        let language = if channel_profile.uses_markup() {
            detect_language(&request.text)
        } else {
            Language::English
        };
        let state = self.state;
        let persona = state
            .personas
            .select(channel_profile, request.explicit_persona.as_deref());
        self.normalized = Some(Normalized {
            session_key: request.session_key.clone(),
            language,
            persona: persona.id.clone(),
        });
        debug!(
            channel = %request.channel,
            session = %request.session_key,
            meta = %request.metadata.masked(),
            "request normalized"
        );
        self.advance(Stage::Normalized);

        if let RateDecision::Denied { retry_after } =
            state.rate_limiter.try_acquire(&request.session_key)
        {
            return Err(RelayError::RateLimited { retry_after });
        }
        self.advance(Stage::RateChecked);

        let handle = state.sessions.get_or_create(
            &request.session_key,
            request.channel,
            channel_profile.default_persona,
        );
        let mut guard = handle.lock().await;
        self.advance(Stage::HistoryLoaded);

        match action {
            Action::Converse => {
                self.converse(&mut guard, channel_profile, persona, &request, language)
                    .await
            },
            Action::Summarize { limit } => {
                self.summarize(&mut guard, channel_profile, persona, &request, language, limit)
                    .await
            },
            Action::Note => {
                guard.append(Turn::user(format!("[note] {}", request.text)));
                Ok(self.plain_reply(&guard, &request, language, "Saved.".into(), None))
            },
            Action::Assign { assignee } => {
                guard.append(Turn::user(format!(
                    "[task for {assignee}] {}",
                    request.text
                )));
                let text = format!("Task for {assignee}: {}", request.text);
                let meta = serde_json::json!({ "assignee": assignee });
                Ok(self.plain_reply(&guard, &request, language, text, Some(meta)))
            },
        }
    }

    async fn converse(
        &mut self,
        guard: &mut SessionGuard,
        channel_profile: &ChannelProfile,
        persona: &Persona,
        request: &Request,
        language: Language,
    ) -> Result<Reply, RelayError> {
        let messages = build_messages(
            persona,
            channel_profile,
            language,
            guard.session().history(),
            &request.text,
        );

        let completion = self.state.ai.complete(&messages).await.map_err(|err| {
            warn!(channel = %request.channel, session = %request.session_key, error = %err, "completion failed");
            RelayError::ServiceUnavailable
        })?;
        self.advance(Stage::AIQueried);

        let text = sanitize(
            completion.text.as_deref().unwrap_or_default(),
            channel_profile.max_reply_chars,
        );
        self.advance(Stage::Sanitized);
        if text.is_empty() {
            warn!(session = %request.session_key, "completion empty after sanitizing");
            return Err(RelayError::ServiceUnavailable);
        }

        guard.append_exchange(Turn::user(&request.text), Turn::assistant(&text));
        guard.set_persona(&persona.id);

        Ok(Reply {
            channel: request.channel,
            text,
            session_key: request.session_key.clone(),
            persona: persona.id.clone(),
            language,
            meta: None,
            degraded: false,
        })
    }

    async fn summarize(
        &mut self,
        guard: &mut SessionGuard,
        channel_profile: &ChannelProfile,
        persona: &Persona,
        request: &Request,
        language: Language,
        limit: usize,
    ) -> Result<Reply, RelayError> {
        let turns = guard.recent(limit);
        let messages = build_summary_messages(persona, &turns);

        let completion = self.state.ai.complete(&messages).await.map_err(|err| {
            warn!(session = %request.session_key, error = %err, "summary completion failed");
            RelayError::ServiceUnavailable
        })?;
        self.advance(Stage::AIQueried);

        let text = sanitize(
            completion.text.as_deref().unwrap_or_default(),
            channel_profile.max_reply_chars,
        );
        self.advance(Stage::Sanitized);
        if text.is_empty() {
            return Err(RelayError::ServiceUnavailable);
        }
        guard.touch();

        Ok(Reply {
            channel: request.channel,
            text,
            session_key: request.session_key.clone(),
            persona: persona.id.clone(),
            language,
            meta: Some(serde_json::json!({ "turns": turns.len() })),
            degraded: false,
        })
    }

    fn plain_reply(
        &self,
        guard: &SessionGuard,
        request: &Request,
        language: Language,
        text: String,
        meta: Option<serde_json::Value>,
    ) -> Reply {
        Reply {
            channel: request.channel,
            text,
            session_key: request.session_key.clone(),
            persona: guard.session().persona().to_string(),
            language,
            meta,
            degraded: false,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        nexza_agents::{AiClient, ChatMessage, CompletionResponse, LlmProvider, RetryPolicy},
        nexza_channels::request::ChannelMetadata,
        nexza_config::NexzaConfig,
        std::{
            sync::{
                Arc,
                atomic::{AtomicUsize, Ordering},
            },
            time::Duration,
        },
    };

    struct Fixed {
        reply: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl LlmProvider for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn id(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, _: &[ChatMessage]) -> anyhow::Result<CompletionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CompletionResponse::text(self.reply))
        }
    }

    fn state(reply: &'static str) -> (GatewayState, Arc<Fixed>) {
        let provider = Arc::new(Fixed {
            reply,
            calls: AtomicUsize::new(0),
        });
        let ai = AiClient::new(provider.clone(), RetryPolicy::immediate(1), Duration::from_secs(1));
        (GatewayState::new(&NexzaConfig::default(), ai), provider)
    }

    fn app_request(session: &str, text: &str) -> Request {
        Request {
            channel: Channel::MobileApp,
            session_key: SessionKey::device(session),
            text: text.into(),
            explicit_persona: None,
            metadata: ChannelMetadata::Device {
                session_id: session.into(),
            },
        }
    }

    #[tokio::test]
    async fn converse_reaches_responded() {
        let (state, provider) = state("Sure, here you go.");
        let mut dispatcher = Dispatcher::new(&state, Channel::MobileApp);
        let reply = dispatcher
            .run(Proof::SelfReported { session_id: Some("s1") }, || {
                Ok((app_request("s1", "help"), Action::Converse))
            })
            .await
            .unwrap();
        assert_eq!(dispatcher.stage(), Stage::Responded);
        assert_eq!(reply.text, "Sure, here you go.");
        assert_eq!(reply.persona, "NEXZA_ASSISTANT");
        assert!(!reply.degraded);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        // A dispatcher drives exactly one request.
        let again = dispatcher
            .run(Proof::SelfReported { session_id: Some("s1") }, || {
                Ok((app_request("s1", "help"), Action::Converse))
            })
            .await;
        assert!(matches!(again, Err(RelayError::InternalError(_))));
    }

    #[tokio::test]
    async fn empty_sanitized_reply_degrades_without_touching_history() {
        let (state, _) = state("<think>only thinking</think>");
        let mut dispatcher = Dispatcher::new(&state, Channel::MobileApp);
        let reply = dispatcher
            .run(Proof::SelfReported { session_id: Some("s2") }, || {
                Ok((app_request("s2", "help"), Action::Converse))
            })
            .await
            .unwrap();
        assert!(reply.degraded);
        assert_eq!(
            dispatcher.stage(),
            Stage::Failed(FailureKind::ServiceUnavailable)
        );
        let snapshot = state.sessions.snapshot(&SessionKey::device("s2")).await.unwrap();
        assert!(snapshot.history.is_empty());
    }

    #[tokio::test]
    async fn rejected_proof_never_runs_the_normalizer() {
        let (state, _) = state("unused");
        let mut dispatcher = Dispatcher::new(&state, Channel::ChatPlatform);
        let mut normalized = false;
        let result = dispatcher
            .run(Proof::SharedSecret { header: Some("guess") }, || {
                normalized = true;
                Ok((app_request("s3", "hi"), Action::Converse))
            })
            .await;
        assert!(matches!(result, Err(RelayError::Unauthorized)));
        assert!(!normalized);
        assert_eq!(dispatcher.stage(), Stage::Failed(FailureKind::Unauthorized));
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn note_skips_the_model() {
        let (state, provider) = state("unused");
        let mut dispatcher = Dispatcher::new(&state, Channel::MobileApp);
        let reply = dispatcher
            .run(Proof::SelfReported { session_id: Some("s4") }, || {
                Ok((app_request("s4", "remember milk"), Action::Note))
            })
            .await
            .unwrap();
        assert_eq!(reply.text, "Saved.");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        let snapshot = state.sessions.snapshot(&SessionKey::device("s4")).await.unwrap();
        assert_eq!(snapshot.history[0].text, "[note] remember milk");
    }

    /// Never answers its first call; answers every later one.
    struct StallsOnce {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl LlmProvider for StallsOnce {
        fn name(&self) -> &str {
            "stalls-once"
        }

        fn id(&self) -> &str {
            "stalls-once"
        }

        async fn complete(&self, _: &[ChatMessage]) -> anyhow::Result<CompletionResponse> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                std::future::pending::<()>().await;
            }
            Ok(CompletionResponse::text("Back online."))
        }
    }

    #[tokio::test]
    async fn dropped_dispatch_releases_lock_without_appending() {
        let provider = Arc::new(StallsOnce {
            calls: AtomicUsize::new(0),
        });
        let ai = AiClient::new(provider.clone(), RetryPolicy::immediate(1), Duration::from_secs(60));
        let state = GatewayState::new(&NexzaConfig::default(), ai);
        let key = SessionKey::device("s5");

        let abandoned = tokio::time::timeout(Duration::from_millis(50), async {
            Dispatcher::new(&state, Channel::MobileApp)
                .run(Proof::SelfReported { session_id: Some("s5") }, || {
                    Ok((app_request("s5", "are you there"), Action::Converse))
                })
                .await
        })
        .await;
        assert!(abandoned.is_err());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let snapshot = tokio::time::timeout(Duration::from_secs(1), state.sessions.snapshot(&key))
            .await
            .expect("session lock was not released")
            .unwrap();
        assert!(snapshot.history.is_empty());

        let reply = tokio::time::timeout(
            Duration::from_secs(1),
            Dispatcher::new(&state, Channel::MobileApp).run(
                Proof::SelfReported { session_id: Some("s5") },
                || Ok((app_request("s5", "hello again"), Action::Converse)),
            ),
        )
        .await
        .expect("second dispatch stalled")
        .unwrap();
        assert_eq!(reply.text, "Back online.");
        let snapshot = state.sessions.snapshot(&key).await.unwrap();
        let texts: Vec<&str> = snapshot.history.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["hello again", "Back online."]);
    }

    #[tokio::test]
    async fn outcomes_are_counted() {
        let (state, _) = state("Fine.");
        Dispatcher::new(&state, Channel::MobileApp)
            .run(Proof::SelfReported { session_id: Some("s6") }, || {
                Ok((app_request("s6", "hi"), Action::Converse))
            })
            .await
            .unwrap();
        let refused = Dispatcher::new(&state, Channel::ChatPlatform)
            .run(Proof::SharedSecret { header: None }, || {
                Ok((app_request("s6", "hi"), Action::Converse))
            })
            .await;
        assert!(refused.is_err());

        let snap = state.metrics.snapshot(state.uptime());
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.total_chats, 1);
        assert_eq!(snap.total_errors, 1);
        assert_eq!(snap.last_error.unwrap().kind, "unauthorized");
    }

    #[tokio::test]
    async fn degraded_reply_counts_as_error() {
        let (state, _) = state("<think>nothing</think>");
        let reply = Dispatcher::new(&state, Channel::MobileApp)
            .run(Proof::SelfReported { session_id: Some("s7") }, || {
                Ok((app_request("s7", "hi"), Action::Converse))
            })
            .await
            .unwrap();
        assert!(reply.degraded);
        let snap = state.metrics.snapshot(state.uptime());
        assert_eq!((snap.total_chats, snap.total_errors), (0, 1));
        assert_eq!(snap.last_error.unwrap().kind, "service_unavailable");
    }

    #[test]
    fn platform_actions_map() {
        assert_eq!(Action::from(PlatformAction::Ask), Action::Converse);
        assert_eq!(
            Action::from(PlatformAction::Summary { limit: 7 }),
            Action::Summarize { limit: 7 }
        );
    }

    #[test]
    fn stage_display() {
        assert_eq!(Stage::HistoryLoaded.to_string(), "history_loaded");
        assert_eq!(
            Stage::Failed(FailureKind::RateLimited).to_string(),
            "failed(rate_limited)"
        );
    }
}
