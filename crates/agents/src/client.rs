//! Bounded-retry adapter in front of an [`LlmProvider`].

use std::{sync::Arc, time::Duration};

use {
    nexza_config::AiConfig,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    model::{ChatMessage, CompletionResponse, LlmProvider},
    providers::{OpenAiCompatProvider, ProviderError},
    retry::RetryPolicy,
};

/// How a single failed attempt should be treated.
#[derive(Debug)]
struct AttemptFailure {
    transient: bool,
    retry_after: Option<Duration>,
    message: String,
}

impl AttemptFailure {
    fn from_provider(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<ProviderError>() {
            Some(provider_err) => Self {
                transient: provider_err.is_transient(),
                retry_after: provider_err.retry_after(),
                message: provider_err.to_string(),
            },
            None => Self {
                transient: is_transient_message(&err.to_string()),
                retry_after: None,
                message: err.to_string(),
            },
        }
    }

    fn timed_out(after: Duration) -> Self {
        Self {
            transient: true,
            retry_after: None,
            message: format!("timed out after {}ms", after.as_millis()),
        }
    }
}

/// Fallback for providers that do not return [`ProviderError`].
fn is_transient_message(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    [
        "timeout",
        "timed out",
        "connection",
        "connect",
        "429",
        "rate limit",
        "500",
        "502",
        "503",
        "504",
        "overloaded",
        "unavailable",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}

pub struct AiClient {
    provider: Arc<dyn LlmProvider>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
}

impl AiClient {
    #[must_use]
    pub fn new(provider: Arc<dyn LlmProvider>, policy: RetryPolicy, attempt_timeout: Duration) -> Self {
        Self {
            provider,
            policy,
            attempt_timeout,
        }
    }

    /// Client for the configured OpenAI-compatible backend.
    pub fn from_config(config: &AiConfig) -> anyhow::Result<Self> {
        let provider = OpenAiCompatProvider::from_config(config)?;
        let policy = RetryPolicy::new(
            config.max_attempts,
            Duration::from_millis(config.base_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        );
        Ok(Self::new(
            Arc::new(provider),
            policy,
            Duration::from_secs(config.timeout_secs),
        ))
    }

    #[must_use]
    pub fn model(&self) -> &str {
        self.provider.id()
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.provider.endpoint()
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run one completion with the retry policy.
    ///
    /// A successful response is returned as-is even when its text is empty;
    /// only failed attempts are retried.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<CompletionResponse> {
        let max_attempts = self.policy.max_attempts;
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            let started = std::time::Instant::now();
            let outcome =
                tokio::time::timeout(self.attempt_timeout, self.provider.complete(messages)).await;

            let failure = match outcome {
                Ok(Ok(resp)) => {
                    debug!(
                        provider = self.provider.name(),
                        model = self.provider.id(),
                        attempt = attempt + 1,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        output_tokens = resp.usage.output_tokens,
                        "completion succeeded"
                    );
                    return Ok(resp);
                },
                Ok(Err(err)) => AttemptFailure::from_provider(&err),
                Err(_) => AttemptFailure::timed_out(self.attempt_timeout),
            };

            if !failure.transient {
                warn!(
                    provider = self.provider.name(),
                    attempt = attempt + 1,
                    error = %failure.message,
                    "completion failed permanently"
                );
                return Err(Error::Rejected(failure.message));
            }

            last_error = failure.message;
            if attempt + 1 < max_attempts {
                let delay = self.policy.delay_with_hint(attempt, failure.retry_after);
                warn!(
                    provider = self.provider.name(),
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "completion failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        info!(
            provider = self.provider.name(),
            attempts = max_attempts,
            error = %last_error,
            "AI backend unavailable"
        );
        Err(Error::Unavailable {
            attempts: max_attempts,
            last_error,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            Mutex,
            atomic::{AtomicU32, Ordering},
        },
    };

    use {super::*, async_trait::async_trait};

    enum Step {
        Reply(Option<&'static str>),
        Fail(ProviderError),
        Hang,
    }

    /// Provider that plays back a fixed script, one step per call.
    struct Scripted {
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn id(&self) -> &str {
            "scripted-model"
        }

        async fn complete(&self, _: &[ChatMessage]) -> anyhow::Result<CompletionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Reply(text)) => Ok(CompletionResponse {
                    text: text.map(str::to_string),
                    ..Default::default()
                }),
                Some(Step::Fail(err)) => Err(err.into()),
                Some(Step::Hang) => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(CompletionResponse::text("late"))
                },
                None => anyhow::bail!("script exhausted"),
            }
        }
    }

    fn client(provider: Arc<Scripted>, attempts: u32) -> AiClient {
        AiClient::new(
            provider,
            RetryPolicy::immediate(attempts),
            Duration::from_millis(100),
        )
    }

    fn http(status: u16) -> ProviderError {
        ProviderError::Http {
            status,
            body: String::new(),
            retry_after: None,
        }
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let provider = Scripted::new(vec![
            Step::Fail(ProviderError::Connect("refused".into())),
            Step::Fail(http(503)),
            Step::Reply(Some("hello")),
        ]);
        let resp = client(provider.clone(), 3)
            .complete(&[ChatMessage::user("hi")])
            .await
            .unwrap();
        assert_eq!(resp.text.as_deref(), Some("hello"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_is_unavailable() {
        let provider = Scripted::new(vec![
            Step::Fail(ProviderError::Timeout),
            Step::Fail(ProviderError::Timeout),
            Step::Fail(ProviderError::Timeout),
        ]);
        let err = client(provider.clone(), 3)
            .complete(&[ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unavailable { attempts: 3, .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let provider = Scripted::new(vec![Step::Fail(http(401)), Step::Reply(Some("nope"))]);
        let err = client(provider.clone(), 3)
            .complete(&[ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rejected(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_response_is_passed_through() {
        let provider = Scripted::new(vec![Step::Reply(None), Step::Reply(Some("second"))]);
        let resp = client(provider.clone(), 3)
            .complete(&[ChatMessage::user("hi")])
            .await
            .unwrap();
        assert!(resp.text.is_none());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_attempts_time_out_and_retry() {
        let provider = Scripted::new(vec![Step::Hang, Step::Reply(Some("fast"))]);
        let resp = client(provider.clone(), 2)
            .complete(&[ChatMessage::user("hi")])
            .await
            .unwrap();
        assert_eq!(resp.text.as_deref(), Some("fast"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn untyped_errors_classified_by_message() {
        assert!(is_transient_message("upstream returned 503"));
        assert!(is_transient_message("Connection reset by peer"));
        assert!(!is_transient_message("invalid api key"));
    }
}
