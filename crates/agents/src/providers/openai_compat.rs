//! OpenAI-compatible Chat Completions over HTTP (LM Studio, vLLM, llama.cpp
//! server, hosted OpenAI-style APIs).

use std::time::Duration;

use {
    async_trait::async_trait,
    nexza_config::AiConfig,
    secrecy::{ExposeSecret, Secret},
    tracing::{debug, trace, warn},
};

use {
    super::{ProviderError, retry_after_from_headers},
    crate::model::{ChatMessage, CompletionResponse, LlmProvider, Usage},
};

pub struct OpenAiCompatProvider {
    base_url: String,
    model: String,
    api_key: Option<Secret<String>>,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// `base_url` is the API root, e.g. `http://localhost:1234/v1`.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<Secret<String>>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            temperature: 0.7,
            max_tokens: 800,
            client,
        })
    }

    /// Provider for the configured AI backend.
    pub fn from_config(config: &AiConfig) -> anyhow::Result<Self> {
        Ok(Self::new(
            &config.base_url,
            &config.model,
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )?
        .with_sampling(config.temperature, config.max_tokens))
    }

    #[must_use]
    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    fn request_body(&self, messages: &[ChatMessage]) -> serde_json::Value {
        let messages: Vec<serde_json::Value> =
            messages.iter().map(ChatMessage::to_openai_value).collect();
        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": false,
        })
    }

    async fn send(&self, messages: &[ChatMessage]) -> Result<CompletionResponse, ProviderError> {
        let body = self.request_body(messages);
        debug!(
            model = %self.model,
            messages_count = messages.len(),
            "chat completion request"
        );

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("content-type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let http_resp = request.send().await?;
        let status = http_resp.status();
        if !status.is_success() {
            let retry_after = retry_after_from_headers(http_resp.headers());
            let body = http_resp.text().await.unwrap_or_default();
            warn!(status = %status, model = %self.model, "completion API error");
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
                retry_after,
            });
        }

        let resp = http_resp.json::<serde_json::Value>().await?;
        trace!(response = %resp, "raw completion response");
        parse_completion(&resp)
    }
}

/// Pull the first choice out of a Chat Completions payload.
///
/// A missing `choices` array is malformed; a present choice with null or
/// empty content is a valid but empty completion.
pub(crate) fn parse_completion(
    resp: &serde_json::Value,
) -> Result<CompletionResponse, ProviderError> {
    let Some(choice) = resp["choices"].as_array().and_then(|c| c.first()) else {
        return Err(ProviderError::Decode("response has no choices".into()));
    };

    let text = choice["message"]["content"]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let usage = Usage {
        input_tokens: resp["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: resp["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
    };

    Ok(CompletionResponse { text, usage })
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compat"
    }

    fn id(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn complete(&self, messages: &[ChatMessage]) -> anyhow::Result<CompletionResponse> {
        Ok(self.send(messages).await?)
    }
}
