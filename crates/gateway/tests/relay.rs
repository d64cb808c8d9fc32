//! End-to-end tests: a real gateway on a loopback port, a scripted AI backend.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    nexza_agents::{AiClient, ChatMessage, CompletionResponse, LlmProvider, RetryPolicy},
    nexza_config::NexzaConfig,
    nexza_gateway::{auth::compute_signature, server::build_gateway_app, state::GatewayState},
    nexza_sessions::SessionKey,
    secrecy::Secret,
    serde_json::{Value, json},
    tokio::net::TcpListener,
};

const TWILIO_TOKEN: &str = "twilio-test-token";
const PUBLIC_URL: &str = "https://hooks.example.com";
const API_KEY: &str = "platform-test-key";

// ── Scripted backend ─────────────────────────────────────────────────────────

/// Echoes the last user message, wrapped in the noise real models emit.
#[derive(Default)]
struct EchoProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl LlmProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    fn id(&self) -> &str {
        "echo-model"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> anyhow::Result<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let last = messages.last().map(ChatMessage::content).unwrap_or_default();
        // Vary latency so concurrent requests would interleave if the
        // session lock did not serialize them.
        let jitter = last.len() as u64 % 7;
        tokio::time::sleep(Duration::from_millis(jitter * 3)).await;
        Ok(CompletionResponse::text(format!(
            "<think>planning a reply</think>Hello! You said: {last} <|im_end|>"
        )))
    }
}

/// Backend that is always down.
#[derive(Default)]
struct DownProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl LlmProvider for DownProvider {
    fn name(&self) -> &str {
        "down"
    }

    fn id(&self) -> &str {
        "down-model"
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> anyhow::Result<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("503 service unavailable")
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

fn test_config() -> NexzaConfig {
    let mut config = NexzaConfig::default();
    config.channels.telephony.auth_token = Some(Secret::new(TWILIO_TOKEN.into()));
    config.channels.telephony.public_url = Some(format!("{PUBLIC_URL}/"));
    config.channels.chat_platform.api_key = Some(Secret::new(API_KEY.into()));
    config.rate_limit.capacity = 100;
    config.rate_limit.refill_per_sec = 10.0;
    config
}

async fn start_server(
    config: NexzaConfig,
    provider: Arc<dyn LlmProvider>,
) -> (SocketAddr, Arc<GatewayState>) {
    let ai = AiClient::new(provider, RetryPolicy::immediate(2), Duration::from_secs(5));
    let state = Arc::new(GatewayState::new(&config, ai));
    let app = build_gateway_app(Arc::clone(&state));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    (addr, state)
}

async fn start_echo_server() -> (SocketAddr, Arc<GatewayState>, Arc<EchoProvider>) {
    let provider = Arc::new(EchoProvider::default());
    let (addr, state) = start_server(test_config(), provider.clone()).await;
    (addr, state, provider)
}

fn signed_form(path: &str, params: &[(&str, &str)]) -> (Vec<(String, String)>, String) {
    let owned: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let signature = compute_signature(TWILIO_TOKEN, &format!("{PUBLIC_URL}{path}"), &owned).unwrap();
    (owned, signature)
}

// ── Mobile / web ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn chat_returns_clean_reply_and_records_exchange() {
    let (addr, state, provider) = start_echo_server().await;
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/chat"))
        .json(&json!({"message": "Hi", "session_id": "abc"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let reply = body["response"].as_str().unwrap();
    assert_eq!(reply, "Hello! You said: Hi");
    assert_eq!(body["session_id"], "abc");
    assert!(body["timestamp"].is_string());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

    let snapshot = state
        .sessions
        .snapshot(&SessionKey::device("abc"))
        .await
        .unwrap();
    let texts: Vec<&str> = snapshot.history.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(texts, vec!["Hi", "Hello! You said: Hi"]);
    assert_eq!(snapshot.persona, "NEXZA_ASSISTANT");
}

#[tokio::test]
async fn chat_rejects_bad_input_without_calling_the_backend() {
    let (addr, state, provider) = start_echo_server().await;
    let client = reqwest::Client::new();

    let missing = client
        .post(format!("http://{addr}/chat"))
        .json(&json!({"message": "Hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 400);

    let blank = client
        .post(format!("http://{addr}/chat"))
        .json(&json!({"message": "   ", "session_id": "abc"}))
        .send()
        .await
        .unwrap();
    assert_eq!(blank.status(), 400);

    let bad_id = client
        .post(format!("http://{addr}/chat"))
        .json(&json!({"message": "Hi", "session_id": "../etc"}))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_id.status(), 401);

    let not_json = client
        .post(format!("http://{addr}/chat"))
        .body("message=Hi")
        .send()
        .await
        .unwrap();
    assert_eq!(not_json.status(), 400);

    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    assert!(state.sessions.is_empty());
}

#[tokio::test]
async fn backend_outage_returns_apology_and_keeps_history() {
    let provider = Arc::new(DownProvider::default());
    let (addr, state) = start_server(test_config(), provider.clone()).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/chat"))
        .json(&json!({"message": "Hi", "session_id": "down"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(body["response"].as_str().unwrap().contains("trouble"));
    assert_eq!(body["session_id"], "down");
    // Both attempts of the retry policy were spent.
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

    let snapshot = state
        .sessions
        .snapshot(&SessionKey::device("down"))
        .await
        .unwrap();
    assert!(snapshot.history.is_empty());
}

#[tokio::test]
async fn concurrent_requests_on_one_session_keep_exchanges_paired() {
    let (addr, state, _provider) = start_echo_server().await;
    let client = reqwest::Client::new();

    let requests = (0..10).map(|i| {
        let client = client.clone();
        async move {
            client
                .post(format!("http://{addr}/chat"))
                .json(&json!({"message": format!("message number {i}"), "session_id": "busy"}))
                .send()
                .await
                .unwrap()
                .status()
        }
    });
    let statuses = futures::future::join_all(requests).await;
    assert!(statuses.iter().all(|s| *s == 200));

    let snapshot = state
        .sessions
        .snapshot(&SessionKey::device("busy"))
        .await
        .unwrap();
    assert_eq!(snapshot.history.len(), 20);
    for pair in snapshot.history.chunks(2) {
        assert_eq!(pair[0].role.as_str(), "user");
        assert_eq!(pair[1].role.as_str(), "assistant");
        assert_eq!(pair[1].text, format!("Hello! You said: {}", pair[0].text));
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
}

#[tokio::test]
async fn rate_limit_denies_the_request_past_capacity() {
    let mut config = test_config();
    config.rate_limit.capacity = 3;
    config.rate_limit.refill_per_sec = 0.001;
    let provider = Arc::new(EchoProvider::default());
    let (addr, state) = start_server(config, provider.clone()).await;
    let client = reqwest::Client::new();

    for i in 0..3 {
        let resp = client
            .post(format!("http://{addr}/chat"))
            .json(&json!({"message": format!("hi {i}"), "session_id": "limited"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    let denied = client
        .post(format!("http://{addr}/chat"))
        .json(&json!({"message": "one more", "session_id": "limited"}))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 429);
    assert!(denied.headers().contains_key("retry-after"));
    let body: Value = denied.json().await.unwrap();
    assert!(body["retry_after_seconds"].as_u64().unwrap() >= 1);

    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    let snapshot = state
        .sessions
        .snapshot(&SessionKey::device("limited"))
        .await
        .unwrap();
    assert_eq!(snapshot.history.len(), 6);

    // Other sessions have their own bucket.
    let other = client
        .post(format!("http://{addr}/chat"))
        .json(&json!({"message": "hi", "session_id": "someone-else"}))
        .send()
        .await
        .unwrap();
    assert_eq!(other.status(), 200);
}

// ── Chat platform ────────────────────────────────────────────────────────────

#[tokio::test]
async fn platform_wrong_key_is_rejected_and_history_unchanged() {
    let (addr, state, provider) = start_echo_server().await;
    let client = reqwest::Client::new();
    let key = SessionKey::platform("u1", "c1");

    let seeded = client
        .post(format!("http://{addr}/api/discord"))
        .header("X-API-Key", API_KEY)
        .json(&json!({"type": "ask", "prompt": "first", "discord": {"user": "u1", "channel": "c1"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(seeded.status(), 200);
    let before = state.sessions.snapshot(&key).await.unwrap();
    assert_eq!(before.history.len(), 2);

    let body = json!({"type": "ask", "prompt": "hello", "discord": {"user": "u1", "channel": "c1"}});
    for api_key in [Some("wrong-key"), None] {
        let mut req = client.post(format!("http://{addr}/api/discord")).json(&body);
        if let Some(api_key) = api_key {
            req = req.header("X-API-Key", api_key);
        }
        let resp = req.send().await.unwrap();
        assert_eq!(resp.status(), 401);
        let json: Value = resp.json().await.unwrap();
        assert_eq!(json["ok"], false);
    }

    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    let after = state.sessions.snapshot(&key).await.unwrap();
    assert_eq!(after.history, before.history);
    assert_eq!(after.last_active_at, before.last_active_at);
}

#[tokio::test]
async fn platform_commands_round_trip() {
    let (addr, state, provider) = start_echo_server().await;
    let client = reqwest::Client::new();
    let post = |body: Value| {
        client
            .post(format!("http://{addr}/api/discord"))
            .header("X-API-Key", API_KEY)
            .json(&body)
            .send()
    };
    let ctx = json!({"user": "u1", "channel": "c1", "assignee": "sam"});

    let ask: Value = post(json!({"type": "ask", "prompt": "status?", "discord": ctx}))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ask["ok"], true);
    assert_eq!(ask["reply"], "Hello! You said: status?");
    assert_eq!(ask["session_id"], "discord:u1:c1");

    let note: Value = post(json!({"type": "note", "text": "call the vendor", "discord": ctx}))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(note["reply"], "Saved.");

    let assign: Value = post(json!({"type": "assign", "task": "order parts", "discord": ctx}))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(assign["reply"], "Task for sam: order parts");
    assert_eq!(assign["meta"]["assignee"], "sam");

    let calls_before_summary = provider.calls.load(Ordering::SeqCst);
    let summary: Value = post(json!({"type": "summary", "limit": 2, "discord": ctx}))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary["ok"], true);
    // Clamped up to the minimum window; only four turns exist.
    assert_eq!(summary["meta"]["turns"], 4);
    assert_eq!(provider.calls.load(Ordering::SeqCst), calls_before_summary + 1);

    let snapshot = state
        .sessions
        .snapshot(&SessionKey::platform("u1", "c1"))
        .await
        .unwrap();
    let texts: Vec<&str> = snapshot.history.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(texts, vec![
        "status?",
        "Hello! You said: status?",
        "[note] call the vendor",
        "[task for sam] order parts",
    ]);

    let unknown = post(json!({"type": "dance", "discord": ctx})).await.unwrap();
    assert_eq!(unknown.status(), 400);
    let unknown: Value = unknown.json().await.unwrap();
    assert_eq!(unknown, json!({"ok": false, "error": "unknown type"}));
}

#[tokio::test]
async fn untyped_platform_body_uses_the_other_channel() {
    let (addr, state, _provider) = start_echo_server().await;
    let resp: Value = reqwest::Client::new()
        .post(format!("http://{addr}/api/discord"))
        .header("X-API-Key", API_KEY)
        .json(&json!({"message": "ping", "session_id": "tool-1"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["ok"], true);
    assert_eq!(resp["session_id"], "other:tool-1");
    assert!(
        state
            .sessions
            .snapshot(&SessionKey::other("tool-1"))
            .await
            .is_some()
    );
}

// ── Telephony ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn voice_webhook_with_valid_signature_gets_markup() {
    let (addr, state, _provider) = start_echo_server().await;
    let (form, signature) = signed_form("/twilio/voice", &[
        ("CallSid", "CA123"),
        ("From", "+15551234567"),
        ("To", "+15557654321"),
        ("SpeechResult", "I need an oil change"),
    ]);

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/twilio/voice"))
        .header("X-Twilio-Signature", signature)
        .form(&form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(
        resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/xml")
    );
    let xml = resp.text().await.unwrap();
    assert!(xml.contains(r#"<Say voice="alice" language="en-US">"#));
    assert!(xml.contains("Hello! You said: I need an oil change"));

    let snapshot = state
        .sessions
        .snapshot(&SessionKey::phone(
            nexza_common::Channel::Telephone,
            "+15551234567",
        ))
        .await
        .unwrap();
    assert_eq!(snapshot.history.len(), 2);
    assert_eq!(snapshot.persona, "PHONE_AGENT");
}

#[tokio::test]
async fn tampered_signature_is_rejected_with_empty_markup() {
    let (addr, state, provider) = start_echo_server().await;
    let (form, signature) = signed_form("/twilio/sms", &[
        ("From", "+15551234567"),
        ("Body", "hola"),
    ]);
    let mut tampered: Vec<char> = signature.chars().collect();
    tampered[0] = if tampered[0] == 'A' { 'B' } else { 'A' };
    let tampered: String = tampered.into_iter().collect();

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/twilio/sms"))
        .header("X-Twilio-Signature", tampered)
        .form(&form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    assert!(resp.text().await.unwrap().ends_with("<Response/>"));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    assert!(state.sessions.is_empty());
}

#[tokio::test]
async fn sms_outage_apologises_in_the_callers_language() {
    let provider = Arc::new(DownProvider::default());
    let (addr, _state) = start_server(test_config(), provider).await;
    let (form, signature) = signed_form("/twilio/sms", &[
        ("From", "+15551234567"),
        ("Body", "Hola, necesito una cita"),
    ]);

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/twilio/sms"))
        .header("X-Twilio-Signature", signature)
        .form(&form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let xml = resp.text().await.unwrap();
    assert!(xml.contains("<Message>Lo siento"));
}

#[tokio::test]
async fn telephony_status_reports_configuration() {
    let (addr, _state, _provider) = start_echo_server().await;
    let body: Value = reqwest::get(format!("http://{addr}/twilio/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"status": "ok", "telephony_configured": true}));
}

// ── Health and headers ───────────────────────────────────────────────────────

#[tokio::test]
async fn health_endpoints_carry_security_headers() {
    let (addr, _state, _provider) = start_echo_server().await;

    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
    assert_eq!(resp.headers()["x-frame-options"], "DENY");
    assert!(resp.headers().contains_key("x-request-id"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());

    let detailed: Value = reqwest::get(format!("http://{addr}/health/detailed"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detailed["sessions"], 0);
    assert_eq!(detailed["rate_buckets"], 0);
    let channels = detailed["channels"].as_array().unwrap();
    assert_eq!(channels.len(), 5);
}

#[tokio::test]
async fn detailed_health_counts_requests_and_failures() {
    let (addr, _state, _provider) = start_echo_server().await;
    let client = reqwest::Client::new();

    let ok = client
        .post(format!("http://{addr}/chat"))
        .json(&json!({"message": "hi", "session_id": "metrics-1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), 200);
    let refused = client
        .post(format!("http://{addr}/api/discord"))
        .header("X-API-Key", "nope")
        .json(&json!({"type": "ask", "prompt": "hi", "discord": {"user": "u", "channel": "c"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(refused.status(), 401);

    let detailed: Value = reqwest::get(format!("http://{addr}/health/detailed"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let metrics = &detailed["metrics"];
    assert_eq!(metrics["total_requests"], 2);
    assert_eq!(metrics["total_chats"], 1);
    assert_eq!(metrics["total_errors"], 1);
    assert_eq!(metrics["error_rate"], 0.5);
    assert_eq!(metrics["last_error"]["kind"], "unauthorized");
    assert!(metrics["last_error"]["timestamp"].is_string());
    assert!(metrics["average_requests_per_minute"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn caller_request_id_is_echoed() {
    let (addr, _state, _provider) = start_echo_server().await;
    let resp = reqwest::Client::new()
        .get(format!("http://{addr}/health"))
        .header("x-request-id", "trace-me-42")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["x-request-id"], "trace-me-42");
}
