//! Telephony provider webhooks.
//!
//! Voice and SMS arrive as signed form posts and are answered with provider
//! markup. Failures still answer with markup so the caller hears or reads
//! an apology instead of the provider's generic error.

use {
    crate::{
        auth::{Proof, SIGNATURE_HEADER},
        dispatcher::{Action, Dispatcher},
        error::xml_response,
        server::AppState,
    },
    axum::{
        Json, Router,
        body::Bytes,
        extract::{OriginalUri, State},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::{get, post},
    },
    nexza_channels::{
        markup::{self, Language, detect_language},
        normalize::{TelephonyForm, normalize_telephony},
    },
    nexza_common::Channel,
};

/// Caller text as the normalizer will read it, for picking the reply
/// language even when the request fails before normalization.
fn caller_language(channel: Channel, form: &TelephonyForm) -> Language {
    let text = match channel {
        Channel::Sms => form.get("Body"),
        _ => form
            .get("SpeechResult")
            .or_else(|| form.get("TranscriptionText"))
            .or_else(|| form.get("Body")),
    };
    text.map(detect_language).unwrap_or(Language::English)
}

/// First value of a possibly comma-joined header.
fn first_value<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    let value = headers.get(name)?.to_str().ok()?;
    Some(value.split(',').next().unwrap_or(value).trim()).filter(|v| !v.is_empty())
}

/// `scheme://host` as seen by the provider, from forwarding headers when the
/// gateway sits behind a proxy and from `Host` otherwise.
fn request_origin(headers: &HeaderMap, behind_proxy: bool) -> Option<String> {
    let (scheme, host) = if behind_proxy {
        (
            first_value(headers, "x-forwarded-proto").unwrap_or("https"),
            first_value(headers, "x-forwarded-host").or_else(|| first_value(headers, "host"))?,
        )
    } else {
        ("http", first_value(headers, "host")?)
    };
    Some(format!("{scheme}://{host}"))
}

async fn handle_webhook(
    state: AppState,
    channel: Channel,
    uri: &OriginalUri,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    let form = TelephonyForm::parse(body);
    let language = caller_language(channel, &form);
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    let origin = request_origin(headers, state.gateway.behind_proxy);
    let proof = Proof::Signature {
        origin: origin.as_deref(),
        path_and_query,
        form: &form,
        header: headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok()),
    };

    let mut dispatcher = Dispatcher::new(&state.gateway, channel);
    match dispatcher
        .run(proof, || {
            normalize_telephony(channel, &form).map(|r| (r, Action::Converse))
        })
        .await
    {
        Ok(reply) => xml_response(
            StatusCode::OK,
            markup::render(reply.channel, &reply.text, reply.language),
        ),
        Err(err) => err.markup_response(channel, language),
    }
}

async fn voice_handler(
    State(state): State<AppState>,
    uri: OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_webhook(state, Channel::Telephone, &uri, &headers, &body).await
}

async fn sms_handler(
    State(state): State<AppState>,
    uri: OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_webhook(state, Channel::Sms, &uri, &headers, &body).await
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "telephony_configured": state.gateway.credentials.telephony_configured(),
    }))
}

pub fn telephony_router() -> Router<AppState> {
    Router::new()
        .route("/twilio/voice", post(voice_handler))
        .route("/twilio/sms", post(sms_handler))
        .route("/twilio/status", get(status_handler))
}
