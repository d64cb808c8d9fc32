//! Chat platform bot route.
//!
//! The bot forwards one of four commands (`ask`, `note`, `assign`,
//! `summary`) with the user and channel it came from. Bodies without a
//! `type` are tooling clients and land on the `Other` channel.

use {
    crate::{
        auth::{API_KEY_HEADER, Proof},
        dispatcher::{Action, Dispatcher},
        server::AppState,
    },
    axum::{
        Json, Router,
        body::Bytes,
        extract::State,
        http::HeaderMap,
        response::{IntoResponse, Response},
        routing::post,
    },
    nexza_channels::normalize::{PlatformPayload, normalize_platform},
    nexza_common::Channel,
    serde::Serialize,
};

#[derive(Serialize)]
struct PlatformReply {
    ok: bool,
    reply: String,
    session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<serde_json::Value>,
}

/// `POST /api/discord`. The body is only parsed once the key checks out.
async fn platform_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    let mut dispatcher = Dispatcher::new(&state.gateway, Channel::ChatPlatform);
    let result = dispatcher
        .run(Proof::SharedSecret { header }, || {
            let payload: PlatformPayload = serde_json::from_slice(&body)
                .map_err(|e| nexza_channels::Error::invalid("body", e))?;
            let command = normalize_platform(payload)?;
            Ok((command.request, Action::from(command.action)))
        })
        .await;

    match result {
        Ok(reply) => Json(PlatformReply {
            ok: true,
            reply: reply.text,
            session_id: reply.session_key.to_string(),
            meta: reply.meta,
        })
        .into_response(),
        Err(err) => err.platform_response(),
    }
}

pub fn platform_router() -> Router<AppState> {
    Router::new().route("/api/discord", post(platform_handler))
}
