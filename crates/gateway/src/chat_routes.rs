//! Mobile and web client route.

use {
    crate::{
        auth::Proof,
        dispatcher::{Action, Dispatcher},
        error::RelayError,
        server::AppState,
    },
    axum::{
        Json, Router,
        body::Bytes,
        extract::State,
        response::{IntoResponse, Response},
        routing::post,
    },
    nexza_channels::normalize::{AppPayload, normalize_app},
    nexza_common::Channel,
    serde::Serialize,
};

#[derive(Serialize)]
struct ChatResponse {
    response: String,
    session_id: String,
    timestamp: String,
}

/// `POST /chat` with `{message, session_id, persona?}`.
async fn chat_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let payload: AppPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            return RelayError::malformed(format!("invalid JSON body: {e}")).chat_response(None);
        },
    };
    let Some(session_id) = payload
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
    else {
        return RelayError::malformed("missing required field: session_id").chat_response(None);
    };

    let mut dispatcher = Dispatcher::new(&state.gateway, Channel::MobileApp);
    let proof = Proof::SelfReported {
        session_id: Some(session_id.as_str()),
    };
    match dispatcher
        .run(proof, || normalize_app(payload).map(|r| (r, Action::Converse)))
        .await
    {
        Ok(reply) => Json(ChatResponse {
            response: reply.text,
            session_id,
            timestamp: crate::now_rfc3339(),
        })
        .into_response(),
        Err(err) => err.chat_response(Some(session_id.as_str())),
    }
}

pub fn chat_router() -> Router<AppState> {
    Router::new().route("/chat", post(chat_handler))
}
