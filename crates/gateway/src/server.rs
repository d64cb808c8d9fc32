use std::{net::SocketAddr, sync::Arc, time::Instant};

use {
    axum::{
        Json, Router,
        extract::State,
        http::{HeaderValue, header},
        response::IntoResponse,
        routing::get,
    },
    nexza_common::now_ms,
    nexza_config::NexzaConfig,
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tower::ServiceBuilder,
    tower_http::{
        cors::{Any, CorsLayer},
        limit::RequestBodyLimitLayer,
        request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
        set_header::SetResponseHeaderLayer,
        trace::TraceLayer,
    },
    tracing::{debug, info, warn},
};

use crate::{
    chat_routes::chat_router, platform_routes::platform_router, state::GatewayState,
    telephony_routes::telephony_router,
};

/// Largest accepted request body. Webhooks and chat messages are far smaller.
const MAX_BODY_BYTES: usize = 64 * 1024;

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES));

    let app_state = AppState { gateway: state };

    Router::new()
        .route("/health", get(health_handler))
        .route("/health/detailed", get(health_detailed_handler))
        .merge(chat_router())
        .merge(platform_router())
        .merge(telephony_router())
        .layer(cors)
        .layer(middleware)
        .with_state(app_state)
}

/// Periodically evict idle sessions and refilled rate buckets until the
/// shutdown token fires.
pub fn spawn_sweeper(state: Arc<GatewayState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(state.sweep_interval);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            tokio::select! {
                () = state.shutdown.cancelled() => {
                    debug!("sweeper stopped");
                    break;
                },
                _ = interval.tick() => {
                    let sessions = state.sessions.evict_idle(now_ms());
                    let buckets = state.rate_limiter.sweep_idle(Instant::now());
                    if sessions > 0 || buckets > 0 {
                        debug!(sessions, buckets, "sweep removed idle entries");
                    }
                },
            }
        }
    })
}

/// Resolve on Ctrl-C or when `token` is cancelled elsewhere; either way the
/// token ends up cancelled so background tasks stop too.
async fn shutdown_signal(token: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("failed to listen for ctrl-c: {e}");
                token.cancelled().await;
            }
            info!("shutdown requested");
        },
        () = token.cancelled() => {},
    }
    token.cancel();
}

fn startup_banner(config: &NexzaConfig, state: &GatewayState, addr: SocketAddr) {
    let mut lines = vec![
        format!("nexza gateway v{}", state.version),
        format!("listening: http://{addr}"),
        format!("ai: {} (model {})", state.ai.endpoint(), state.ai.model()),
        format!("personas: {}", state.personas.len()),
        format!(
            "sessions: max {} turns, idle timeout {}s",
            config.sessions.max_turns, config.sessions.idle_timeout_secs
        ),
        format!(
            "rate limit: {} burst, {}/s refill",
            config.rate_limit.capacity, config.rate_limit.refill_per_sec
        ),
    ];
    let channels: Vec<&str> = state
        .credentials
        .configured_channels()
        .into_iter()
        .map(|c| c.as_str())
        .collect();
    lines.push(format!("channels: {}", channels.join(", ")));
    if !state.credentials.telephony_configured() {
        lines.push("⚠ telephony auth token missing; /twilio/* rejects every request".into());
    }
    if !state.credentials.chat_platform_configured() {
        lines.push("⚠ chat platform API key missing; /api/discord rejects every request".into());
    }
    if config.server.behind_proxy {
        lines.push("behind proxy: trusting X-Forwarded-* for webhook URLs".into());
    }

    let width = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));
}

/// Start the gateway HTTP server and run until shutdown.
pub async fn start_gateway(config: NexzaConfig) -> anyhow::Result<()> {
    let state = Arc::new(GatewayState::from_config(&config)?);
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    startup_banner(&config, &state, local);

    let sweeper = spawn_sweeper(Arc::clone(&state));
    let shutdown = state.shutdown.clone();
    let app = build_gateway_app(Arc::clone(&state));

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown))
    .await?;

    state.shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!("sweeper task ended abnormally: {e}");
    }
    info!(uptime_secs = state.uptime().as_secs(), "gateway stopped");
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": crate::now_rfc3339(),
        "version": state.gateway.version,
    }))
}

async fn health_detailed_handler(State(state): State<AppState>) -> impl IntoResponse {
    let gateway = &state.gateway;
    let channels: Vec<&str> = gateway
        .credentials
        .configured_channels()
        .into_iter()
        .map(|c| c.as_str())
        .collect();
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": crate::now_rfc3339(),
        "version": gateway.version,
        "uptime_secs": gateway.uptime().as_secs(),
        "sessions": gateway.sessions.len(),
        "rate_buckets": gateway.rate_limiter.len(),
        "ai_endpoint": gateway.ai.endpoint(),
        "ai_model": gateway.ai.model(),
        "personas": gateway.personas.len(),
        "channels": channels,
        "metrics": gateway.metrics.snapshot(gateway.uptime()),
    }))
}
