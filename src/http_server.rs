/// HTTP Server Module
///
/// Provides HTTP endpoints for the two trigger entry points and for viewing
/// the monitoring state.

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::sync::Arc;

use crate::app::App;
use crate::cooldown::CooldownState;
use crate::invocation::{on_monitoring_trigger, on_scheduler_tick, TriggerPayload};
use crate::scheduler::ScheduleOutcome;

#[derive(Clone)]
pub struct AppState {
    pub app: Arc<App>,
    pub api_secret: Option<String>,
}

/// Create and configure the HTTP server router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/invoke/monitoring", post(invoke_monitoring))
        .route("/invoke/scheduler", post(invoke_scheduler))
        .route("/status", get(status_endpoint))
        .with_state(state)
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let secret = match &state.api_secret {
        Some(secret) => secret,
        None => return Ok(()),
    };

    let token = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if token != secret.as_str() {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(())
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "tgtg_notifier",
        "timestamp": state.app.clock.now_utc().to_rfc3339()
    }))
}

async fn invoke_monitoring(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<Json<TriggerPayload>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorize(&state, &headers)?;
    let payload = payload.map(|Json(p)| p).unwrap_or_default();

    match on_monitoring_trigger(&state.app, &payload).await {
        Ok(Some(outcome)) => Ok(Json(json!({
            "status": "ok",
            "outcome": format!("{:?}", outcome)
        }))),
        Ok(None) => Ok(Json(json!({ "status": "ok", "outcome": "ignored" }))),
        Err(e) => {
            log::error!("Monitoring invocation failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn invoke_scheduler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<Json<TriggerPayload>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorize(&state, &headers)?;
    let payload = payload.map(|Json(p)| p).unwrap_or_default();

    let outcome = on_scheduler_tick(&state.app, &payload).await;
    let next = match &outcome {
        ScheduleOutcome::Armed(invocation) => Some(invocation.fire_at.to_rfc3339()),
        ScheduleOutcome::AlreadyArmed(run) => run.fire_at.map(|t| t.to_rfc3339()),
        _ => None,
    };

    Ok(Json(json!({
        "status": "ok",
        "outcome": format!("{:?}", outcome),
        "next_invocation": next
    })))
}

async fn status_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorize(&state, &headers)?;

    let cooldown = match state.app.cooldown.is_suspended().await {
        CooldownState::Inactive => json!({ "suspended": false }),
        CooldownState::Suspended { until, remaining } => json!({
            "suspended": true,
            "until": until.to_rfc3339(),
            "remaining_seconds": remaining.num_seconds()
        }),
    };

    let armed = match state.app.registry.list_armed().await {
        Ok(runs) => runs,
        Err(e) => {
            log::error!("Failed to list armed timers: {}", e);
            Vec::new()
        }
    };

    Ok(Json(json!({
        "cooldown": cooldown,
        "notifications_enabled": state.app.preference.is_enabled().await,
        "armed": armed
    })))
}

/// Start the HTTP server
pub async fn start_server(state: AppState, port: u16) -> Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .context("Failed to bind HTTP server")?;

    log::info!("HTTP server listening on port {}", port);

    axum::serve(listener, app)
        .await
        .context("HTTP server error")?;

    Ok(())
}
