//! COMSOL Agent Web UI
//!
//! 启动: cargo run --bin comsol-agent-web --features web
//! 浏览器访问 http://127.0.0.1:8080
//!
//! 所有浏览器共享同一个会话；提交按到达顺序串行执行。
//! 破坏性动作待确认时 /api/chat 保持挂起，前端轮询 /api/confirmation 并调用 /api/confirm。

#![cfg(feature = "web")]

use std::net::SocketAddr;

use axum::{
    extract::State,
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use comsol_agent::core::{create_agent, create_agent_builder, AgentHandle, SnapshotView};
use comsol_agent::observability;
use comsol_agent::turn::ConfirmationRequest;

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    revision: Option<u64>,
}

impl ChatResponse {
    fn empty() -> Self {
        Self {
            content: String::new(),
            outcome: None,
            revision: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfirmRequest {
    approve: bool,
}

#[derive(Debug, Serialize)]
struct ResyncResponse {
    corrections: Vec<String>,
}

type ApiError = (StatusCode, String);

fn internal(e: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let builder = create_agent_builder(None);
    observability::init(&builder.config().app.log_level);

    let handle = create_agent(builder).await?;

    let app = Router::new()
        .route("/", get(index))
        .route("/api/chat", post(api_chat))
        .route("/api/snapshot", get(api_snapshot))
        .route("/api/confirmation", get(api_confirmation))
        .route("/api/confirm", post(api_confirm))
        .route("/api/cancel", post(api_cancel))
        .route("/api/resync", post(api_resync))
        .route("/api/health", get(|| async { "OK" }))
        .with_state(handle);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!("COMSOL Agent Web UI: http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(include_str!("../../static/index.html"))
}

async fn api_chat(
    State(agent): State<AgentHandle>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<ChatResponse>)> {
    let message = req.message.trim();
    if message.is_empty() {
        return Err((StatusCode::BAD_REQUEST, Json(ChatResponse::empty())));
    }
    match agent.submit(message).await {
        Ok(report) => Ok(Json(ChatResponse {
            content: report.reply,
            outcome: serde_json::to_value(report.outcome)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string)),
            revision: Some(report.revision),
        })),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ChatResponse {
                content: format!("Error: {e}"),
                outcome: None,
                revision: None,
            }),
        )),
    }
}

async fn api_snapshot(State(agent): State<AgentHandle>) -> Result<Json<SnapshotView>, ApiError> {
    agent.snapshot().await.map(Json).map_err(internal)
}

async fn api_confirmation(State(agent): State<AgentHandle>) -> Json<Option<ConfirmationRequest>> {
    Json(agent.pending_confirmation())
}

async fn api_confirm(
    State(agent): State<AgentHandle>,
    Json(req): Json<ConfirmRequest>,
) -> Result<StatusCode, ApiError> {
    agent
        .confirm(req.approve)
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| (StatusCode::CONFLICT, e.to_string()))
}

async fn api_cancel(State(agent): State<AgentHandle>) -> StatusCode {
    agent.cancel();
    StatusCode::NO_CONTENT
}

async fn api_resync(State(agent): State<AgentHandle>) -> Result<Json<ResyncResponse>, ApiError> {
    agent
        .resync()
        .await
        .map(|corrections| Json(ResyncResponse { corrections }))
        .map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))
}
