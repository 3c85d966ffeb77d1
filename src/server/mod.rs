//! HTTP 서버 - Axum 기반 채팅 API
//!
//! - `POST /api/chat`: `{"message"}` -> `{"response"}`
//! - `GET /api/health`: `{"status": "healthy", "message"}`
//!
//! 요청 간 상태는 없습니다. 매처는 시작 시 한 번 만들어져 `Arc`로 공유되며
//! 요청 처리 중 변경되지 않습니다.

mod error;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::ApiError;

use crate::chat::ResponseMatcher;
use crate::config::AppConfig;

/// 헬스 체크 메시지
pub const HEALTH_MESSAGE: &str = "Symptom Checker Bot is running";

// ============================================================================
// Types
// ============================================================================

/// 공유 상태
#[derive(Clone)]
pub struct AppState {
    pub matcher: Arc<ResponseMatcher>,
}

/// 채팅 요청
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
}

/// 채팅 응답
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
}

/// 헬스 체크 응답
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// 채팅 엔드포인트
///
/// `message`가 없거나 빈 문자열이면 400, 매처 오류는 500.
async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    let message = match request.message {
        Some(message) if !message.is_empty() => message,
        _ => return Err(ApiError::BadRequest("Message is required".to_string())),
    };

    let response = state.matcher.respond(&message).await?;
    Ok(Json(ChatResponse { response }))
}

/// 헬스 체크
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        message: HEALTH_MESSAGE.to_string(),
    })
}

// ============================================================================
// Router & Server
// ============================================================================

/// 라우터 생성
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 설정으로 매처를 로드하고 서버 실행 (Ctrl+C로 종료)
///
/// 모델이나 지식베이스 로드에 실패하면 바인딩 전에 에러를 반환합니다.
pub async fn run(config: &AppConfig) -> Result<()> {
    let matcher = ResponseMatcher::from_config(config).await?;

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Symptom checker listening on http://{}", listener.local_addr()?);
    serve(listener, Arc::new(matcher), shutdown_signal()).await
}

/// 주어진 리스너에서 서버 실행
pub async fn serve<F>(listener: TcpListener, matcher: Arc<ResponseMatcher>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(AppState { matcher });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

// ============================================================================
// Tests
// ============================================================================
