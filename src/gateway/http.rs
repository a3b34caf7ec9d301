//! HTTP 接入层（axum）
//!
//! POST /run-shell        {user_input}           -> {result}   无状态 shell 智能体
//! POST /terraform-agent  {user_id, user_input}  -> {result}   按用户保存历史的 Terraform 智能体
//! GET/DELETE /terraform-agent/history/:user_id                  查看 / 清空历史
//! GET /health
//! 运行时错误统一映射为 502 {error}；请求体不合法由 axum 的 Json 提取器返回 4xx。

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::agent::AgentRuntime;
use crate::core::{AgentError, Orchestrator};
use crate::memory::Message;

/// 路由共享状态
pub struct AppState {
    pub shell: Arc<dyn AgentRuntime>,
    pub terraform: Arc<Orchestrator>,
}

#[derive(Debug, Deserialize)]
pub struct ShellRequest {
    pub user_input: String,
}

#[derive(Debug, Deserialize)]
pub struct TerraformRequest {
    pub user_id: String,
    pub user_input: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunResponse {
    pub result: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub user_id: String,
    pub turns: Vec<Message>,
}

/// AgentError 的 HTTP 表示
pub struct ApiError(AgentError);

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        if self.0.is_shutting_down() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::BAD_GATEWAY
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/run-shell", post(run_shell))
        .route("/terraform-agent", post(terraform_agent))
        .route(
            "/terraform-agent/history/:user_id",
            get(get_history).delete(delete_history),
        )
        .route("/health", get(health))
        .with_state(state)
}

/// POST /run-shell
async fn run_shell(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ShellRequest>,
) -> Result<Json<RunResponse>, ApiError> {
    let span = tracing::info_span!("run_shell", request_id = %Uuid::new_v4());
    async move {
        tracing::info!(input_len = req.user_input.len(), "shell request");
        let outcome = state.shell.run(&req.user_input, &[]).await?;
        Ok::<_, ApiError>(Json(RunResponse {
            result: outcome.output,
        }))
    }
    .instrument(span)
    .await
}

/// POST /terraform-agent
async fn terraform_agent(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TerraformRequest>,
) -> Result<Json<RunResponse>, ApiError> {
    let span = tracing::info_span!(
        "terraform_agent",
        user_id = %req.user_id,
        request_id = %Uuid::new_v4()
    );
    async move {
        let result = state.terraform.handle(&req.user_id, &req.user_input).await?;
        Ok::<_, ApiError>(Json(RunResponse { result }))
    }
    .instrument(span)
    .await
}

/// GET /terraform-agent/history/:user_id
async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Json<HistoryResponse> {
    let turns = state.terraform.history(&user_id).await;
    Json(HistoryResponse { user_id, turns })
}

/// DELETE /terraform-agent/history/:user_id
async fn delete_history(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> StatusCode {
    state.terraform.reset(&user_id).await;
    StatusCode::NO_CONTENT
}

/// GET /health
async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let sessions = state.terraform.session_count().await;
    Json(serde_json::json!({ "status": "ok", "sessions": sessions }))
}
