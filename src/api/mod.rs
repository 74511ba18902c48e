//! API 模块
//!
//! 对外的 HTTP 接口：
//! - `POST /compare`：上传 1 个 solution 和若干 student 压缩包，返回比对报告
//! - `GET /temp/...`：截图与差异图
//! - `GET /health`：服务自检

pub mod upload;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::models::BatchReport;
use crate::orchestrator::BatchOrchestrator;

/// 处理器共享状态
pub struct ApiState {
    pub orchestrator: BatchOrchestrator,
    pub uploads_dir: PathBuf,
}

/// HTTP 层错误
#[derive(Debug)]
pub enum ApiError {
    /// 请求格式不正确（400）
    BadRequest(String),
    /// 处理失败（500）
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// 构建路由
pub fn router(state: Arc<ApiState>, temp_dir: &Path) -> Router {
    Router::new()
        .route("/compare", post(compare_handler))
        .route("/health", get(health_handler))
        .nest_service("/temp", ServeDir::new(temp_dir))
        .layer(DefaultBodyLimit::disable())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn compare_handler(
    State(state): State<Arc<ApiState>>,
    multipart: Multipart,
) -> Result<Json<BatchReport>, ApiError> {
    let request = upload::save_request(&state.uploads_dir, multipart).await?;
    info!("📥 收到比对请求: {} 个学生项目", request.students.len());

    match state.orchestrator.run(request).await {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            error!("❌ 标准答案处理失败: {}", e);
            Err(ApiError::Internal(e.to_string()))
        }
    }
}
