use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum_typed_multipart::TypedMultipart;
use log::info;
use tokio::task::spawn_blocking;

use super::error::Result;
use super::state::AppState;
use super::types::*;
use crate::metrics;

/// 存活检查
#[utoipa::path(get, path = "/ping", responses((status = 200, body = String)))]
pub async fn ping_handler() -> &'static str {
    "pong"
}

/// 搜索服务器本地的一张图片
#[utoipa::path(
    post,
    path = "/closest_img_ids",
    request_body = ClosestRequest,
    responses(
        (status = 200, body = [i64]),
        (status = 400, body = ErrorResponse),
        (status = 500, body = ErrorResponse),
    )
)]
pub async fn closest_img_ids_handler(
    State(state): State<Arc<AppState>>,
    Json(data): Json<ClosestRequest>,
) -> Result<Json<Vec<i64>>> {
    info!("正在搜索图片: {}", data.image_path);
    let ids = spawn_blocking(move || state.query.closest_ids(&data.image_path, data.count)).await??;
    Ok(Json(ids))
}

/// 搜索上传的图片
#[utoipa::path(
    post,
    path = "/search",
    request_body(content = SearchForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = [i64]),
        (status = 400, body = ErrorResponse),
        (status = 500, body = ErrorResponse),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    TypedMultipart(data): TypedMultipart<SearchRequest>,
) -> Result<Json<Vec<i64>>> {
    info!("正在搜索上传图片: {} 字节", data.file.len());
    let ids =
        spawn_blocking(move || state.query.closest_ids_from_bytes(&data.file, data.count)).await??;
    Ok(Json(ids))
}

/// Prometheus 指标
#[utoipa::path(get, path = "/metrics", responses((status = 200, body = String)))]
pub async fn metrics_handler() -> String {
    metrics::gather_text()
}
