mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use self::state::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::ping_handler,
        api::closest_img_ids_handler,
        api::search_handler,
        api::metrics_handler,
    ),
    components(schemas(types::ClosestRequest, types::SearchForm, types::ErrorResponse))
)]
pub struct ApiDoc;

/// 构建API服务器，`body_limit` 为上传大小限制，单位为字节
pub fn create_app(state: Arc<AppState>, body_limit: usize) -> Router {
    Router::new()
        .route("/ping", get(api::ping_handler))
        .route("/closest_img_ids", post(api::closest_img_ids_handler))
        .route("/search", post(api::search_handler))
        .route("/metrics", get(api::metrics_handler))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state)
}
