use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::error;

use super::types::ErrorResponse;
use crate::query::{FaultKind, QueryError};

/// API错误类型
pub struct AppError(pub anyhow::Error);

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// 错误分类对应的 HTTP 状态码
pub fn status_for(kind: FaultKind) -> StatusCode {
    match kind {
        FaultKind::InvalidInput => StatusCode::BAD_REQUEST,
        FaultKind::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        FaultKind::DimensionMismatch | FaultKind::DegenerateVector | FaultKind::ExtractionFailed => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind) = match self.0.downcast_ref::<QueryError>() {
            Some(e) => (status_for(e.kind()), e.kind().code()),
            None => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            error!("请求处理失败 [{kind}]: {:#}", self.0);
        }
        let body = ErrorResponse { kind: kind.to_string(), detail: format!("{:#}", self.0) };
        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
