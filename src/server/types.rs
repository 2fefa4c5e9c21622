use axum::body::Bytes;
use axum_typed_multipart::TryFromMultipart;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// 按路径搜索的请求参数
#[derive(Debug, Deserialize, ToSchema)]
pub struct ClosestRequest {
    /// 服务器本地的图片路径
    pub image_path: String,
    /// 返回的结果数量，不填为 3，小于等于 0 返回空列表
    #[serde(default)]
    pub count: Option<i64>,
}

/// 上传搜索的请求参数
#[derive(TryFromMultipart)]
pub struct SearchRequest {
    pub file: Bytes,
    pub count: Option<i64>,
}

/// 上传搜索表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchForm {
    /// 上传的图片文件
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
    /// 返回的结果数量
    pub count: Option<i64>,
}

/// 错误响应
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// 错误分类，例如 `invalid_input`
    pub kind: String,
    pub detail: String,
}
