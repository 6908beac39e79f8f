use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::AllModelsFailed;

/// API错误类型
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // 所有模型全部失败映射为网关错误，参数问题映射为 400
        if self.0.downcast_ref::<AllModelsFailed>().is_some() {
            return (StatusCode::BAD_GATEWAY, format!("{}", self.0)).into_response();
        }
        if self.0.downcast_ref::<BadRequest>().is_some() {
            return (StatusCode::BAD_REQUEST, format!("{}", self.0)).into_response();
        }
        (StatusCode::INTERNAL_SERVER_ERROR, format!("Something went wrong: {}", self.0))
            .into_response()
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

/// 请求参数错误
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct BadRequest(pub String);

pub type Result<T> = std::result::Result<T, AppError>;
