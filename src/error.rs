//! API Error Types
//! エラー分類を HTTP ステータスに対応付ける
//!
//! Validation → 400 / Forbidden → 403 / NotFound → 404 /
//! Conflict・Precondition → 409 / Internal → 500（内部情報は返さない）

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// エラーレスポンスボディ: `{ "error": "...", "details": ... }`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Error, Debug)]
pub enum ApiError {
    /// 入力不正（範囲外の金額、最低オファー額未満など）
    #[error("validation error: {0}")]
    Validation(String),

    /// リソースに対する権限がない（売り手でない、買い手でないなど）
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// リソースが存在しない
    #[error("not found: {0}")]
    NotFound(String),

    /// 現在のステータスが遷移を許さない（状態機械違反）
    #[error("conflict: {0}")]
    Conflict(String),

    /// 前提条件未達（支払前の発送など）
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// 内部エラー。メッセージはログのみ、クライアントには返さない。
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) | Self::Precondition(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // 内部エラーの詳細はクライアントに漏らさない
        let message = match &self {
            Self::Internal(_) => {
                tracing::error!(error = %self, "internal server error");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorBody {
            error: message,
            details: None,
        };

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Self::NotFound("resource not found".to_string()),
            other => Self::Internal(format!("DB error: {}", other)),
        }
    }
}
