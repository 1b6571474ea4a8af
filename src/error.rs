use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::db::StoreError;
use crate::types::{ApiErrorCode, ApiErrorResponse};

#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    Db(sqlx::Error),
    Internal(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn code(&self) -> ApiErrorCode {
        match self {
            Self::Validation(_) => ApiErrorCode::Validation,
            Self::Unauthorized(_) => ApiErrorCode::Unauthorized,
            Self::NotFound(_) => ApiErrorCode::NotFound,
            Self::Conflict(_) => ApiErrorCode::Conflict,
            Self::Db(_) => ApiErrorCode::Database,
            Self::Internal(_) => ApiErrorCode::Internal,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Db(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(message) => Self::Conflict(message),
            StoreError::Db(db) => Self::Db(db),
            StoreError::NotFound(message) => Self::NotFound(message),
            StoreError::Parse(message) => Self::Internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = match self {
            Self::Db(err) => {
                tracing::error!(error = %err, "database error");
                "database error".to_string()
            }
            Self::Internal(message) => {
                tracing::error!(%message, "internal error");
                "internal error".to_string()
            }
            Self::Validation(message)
            | Self::Unauthorized(message)
            | Self::NotFound(message)
            | Self::Conflict(message) => message,
        };

        (status, Json(ApiErrorResponse { code, message })).into_response()
    }
}
