use thiserror::Error;

use crate::auth::AuthError;
use crate::chart::ChartError;
use crate::downloader::ExportError;
use crate::graph::RenderError;
use crate::loader::DecodeError;
use crate::saving::StoreError;

#[cfg(feature = "web")]
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Failed to parse workbook: {0}")]
    Decode(#[from] DecodeError),

    #[error("Upload record not found.")]
    NotFound,

    #[error(transparent)]
    Chart(#[from] ChartError),

    #[error(transparent)]
    Unauthorized(#[from] AuthError),

    #[error("You do not have access to this upload.")]
    Forbidden,

    #[error("Internal error: {0}")]
    Internal(BoxError),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn internal(error: impl Into<BoxError>) -> Self {
        AppError::Internal(error.into())
    }
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(_) => AppError::NotFound,
            other => AppError::internal(other),
        }
    }
}

impl From<RenderError> for AppError {
    fn from(error: RenderError) -> Self {
        AppError::internal(error)
    }
}

impl From<ExportError> for AppError {
    fn from(error: ExportError) -> Self {
        match error {
            ExportError::UnknownFormat(_) => AppError::validation(error.to_string()),
            other => AppError::internal(other),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        AppError::internal(error)
    }
}

#[cfg(feature = "web")]
impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Chart(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Decode(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(feature = "web")]
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = match &self {
            AppError::Internal(e) => {
                tracing::error!("Request failed: {e}");
                "Internal server error".to_string()
            }
            other => {
                tracing::debug!(%status, "Request rejected: {other}");
                other.to_string()
            }
        };

        (status, Json(serde_json::json!({ "message": message }))).into_response()
    }
}
