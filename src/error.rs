//! Error types surfaced by the dashboard.
//!
//! Every error ends up as a plain message string in a `{"error": ...}` body;
//! no structured codes are exposed to the UI.

use crate::config::ConfigError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

/// Asset host failures.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Media upload failed: {0}")]
    Network(String),

    #[error("Media upload error ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("Media upload returned no URL")]
    EmptyResult,
}

/// Publishing provider failures, carrying the provider's own message.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Network(String),

    #[error("Rate limited (429). {0}")]
    RateLimit(String),

    #[error("{0}")]
    Api(String),

    #[error("Failed to parse response: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("{0}")]
    Schedule(ProviderError),

    #[error("Failed to load dashboard data: {0}")]
    Fetch(ProviderError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
