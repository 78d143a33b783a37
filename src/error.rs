//! Error type shared by every handler.
//!
//! Handlers return `Result<_, AppError>`; the `IntoResponse` impl turns each
//! variant into its status code and a `{error, details?}` JSON body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed input.
    #[error("{0}")]
    Validation(String),

    /// Username or email already taken.
    #[error("{0}")]
    Conflict(String),

    /// Bad credentials, disabled account, missing or invalid token.
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    /// Third-party identity token failed validation.
    #[error("{message}: {details}")]
    ExternalVerification { message: String, details: String },

    /// Anything unexpected. `context` names the operation that failed.
    #[error("{context}: {source}")]
    Internal {
        context: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        AppError::Conflict(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        AppError::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound(message.into())
    }

    /// Builds a `map_err` adapter tagging an unexpected failure with the
    /// operation it interrupted.
    pub fn internal<E>(context: &'static str) -> impl FnOnce(E) -> AppError
    where
        E: Into<anyhow::Error>,
    {
        move |e| AppError::Internal {
            context,
            source: e.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::Conflict(_)
            | AppError::ExternalVerification { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            AppError::Validation(msg)
            | AppError::Conflict(msg)
            | AppError::Unauthorized(msg)
            | AppError::NotFound(msg) => ErrorResponse {
                error: msg,
                details: None,
            },
            AppError::ExternalVerification { message, details } => ErrorResponse {
                error: message,
                details: Some(details),
            },
            AppError::Internal { context, source } => {
                tracing::error!(error = ?source, "{context}");
                ErrorResponse {
                    error: context.to_string(),
                    details: Some(source.to_string()),
                }
            }
        };
        (status, Json(body)).into_response()
    }
}
