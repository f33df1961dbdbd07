//! Error handling for the API.
//!
//! Model code returns [`AppResult`]. GraphQL resolvers turn an [`AppError`]
//! into a response error with `.extend()`, which attaches a `code` extension
//! the frontend uses to pick the toast to show. The file routes use the
//! [`IntoResponse`] impl instead.

use async_graphql::ErrorExtensions;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// The error enum for all error handling across the API.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// \[400\] Input failed validation before anything was written.
    #[error("{0}")]
    Validation(String),
    /// \[404\] The requested row does not exist.
    #[error("{0}")]
    NotFound(String),
    /// \[401\] The operation requires a logged-in user.
    #[error("login required")]
    Unauthorized,
    /// \[403\] The current user's role or branch does not allow the operation.
    #[error("access forbidden{}", .0.as_ref().map(|reason| format!(": {}", reason)).unwrap_or_default())]
    Forbidden(Option<String>),
    /// \[409\] The operation conflicts with existing state (duplicate sign-up, full event).
    #[error("{0}")]
    Conflict(String),
    /// \[409\] A reviewed hours request cannot be reviewed again.
    #[error("hours request has already been {0}")]
    InvalidTransition(String),
    /// \[403\] The protected branch cannot be edited or deleted.
    #[error("the {0} branch cannot be edited or deleted")]
    ProtectedBranch(String),
    /// \[500\] The database rejected a query.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// \[500\] Reading or writing stored files failed.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
    /// \[500\] An email could not be rendered or sent.
    #[error("email error: {0}")]
    Email(String),
    /// \[500\] A password could not be hashed or verified.
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound(message.into())
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        AppError::Forbidden(Some(reason.into()))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        AppError::Conflict(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::Conflict(_) => "CONFLICT",
            AppError::InvalidTransition(_) => "INVALID_TRANSITION",
            AppError::ProtectedBranch(_) => "PROTECTED_BRANCH",
            AppError::Database(_) => "DATABASE",
            AppError::Storage(_) => "STORAGE",
            AppError::Email(_) => "EMAIL",
            AppError::Hash(_) => "SERVER",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::ProtectedBranch(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) | AppError::InvalidTransition(_) => StatusCode::CONFLICT,
            AppError::Database(_)
            | AppError::Storage(_)
            | AppError::Email(_)
            | AppError::Hash(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Server-side failures are reported generically; their details go to the log.
    fn public_message(&self) -> String {
        if self.status().is_server_error() {
            tracing::error!("{}", self);
            "an unexpected error occurred".to_owned()
        } else {
            self.to_string()
        }
    }
}

impl ErrorExtensions for AppError {
    fn extend(&self) -> async_graphql::Error {
        async_graphql::Error::new(self.public_message()).extend_with(|_, extensions| {
            extensions.set("code", self.code());
        })
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "message": self.public_message(),
            "code": self.code(),
            "statusCode": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_includes_reason_when_given() {
        assert_eq!(AppError::Forbidden(None).to_string(), "access forbidden");
        assert_eq!(
            AppError::forbidden("admins only").to_string(),
            "access forbidden: admins only"
        );
    }

    #[test]
    fn client_errors_keep_their_message() {
        let error = AppError::conflict("Event is full").extend();
        assert_eq!(error.message, "Event is full");
    }

    #[test]
    fn server_errors_are_reported_generically() {
        let error = AppError::Email("mailgun down".to_owned()).extend();
        assert_eq!(error.message, "an unexpected error occurred");
        assert_eq!(
            AppError::Email(String::new()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
