//! API error handling and the response envelope
//!
//! Every response body is wrapped the same way:
//!
//! ```json
//! {"status": "SUCCESS", "timestamp": "2024-05-01 12:00:00", "data": {...}}
//! {"status": "ERROR", "timestamp": "2024-05-01 12:00:00", "errorCode": "TOKEN_EXPIRED", "description": "..."}
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::auth::jwt::TokenError;
use crate::auth::password::PasswordError;
use crate::auth::repository::RepositoryError;
use crate::mail::MailError;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Successful response body
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always "SUCCESS"
    pub status: String,
    pub timestamp: String,
    pub data: T,
}

impl<T: Serialize> SuccessEnvelope<T> {
    pub fn new(data: T) -> Self {
        Self {
            status: "SUCCESS".to_string(),
            timestamp: timestamp(),
            data,
        }
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    /// Always "ERROR"
    pub status: String,
    pub timestamp: String,
    /// Stable machine-readable code
    pub error_code: String,
    /// Human-readable description
    pub description: String,
}

impl ErrorEnvelope {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            status: "ERROR".to_string(),
            timestamp: timestamp(),
            error_code: code.into(),
            description: description.into(),
        }
    }
}

/// 200 with the success envelope
pub fn ok<T: Serialize>(data: T) -> (StatusCode, Json<SuccessEnvelope<T>>) {
    (StatusCode::OK, Json(SuccessEnvelope::new(data)))
}

/// 201 with the success envelope
pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<SuccessEnvelope<T>>) {
    (StatusCode::CREATED, Json(SuccessEnvelope::new(data)))
}

/// Application error type
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Email already in use")]
    EmailAlreadyExists,

    #[error("Username already in use")]
    UsernameAlreadyExists,

    #[error("{0}")]
    InvalidCredentials(String),

    #[error("Account has not been verified")]
    AccountNotVerified,

    #[error("Account is already verified")]
    UserAlreadyVerified,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Invalid token")]
    TokenInvalid,

    #[error("Token has already been used")]
    TokenAlreadyUsed,

    #[error("Missing or malformed Authorization header")]
    MissingToken,

    #[error("No authenticated user")]
    NoAuthenticatedUser,

    /// Session token presented at the gate has expired
    #[error("Session token has expired")]
    SessionExpired,

    /// Session token presented at the gate failed verification
    #[error("Invalid session token")]
    SessionInvalid,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    /// Field-level validation failures, already formatted
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    CategoryAlreadyExists(String),

    #[error("Mail delivery failed: {0}")]
    Mail(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::EmailAlreadyExists
            | AppError::UsernameAlreadyExists
            | AppError::UserAlreadyVerified
            | AppError::CategoryAlreadyExists(_) => StatusCode::CONFLICT,
            AppError::InvalidCredentials(_)
            | AppError::MissingToken
            | AppError::NoAuthenticatedUser
            | AppError::SessionExpired
            | AppError::SessionInvalid => StatusCode::UNAUTHORIZED,
            AppError::AccountNotVerified | AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::TokenExpired
            | AppError::TokenInvalid
            | AppError::TokenAlreadyUsed
            | AppError::BadRequest(_)
            | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Mail(_) | AppError::Internal(_) | AppError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::EmailAlreadyExists => "EMAIL_ALREADY_EXISTS",
            AppError::UsernameAlreadyExists => "USERNAME_ALREADY_EXISTS",
            AppError::InvalidCredentials(_) => "INVALID_CREDENTIALS",
            AppError::AccountNotVerified => "ACCOUNT_NOT_VERIFIED",
            AppError::UserAlreadyVerified => "USER_ALREADY_VERIFIED",
            AppError::TokenExpired | AppError::SessionExpired => "TOKEN_EXPIRED",
            AppError::TokenInvalid | AppError::SessionInvalid => "TOKEN_INVALID",
            // Kept apart from TOKEN_INVALID so clients can tell a replayed
            // link from a forged one. Both answer 400.
            AppError::TokenAlreadyUsed => "TOKEN_ALREADY_USED",
            AppError::MissingToken => "MISSING_TOKEN",
            AppError::NoAuthenticatedUser => "NO_AUTH_USER",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::CategoryAlreadyExists(_) => "CATEGORY_ALREADY_EXISTS",
            AppError::Mail(_) => "MAIL_ERROR",
            AppError::Internal(_) | AppError::Database(_) => "INTERNAL_ERROR",
        }
    }

    /// Text returned to the client. Server-side failures get a generic
    /// message; the detail goes to the log only.
    pub fn description(&self) -> String {
        match self {
            AppError::Internal(_) | AppError::Database(_) => {
                "An unexpected error occurred".to_string()
            }
            AppError::Mail(_) => "The email could not be sent, please try again later".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
        }

        let body = ErrorEnvelope::new(self.code(), self.description());
        (status, Json(body)).into_response()
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::EmailAlreadyExists => AppError::EmailAlreadyExists,
            RepositoryError::UsernameAlreadyExists => AppError::UsernameAlreadyExists,
            RepositoryError::TokenAlreadyUsed => AppError::TokenAlreadyUsed,
            RepositoryError::AlreadyVerified => AppError::UserAlreadyVerified,
            RepositoryError::NotFound => AppError::NotFound("Record".to_string()),
            RepositoryError::Conflict(what) => {
                AppError::CategoryAlreadyExists(format!("A category with this {what} already exists"))
            }
            RepositoryError::DuplicateToken => {
                AppError::Internal("checkout token collision".to_string())
            }
            RepositoryError::Database(msg) => AppError::Database(msg),
        }
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AppError::TokenExpired,
            TokenError::Malformed | TokenError::InvalidSignature => AppError::TokenInvalid,
            TokenError::WeakKey | TokenError::Encoding(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<PasswordError> for AppError {
    fn from(err: PasswordError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<MailError> for AppError {
    fn from(err: MailError) -> Self {
        AppError::Mail(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(format_validation_errors(&errors))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// `[field] : message | [field] : message`, fields in name order
pub fn format_validation_errors(errors: &validator::ValidationErrors) -> String {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    fields
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                let message = e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string());
                format!("[{field}] : {message}")
            })
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use validator::Validate;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_error_envelope_shape() {
        let response = AppError::TokenAlreadyUsed.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert_eq!(json["status"], "ERROR");
        assert_eq!(json["errorCode"], "TOKEN_ALREADY_USED");
        assert!(json["description"].is_string());
        // yyyy-MM-dd HH:mm:ss
        assert_eq!(json["timestamp"].as_str().unwrap().len(), 19);
    }

    #[tokio::test]
    async fn test_internal_details_not_leaked() {
        let response = AppError::Database("relation \"accounts\" does not exist".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        assert_eq!(json["errorCode"], "INTERNAL_ERROR");
        assert!(!json["description"].as_str().unwrap().contains("accounts"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::EmailAlreadyExists.status(), StatusCode::CONFLICT);
        assert_eq!(AppError::UserAlreadyVerified.status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::InvalidCredentials("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AppError::AccountNotVerified.status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::TokenExpired.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::SessionExpired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::SessionExpired.code(), "TOKEN_EXPIRED");
        assert_eq!(AppError::NoAuthenticatedUser.code(), "NO_AUTH_USER");
        assert_eq!(AppError::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_repository_error_mapping() {
        assert!(matches!(
            AppError::from(RepositoryError::EmailAlreadyExists),
            AppError::EmailAlreadyExists
        ));
        assert!(matches!(
            AppError::from(RepositoryError::TokenAlreadyUsed),
            AppError::TokenAlreadyUsed
        ));
        assert!(matches!(
            AppError::from(RepositoryError::AlreadyVerified),
            AppError::UserAlreadyVerified
        ));
        assert!(matches!(
            AppError::from(RepositoryError::Conflict("slug".into())),
            AppError::CategoryAlreadyExists(_)
        ));
    }

    #[derive(Validate)]
    struct Sample {
        #[validate(email(message = "must be a valid email"))]
        email: String,
        #[validate(length(min = 3, message = "too short"))]
        username: String,
    }

    #[test]
    fn test_validation_description_format() {
        let sample = Sample {
            email: "nope".into(),
            username: "a".into(),
        };
        let err = AppError::from(sample.validate().unwrap_err());

        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(
            err.to_string(),
            "[email] : must be a valid email | [username] : too short"
        );
    }
}
