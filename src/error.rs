//! Error types for Stacks server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Partial unique index guarding one open checkout per (member, book)
pub const OPEN_TRANSACTION_INDEX: &str = "transactions_one_open_per_member_book";

const SQLSTATE_SERIALIZATION_FAILURE: &str = "40001";
const SQLSTATE_DEADLOCK_DETECTED: &str = "40P01";
const SQLSTATE_UNIQUE_VIOLATION: &str = "23505";

/// Stable error codes carried in every error body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    NotAuthorized = 2,
    DbFailure = 3,
    NotFound = 4,
    Duplicate = 5,
    BadValue = 6,
    DuplicateCheckout = 7,
    NoCopiesAvailable = 8,
    NotCheckedOut = 9,
    TransactionConflict = 10,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Business rule violation: {0}")]
    BusinessRule(String),

    #[error("Book {book_id} is already checked out by member {member_id}")]
    DuplicateCheckout { member_id: i32, book_id: i32 },

    #[error("No copies of book {book_id} are available")]
    NoCopiesAvailable { book_id: i32 },

    #[error("Book {book_id} is not checked out by member {member_id}")]
    NotCheckedOut { member_id: i32, book_id: i32 },

    /// The store aborted the transaction because of concurrent contention.
    /// Safe to retry.
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),
}

impl AppError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::TransactionConflict(_))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            match db_err.code().as_deref() {
                Some(SQLSTATE_SERIALIZATION_FAILURE) | Some(SQLSTATE_DEADLOCK_DETECTED) => {
                    return AppError::TransactionConflict(db_err.message().to_string());
                }
                Some(SQLSTATE_UNIQUE_VIOLATION) => {
                    // The open-checkout index is reported by the ledger itself;
                    // callers that hit it mid-flight lost the race.
                    if db_err.constraint() == Some(OPEN_TRANSACTION_INDEX) {
                        return AppError::TransactionConflict(db_err.message().to_string());
                    }
                    return AppError::Conflict(
                        db_err
                            .constraint()
                            .map(|c| format!("Unique constraint {} violated", c))
                            .unwrap_or_else(|| "Unique constraint violated".to_string()),
                    );
                }
                _ => {}
            }
        }
        AppError::Database(err)
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, ErrorCode) {
        match self {
            AppError::Authentication(_) => (StatusCode::UNAUTHORIZED, ErrorCode::NotAuthorized),
            AppError::Authorization(_) => (StatusCode::FORBIDDEN, ErrorCode::NotAuthorized),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, ErrorCode::NotFound),
            AppError::Validation(_) | AppError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, ErrorCode::BadValue)
            }
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::DbFailure),
            AppError::Conflict(_) => (StatusCode::CONFLICT, ErrorCode::Duplicate),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::Failure),
            AppError::BusinessRule(_) => (StatusCode::UNPROCESSABLE_ENTITY, ErrorCode::Failure),
            AppError::DuplicateCheckout { .. } => {
                (StatusCode::CONFLICT, ErrorCode::DuplicateCheckout)
            }
            AppError::NoCopiesAvailable { .. } => {
                (StatusCode::CONFLICT, ErrorCode::NoCopiesAvailable)
            }
            AppError::NotCheckedOut { .. } => (StatusCode::CONFLICT, ErrorCode::NotCheckedOut),
            AppError::TransactionConflict(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::TransactionConflict)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                "Database error".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
            AppError::Authentication(msg)
            | AppError::Authorization(msg)
            | AppError::NotFound(msg)
            | AppError::Validation(msg)
            | AppError::Conflict(msg)
            | AppError::BadRequest(msg)
            | AppError::BusinessRule(msg)
            | AppError::TransactionConflict(msg) => msg.clone(),
            other => other.to_string(),
        };

        let body = Json(ErrorResponse {
            code: code as u32,
            error: format!("{:?}", code),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
