use std::collections::BTreeMap;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

/// Error taxonomy surfaced by every HTTP handler. The socket gateway reuses
/// the same type and forwards the message as an `Error` acknowledgment.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("validation failed")]
    Validation(BTreeMap<String, String>),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn unauthorized(msg: &str) -> Self {
        ApiError::Unauthorized(msg.to_string())
    }

    pub fn bad_request(msg: &str) -> Self {
        ApiError::BadRequest(msg.to_string())
    }

    pub fn field(field: &str, msg: &str) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(field.to_string(), msg.to_string());
        ApiError::Validation(errors)
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::Database(_) | ApiError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    status: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<&'a BTreeMap<String, String>>,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("{}", self);
        }
        let body = ErrorBody {
            status: if status.is_server_error() { "error" } else { "fail" },
            message: self.public_message(),
            errors: match self {
                ApiError::Validation(map) => Some(map),
                _ => None,
            },
        };
        HttpResponse::build(status).json(body)
    }
}

/// The store signals unique-index violations with write error code 11000.
pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == 11000
    )
}
