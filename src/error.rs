use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Problems found in one item of a submitted ticket list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub index: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub invalid: Vec<&'static str>,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        details: Vec<FieldError>,
    },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Password error: {0}")]
    Password(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub fn ticket_not_found(id: i64) -> Self {
        Self::NotFound {
            entity_type: "Ticket",
            identifier: id.to_string(),
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Self::Validation { .. } | Self::MalformedPayload(_) | Self::BadRequest(_) => {
                Status::BadRequest
            }
            Self::NotFound { .. } => Status::NotFound,
            _ => Status::InternalServerError,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::MalformedPayload(_) => "malformed_payload",
            Self::BadRequest(_) => "bad_request",
            Self::NotFound { .. } => "not_found",
            _ => "internal_error",
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "<[FieldError]>::is_empty")]
    details: &'a [FieldError],
}

impl<'r> Responder<'r, 'static> for AppError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        // Internal details stay in the log.
        let message = if status == Status::InternalServerError {
            error!(error = %self, uri = %request.uri(), "request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        let details = match &self {
            Self::Validation { details, .. } => details.as_slice(),
            _ => &[],
        };
        let body = serde_json::to_value(ErrorBody {
            error: self.kind(),
            message,
            details,
        })
        .map_err(|_| Status::InternalServerError)?;
        (status, Json(body)).respond_to(request)
    }
}
