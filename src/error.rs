use crate::io_struct::{ErrorOutput, ValidationErrors};
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

pub const UPSTREAM_FAILURE_MESSAGE: &str = "Failed to generate a response";

/// Failure talking to the completion API. All variants surface as a 500.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request to completion API failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("completion API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode completion API response: {0}")]
    Decode(String),

    #[error("completion stream failed: {0}")]
    Stream(String),
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid request: {0}")]
    Validation(ValidationErrors),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl From<ValidationErrors> for RelayError {
    fn from(errors: ValidationErrors) -> Self {
        RelayError::Validation(errors)
    }
}

impl ResponseError for RelayError {
    fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            RelayError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            RelayError::Validation(errors) => HttpResponse::BadRequest().json(errors),
            // detail stays in the log
            RelayError::Upstream(_) => HttpResponse::InternalServerError().json(ErrorOutput {
                error: UPSTREAM_FAILURE_MESSAGE.to_string(),
            }),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,

    #[error("temperature must be between 0.0 and 2.0, got {0}")]
    InvalidTemperature(f32),

    #[error("max output tokens must be greater than zero")]
    ZeroMaxOutputTokens,

    #[error("store capacity must be greater than zero")]
    ZeroStoreCapacity,
}
