//! Error types for homeledger-api

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use homeledger_core::{CoreError, ErrorCode, ErrorDetails};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Core(e) => match e.code() {
                ErrorCode::BatchNotFound => StatusCode::NOT_FOUND,
                ErrorCode::InvalidState => StatusCode::CONFLICT,
                ErrorCode::FormatError | ErrorCode::RowParseError => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorCode::DuplicateViolation => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn details(&self) -> ErrorDetails {
        match self {
            ApiError::Core(e) => e.to_details(),
            ApiError::BadRequest { .. } => ErrorDetails::new(ErrorCode::FormatError, self.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!(target: "homeledger::api", "{}", self);
        } else {
            log::debug!(target: "homeledger::api", "{}: {}", status, self);
        }
        (status, Json(self.details())).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
