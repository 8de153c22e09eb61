use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Index out of range: {index}")]
    OutOfRange { index: String, count: usize },
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Invalid label: {0}")]
    InvalidLabel(String),
    #[error("Hardware fault: {0}")]
    HardwareFault(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl AppError {
    pub fn out_of_range(index: impl ToString, count: usize) -> Self {
        AppError::OutOfRange {
            index: index.to_string(),
            count,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::OutOfRange { .. } => "out_of_range",
            AppError::InvalidState(_) => "invalid_state",
            AppError::InvalidLabel(_) => "invalid_label",
            AppError::HardwareFault(_) => "hardware_fault",
            AppError::Config(_) => "config_error",
            AppError::Storage(_) => "storage_error",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::OutOfRange { .. } | AppError::InvalidState(_) | AppError::InvalidLabel(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::HardwareFault(_) | AppError::Config(_) | AppError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            AppError::OutOfRange { count, .. } => json!({
                "error": self.code(),
                "message": self.to_string(),
                "valid_indices": (0..*count).collect::<Vec<_>>(),
            }),
            _ => json!({ "error": self.code(), "message": self.to_string() }),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}
