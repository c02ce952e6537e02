//! Error type shared by every pipeline step and HTTP handler.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    /// Missing or empty request field. The only client-fault variant.
    #[error("{0}")]
    Validation(String),

    /// JSON body that could not be parsed into the handler's request type.
    #[error("Invalid request body: {0}")]
    Body(String),

    #[error("Invalid image data: {0}")]
    InvalidImageData(String),

    #[error("Image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("OCR failed: {0}")]
    Ocr(String),

    #[error("PDF generation failed: {0}")]
    Pdf(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    fn category(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "Bad request",
            AppError::Body(_) => "Invalid request body",
            AppError::InvalidImageData(_) => "Invalid image data",
            AppError::Image(_) => "Image processing failed",
            AppError::Ocr(_) => "OCR failed",
            AppError::Pdf(_) => "PDF generation failed",
            AppError::Io(_) => "IO error",
            AppError::Task(_) => "Something went wrong!",
        }
    }
}

impl From<lopdf::Error> for AppError {
    fn from(e: lopdf::Error) -> Self {
        AppError::Pdf(e.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Body(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            _ => {
                tracing::error!("Request failed: {}", self);
                let body = json!({
                    "error": self.category(),
                    "message": self.to_string(),
                });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}
