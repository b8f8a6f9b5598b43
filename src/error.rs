use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::tumor_model::ModelError;

pub const NO_IMAGE_MESSAGE: &str = "No image uploaded";

/// Everything that can end a classification request early.
#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("{}", NO_IMAGE_MESSAGE)]
    NoFile,

    #[error("Uploaded file is not a readable image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Malformed upload: {0}")]
    MalformedUpload(String),

    #[error("Upload too large: {0}")]
    UploadTooLarge(String),

    #[error("Inference failed: {0}")]
    Inference(#[from] ModelError),

    #[error("Scratch storage failed: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ClassifyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ClassifyError::NoFile
            | ClassifyError::Decode(_)
            | ClassifyError::MalformedUpload(_) => StatusCode::BAD_REQUEST,
            ClassifyError::UploadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ClassifyError::Inference(_)
            | ClassifyError::Filesystem(_)
            | ClassifyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ClassifyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {} ({})", self, status);
        } else {
            tracing::warn!("Request rejected: {} ({})", self, status);
        }

        let body = serde_json::json!({ "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Reasons the server cannot come up. All of these are fatal.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Failed to load model: {0}")]
    Model(#[from] ModelError),

    #[error("Invalid CORS origin: '{0}'")]
    InvalidOrigin(String),

    #[error("Failed to bind to address {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("Server failed: {0}")]
    Serve(std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_and_server_errors_are_split() {
        assert_eq!(ClassifyError::NoFile.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ClassifyError::MalformedUpload("eof".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ClassifyError::Inference(ModelError::OutputShape(vec![1, 3])).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ClassifyError::Filesystem(std::io::Error::other("disk full")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn model_load_failure_becomes_startup_error() {
        let err: StartupError = ModelError::InvalidPath("model/model.onnx".into()).into();
        assert!(matches!(err, StartupError::Model(ModelError::InvalidPath(_))));
        assert!(err.to_string().starts_with("Failed to load model"));
    }

    #[test]
    fn no_file_message_is_exact() {
        assert_eq!(ClassifyError::NoFile.to_string(), NO_IMAGE_MESSAGE);
    }
}
