use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Error kinds produced anywhere in the admission-and-dispatch pipeline.
///
/// Validation errors ([`SimError::ParseError`], [`SimError::ToolSchemaError`],
/// [`SimError::UnknownModel`], [`SimError::InvalidRequest`]) are raised before a request ever
/// reaches the queue and never touch capacity accounting. [`SimError::InternalGenerationError`]
/// and [`SimError::ResponseSerializationError`] are raised after admission; callers are
/// responsible for still releasing capacity and LoRA ref-counts on that path.
#[derive(thiserror::Error, Debug, Clone)]
pub enum SimError {
    #[error("failed to read and parse request body")]
    ParseError,

    #[error("{0}")]
    ToolSchemaError(String),

    #[error("The model `{0}` does not exist.")]
    UnknownModel(String),

    #[error("{0}")]
    InvalidRequest(String),

    /// Preserves the upstream behavior of concatenating a fixed prefix directly onto the
    /// underlying error with no separator.
    #[error("{prefix}{cause}")]
    InternalGenerationError { prefix: &'static str, cause: String },

    #[error("failed to serialize response")]
    ResponseSerializationError,
}

impl SimError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SimError::ParseError
            | SimError::ToolSchemaError(_)
            | SimError::InvalidRequest(_)
            | SimError::InternalGenerationError { .. } => StatusCode::BAD_REQUEST,
            SimError::UnknownModel(_) => StatusCode::NOT_FOUND,
            SimError::ResponseSerializationError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            SimError::ParseError
            | SimError::ToolSchemaError(_)
            | SimError::InvalidRequest(_)
            | SimError::InternalGenerationError { .. } => "BadRequestError",
            SimError::UnknownModel(_) => "NotFoundError",
            SimError::ResponseSerializationError => "InternalServerError",
        }
    }

    pub fn chat_generation(cause: impl std::fmt::Display) -> Self {
        SimError::InternalGenerationError {
            prefix: "failed to create chat response",
            cause: cause.to_string(),
        }
    }

    pub fn text_generation(cause: impl std::fmt::Display) -> Self {
        SimError::InternalGenerationError {
            prefix: "failed to create text response",
            cause: cause.to_string(),
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            object: "error",
            message: self.to_string(),
            error_type: self.error_type(),
            code: self.status_code().as_u16(),
            param: None,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorEnvelope {
    pub object: &'static str,
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: &'static str,
    pub code: u16,
    pub param: Option<String>,
}

impl IntoResponse for SimError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self.envelope())).into_response()
    }
}

pub type Result<T> = core::result::Result<T, SimError>;
