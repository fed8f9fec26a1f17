use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::upstream::UpstreamError;

pub const TEXT_REQUIRED_MESSAGE: &str = "Le champ 'text' est requis.";
pub const INVALID_AI_OUTPUT_MESSAGE: &str = "AI did not return valid JSON. Adjust prompt.";
pub const UPSTREAM_FAILED_MESSAGE: &str = "OpenAI request failed";
pub const SERVER_ERROR_MESSAGE: &str = "Server error";

/// Characters of unparseable model output echoed back for diagnosis.
pub const RAW_PREVIEW_CHARS: usize = 2000;

/// JSON body of every error response. Diagnostic fields are only set for
/// server-side and upstream failures.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl ErrorBody {
    pub fn message(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
            raw: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AnalyzeError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("request body too large")]
    PayloadTooLarge,
    #[error("server misconfigured: OPENAI_API_KEY missing")]
    Misconfigured,
    #[error("upstream request failed: {0}")]
    BadGateway(String),
    #[error("upstream output is not valid JSON")]
    InvalidAiOutput { raw: String },
    #[error("internal error: {0}")]
    Internal(String),
}

impl AnalyzeError {
    pub fn text_required() -> Self {
        AnalyzeError::BadRequest(TEXT_REQUIRED_MESSAGE.to_string())
    }

    pub fn text_too_long(max_chars: usize) -> Self {
        AnalyzeError::BadRequest(format!(
            "Texte trop long (max {} caractères).",
            max_chars
        ))
    }

    pub fn invalid_ai_output(raw: &str) -> Self {
        AnalyzeError::InvalidAiOutput {
            raw: raw.chars().take(RAW_PREVIEW_CHARS).collect(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AnalyzeError::Unauthorized => StatusCode::UNAUTHORIZED,
            AnalyzeError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AnalyzeError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AnalyzeError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AnalyzeError::Misconfigured
            | AnalyzeError::InvalidAiOutput { .. }
            | AnalyzeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorBody {
        match self {
            AnalyzeError::Unauthorized => ErrorBody::message("Unauthorized"),
            AnalyzeError::BadRequest(msg) => ErrorBody::message(msg.clone()),
            AnalyzeError::PayloadTooLarge => ErrorBody::message("Request too large"),
            AnalyzeError::Misconfigured => {
                ErrorBody::message("Server misconfigured: missing OPENAI_API_KEY")
            }
            AnalyzeError::BadGateway(details) => ErrorBody {
                error: UPSTREAM_FAILED_MESSAGE.to_string(),
                details: Some(details.clone()),
                raw: None,
            },
            AnalyzeError::InvalidAiOutput { raw } => ErrorBody {
                error: INVALID_AI_OUTPUT_MESSAGE.to_string(),
                details: None,
                raw: Some(raw.clone()),
            },
            AnalyzeError::Internal(details) => ErrorBody {
                error: SERVER_ERROR_MESSAGE.to_string(),
                details: Some(details.clone()),
                raw: None,
            },
        }
    }
}

impl From<UpstreamError> for AnalyzeError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Status { body, .. } => AnalyzeError::BadGateway(body),
            UpstreamError::Transport(_) | UpstreamError::Timeout => {
                AnalyzeError::BadGateway(err.to_string())
            }
            UpstreamError::Decode(_) | UpstreamError::Client(_) => {
                AnalyzeError::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for AnalyzeError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
