use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};

use crate::json_scanner::JsonShape;

/// Result alias for the application layer
pub type StudioResult<T> = Result<T, StudioError>;

/// Why a single raw model response could not be turned into JSON.
///
/// Every variant is retryable; the orchestrator in `llm_json` decides whether
/// another attempt is made.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("LLM returned an empty response")]
    EmptyResponse,

    #[error("No JSON object or array found in LLM response")]
    NoJsonFound,

    #[error("Expected a JSON {expected} but found {found}")]
    TypeMismatch { expected: JsonShape, found: String },

    #[error("JSON syntax error after repair: {message}")]
    SyntaxErrorAfterRepair { message: String, excerpt: String },

    #[error("Missing required keys: {}", .0.join(", "))]
    MissingRequiredKeys(Vec<String>),
}

impl ParseError {
    /// Stable identifier used in logs and API responses
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::EmptyResponse => "empty",
            ParseError::NoJsonFound => "no_json_found",
            ParseError::TypeMismatch { .. } => "type_mismatch",
            ParseError::SyntaxErrorAfterRepair { .. } => "syntax_error_after_repair",
            ParseError::MissingRequiredKeys(_) => "missing_required_keys",
        }
    }
}

/// Errors raised while talking to the LLM provider
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlmError {
    #[error("API key not configured for provider {0}")]
    MissingApiKey(String),

    #[error("Failed to send request to {provider}: {message}")]
    Transport { provider: String, message: String },

    #[error("{provider} returned status {status}: {body}")]
    Status { provider: String, status: u16, body: String },

    #[error("Failed to parse {provider} response: {message}")]
    Decode { provider: String, message: String },

    #[error("No response content from {0}")]
    EmptyChoices(String),
}

/// Failure of one orchestrator attempt
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AttemptError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Terminal failure after every attempt was used and no fallback was configured
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("LLM JSON request failed after {attempts} attempt(s): {last_error}")]
pub struct LlmJsonError {
    pub attempts: u32,
    pub last_error: AttemptError,
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

/// Main error type for the application layer
#[derive(Debug, thiserror::Error)]
pub enum StudioError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM provider error: {0}")]
    Llm(#[from] LlmError),

    #[error(transparent)]
    LlmJson(#[from] LlmJsonError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidState(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl StudioError {
    pub fn kind(&self) -> &'static str {
        match self {
            StudioError::Config(_) => "config_error",
            StudioError::Llm(_) => "llm_error",
            StudioError::LlmJson(_) => "llm_json_error",
            StudioError::Parse(e) => e.kind(),
            StudioError::Validation(_) => "validation_error",
            StudioError::InvalidRequest(_) => "invalid_request",
            StudioError::NotFound(_) => "not_found",
            StudioError::InvalidState(_) => "invalid_state",
            StudioError::Internal(_) => "internal_error",
        }
    }
}

/// JSON error body returned by the REST API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl From<&StudioError> for ErrorBody {
    fn from(error: &StudioError) -> Self {
        Self {
            error: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

impl ResponseError for StudioError {
    fn status_code(&self) -> StatusCode {
        match self {
            StudioError::NotFound(_) => StatusCode::NOT_FOUND,
            StudioError::InvalidRequest(_) | StudioError::Parse(_) => StatusCode::BAD_REQUEST,
            StudioError::Llm(_) | StudioError::LlmJson(_) => StatusCode::BAD_GATEWAY,
            StudioError::InvalidState(_) => StatusCode::CONFLICT,
            StudioError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            StudioError::Config(_) | StudioError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody::from(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_keys_message_names_keys() {
        let error = ParseError::MissingRequiredKeys(vec!["b".to_string(), "c".to_string()]);
        assert_eq!(error.to_string(), "Missing required keys: b, c");
        assert_eq!(error.kind(), "missing_required_keys");
    }

    #[test]
    fn test_terminal_error_carries_last_error() {
        let error = LlmJsonError {
            attempts: 3,
            last_error: AttemptError::Parse(ParseError::NoJsonFound),
        };
        assert_eq!(
            error.to_string(),
            "LLM JSON request failed after 3 attempt(s): No JSON object or array found in LLM response"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(StudioError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            StudioError::InvalidRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        let terminal = StudioError::from(LlmJsonError {
            attempts: 1,
            last_error: AttemptError::Parse(ParseError::EmptyResponse),
        });
        assert_eq!(terminal.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(terminal.kind(), "llm_json_error");
    }
}
