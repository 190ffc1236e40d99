use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Error returned by every HTTP handler. Rendered as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn extractor_unavailable() -> Self {
        Self::internal("yt-dlp is not installed on the server.")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });

        (self.status, body).into_response()
    }
}

/// Failures of a single extractor invocation.
#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    #[error("extractor binary not found")]
    Unavailable,
    #[error("could not start extractor: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("extractor exited with an error: {0}")]
    Failed(String),
    #[error("extractor did not finish within {0} seconds")]
    TimedOut(u64),
    #[error("could not parse extractor output: {0}")]
    Parse(#[from] serde_json::Error),
}

impl From<ExtractorError> for ApiError {
    fn from(error: ExtractorError) -> Self {
        match error {
            ExtractorError::Unavailable => ApiError::extractor_unavailable(),
            ExtractorError::Spawn(_) | ExtractorError::Failed(_) => {
                ApiError::internal("The extractor failed to process the video.")
            }
            ExtractorError::TimedOut(_) => {
                ApiError::internal("The extractor did not finish in time.")
            }
            ExtractorError::Parse(_) => ApiError::internal("Failed to parse the video information."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extractor_errors_are_server_errors() {
        let errors = [
            ExtractorError::Unavailable,
            ExtractorError::Failed("ERROR: boom".to_string()),
            ExtractorError::TimedOut(30),
        ];

        for error in errors {
            let api: ApiError = error.into();
            assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[test]
    fn parse_failures_keep_a_distinct_message() {
        let parse_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let api: ApiError = ExtractorError::from(parse_error).into();
        assert_eq!(api.message, "Failed to parse the video information.");
    }
}
