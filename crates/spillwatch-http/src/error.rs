//! Maps the domain error taxonomy onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use spillwatch_types::SpillwatchError;

/// Handler error: a [`SpillwatchError`] rendered as status code plus short
/// plain-text message.
#[derive(Debug)]
pub struct ApiError(pub SpillwatchError);

impl From<SpillwatchError> for ApiError {
    fn from(err: SpillwatchError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            SpillwatchError::Unauthorized => StatusCode::UNAUTHORIZED,
            SpillwatchError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            SpillwatchError::StreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            SpillwatchError::DuplicateTimestamp(_) => StatusCode::CONFLICT,
            SpillwatchError::Persistence(_)
            | SpillwatchError::Configuration(_)
            | SpillwatchError::Ops(_)
            | SpillwatchError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match &self.0 {
            SpillwatchError::Unauthorized => "Unauthorized".into(),
            SpillwatchError::InvalidImage(_) => "Invalid image data".into(),
            SpillwatchError::StreamUnavailable(reason) => format!("No active stream: {reason}"),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(
                status = %status,
                error_code = self.0.code(),
                error = %self.0,
                "Request error"
            );
        } else {
            tracing::warn!(
                status = %status,
                error_code = self.0.code(),
                error = %self.0,
                "Request rejected"
            );
        }
        (status, self.message()).into_response()
    }
}
