use thiserror::Error;

use crate::http::response::{Response, StatusCode};

/// Failures while forwarding a single request.
///
/// None of these are fatal to the process; each one becomes an error
/// response for the request that caused it.
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("Upstream base URL is not configured")]
    MissingBaseUrl,

    #[error("Invalid upstream target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("Invalid path segment {0:?}")]
    InvalidSegment(String),

    #[error("Upstream did not respond in time")]
    Timeout,

    #[error("Upstream request failed: {0}")]
    Transport(String),
}

impl ForwardError {
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::MissingBaseUrl | ForwardError::InvalidTarget { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ForwardError::InvalidSegment(_) => StatusCode::BAD_REQUEST,
            ForwardError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ForwardError::Transport(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// True for errors caused by configuration rather than the network.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            ForwardError::MissingBaseUrl | ForwardError::InvalidTarget { .. }
        )
    }

    /// Error response with a `{"detail": ...}` body.
    pub fn into_response(self) -> Response {
        Response::detail(self.status(), &self.to_string())
    }
}

impl From<reqwest::Error> for ForwardError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ForwardError::Timeout
        } else if e.is_builder() {
            ForwardError::InvalidTarget {
                target: e.url().map(|u| u.to_string()).unwrap_or_default(),
                reason: e.to_string(),
            }
        } else {
            ForwardError::Transport(e.to_string())
        }
    }
}
