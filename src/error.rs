//! Crate-wide error hierarchy and its conversion to admin-surface HTTP
//! responses.
//!
//! Every per-request error is recoverable and converts to a response; it
//! never panics or tears down the listener. Only startup/shutdown failures
//! are fatal to the process (see `main.rs`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed admin JSON, unknown mapping id, invalid matcher.
    #[error("{message}")]
    ClientError { status: u16, message: String },

    #[error("mapping {0} not found")]
    MappingNotFound(Uuid),

    #[error("scenario {0:?} not found")]
    ScenarioNotFound(String),

    /// Upstream timeout or connection failure during proxying.
    #[error("proxy request failed: {0}")]
    Proxy(#[from] reqwest::Error),

    /// Malformed placeholder or evaluator failure.
    #[error("template rendering failed: {0}")]
    Template(#[from] handlebars::RenderError),

    #[error("invalid matcher configuration: {0}")]
    InvalidMatcher(#[from] crate::matcher::MatcherError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::ClientError {
            status: 400,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::ClientError { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST)
            }
            Error::MappingNotFound(_) | Error::ScenarioNotFound(_) => StatusCode::NOT_FOUND,
            Error::Proxy(_) => StatusCode::BAD_GATEWAY,
            Error::Template(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::InvalidMatcher(_) => StatusCode::BAD_REQUEST,
            Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": status.canonical_reason().unwrap_or("Error"),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}
