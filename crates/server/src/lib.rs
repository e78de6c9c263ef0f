//! Parley server
//!
//! WebSocket sessions, the session registry and the HTTP surface.

pub mod handler;
pub mod http;
pub mod metrics;
pub mod rate_limit;
pub mod session;
pub mod state;
pub mod websocket;

pub use handler::MessageHandler;
pub use http::create_router;
pub use crate::metrics::init_metrics;
pub use rate_limit::RateLimiter;
pub use session::SessionRegistry;
pub use state::AppState;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Session error: {0}")]
    Session(String),

    #[error("Session limit reached ({0} active)")]
    Capacity(usize),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Session(_) => axum::http::StatusCode::NOT_FOUND,
            ServerError::Capacity(_) => axum::http::StatusCode::SERVICE_UNAVAILABLE,
            ServerError::RateLimit => axum::http::StatusCode::TOO_MANY_REQUESTS,
            ServerError::InvalidRequest(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ServerError> for parley_core::Error {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::RateLimit => parley_core::Error::RateLimited,
            ServerError::InvalidRequest(message) => parley_core::Error::Validation(message),
            ServerError::Session(message) => parley_core::Error::Session(message),
            other => parley_core::Error::Other(other.to_string()),
        }
    }
}
