//! Error types for the assistant

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
///
/// Every failure a client can observe maps onto one of these variants.
/// There is no `Superseded` variant: a demoted response is a silent
/// discard path, never an error.
#[derive(Error, Debug)]
pub enum Error {
    /// Oversized or malformed input, rejected before a response exists
    #[error("Validation error: {0}")]
    Validation(String),

    /// Request rejected by the per-session rate limiter
    #[error("Rate limit exceeded")]
    RateLimited,

    /// One sentence failed to synthesize; the response continues without it
    #[error("Synthesis failure: {0}")]
    Synthesis(String),

    /// The LLM stream failed; the whole response is aborted
    #[error("Upstream stream failure: {0}")]
    UpstreamStream(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the client may retry immediately
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Config(_) | Error::Session(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::RateLimited.is_recoverable());
        assert!(Error::UpstreamStream("boom".into()).is_recoverable());
        assert!(Error::Validation("too long".into()).is_recoverable());
        assert!(!Error::Config("bad".into()).is_recoverable());
    }

    #[test]
    fn test_display() {
        let err = Error::Synthesis("vendor 503".into());
        assert_eq!(err.to_string(), "Synthesis failure: vendor 503");
    }
}
