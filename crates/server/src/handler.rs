//! Inbound client message handling
//!
//! Validation and rate limiting happen here, before a response exists.
//! Accepted utterances start a [`ResponseCoordinator`] that runs on its own
//! task so the connection keeps reading.

use std::sync::Arc;

use parley_agent::{AgentServices, ResponseCoordinator, ResponseOutcome, Session};
use parley_config::ServerConfig;
use parley_core::{ClientMessage, Emotion, ErrorCode, ServerMessage, SessionStatus};
use tokio::task::JoinHandle;

use crate::metrics::record_rejected;
use crate::rate_limit::RateLimiter;
use crate::ServerError;

pub struct MessageHandler {
    services: Arc<AgentServices>,
    rate_limiter: RateLimiter,
    max_input_chars: usize,
}

impl MessageHandler {
    pub fn new(services: Arc<AgentServices>, config: &ServerConfig) -> Self {
        Self {
            services,
            rate_limiter: RateLimiter::new(config.rate_limit.clone()),
            max_input_chars: config.max_input_chars,
        }
    }

    /// Handle one raw text frame from the client
    ///
    /// Returns the response task when the frame started a response. The
    /// next frame of the same session must not be handled before this
    /// returns.
    pub async fn handle(&self, session: &Arc<Session>, raw: &str) -> Option<JoinHandle<ResponseOutcome>> {
        session.touch();

        let message = match serde_json::from_str::<ClientMessage>(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(session_id = %session.id(), error = %e, "Malformed client message");
                session
                    .emit(ServerMessage::error(
                        ErrorCode::MalformedMessage,
                        "Unrecognized message",
                    ))
                    .await;
                return None;
            }
        };

        match message {
            ClientMessage::Text { content } => self.handle_text(session, content).await,
            ClientMessage::Interrupt => {
                self.handle_interrupt(session).await;
                None
            }
            ClientMessage::Ping => {
                session.emit(ServerMessage::Pong).await;
                None
            }
        }
    }

    async fn handle_text(&self, session: &Arc<Session>, content: String) -> Option<JoinHandle<ResponseOutcome>> {
        let utterance = match self.validate(&content) {
            Ok(utterance) => utterance,
            Err(e) => {
                record_rejected("invalid_input");
                tracing::debug!(session_id = %session.id(), error = %e, "Rejected input");
                session
                    .emit(ServerMessage::error(ErrorCode::InvalidInput, e.to_string()))
                    .await;
                return None;
            }
        };

        if !self.rate_limiter.check_and_increment(session) {
            record_rejected("rate_limited");
            tracing::warn!(session_id = %session.id(), "Rate limit exceeded");
            session
                .emit(ServerMessage::error(
                    ErrorCode::RateLimited,
                    "Too many requests. Please wait a moment.",
                ))
                .await;
            return None;
        }

        let coordinator =
            ResponseCoordinator::start(self.services.clone(), session.clone(), utterance).await;
        Some(coordinator.spawn())
    }

    async fn handle_interrupt(&self, session: &Arc<Session>) {
        match session.interrupt() {
            Some(response_id) => {
                tracing::info!(session_id = %session.id(), response_id, "Response interrupted")
            }
            None => tracing::debug!(session_id = %session.id(), "Interrupt with nothing to stop"),
        }

        session.set_status(SessionStatus::Listening);
        session
            .emit(ServerMessage::Status {
                status: SessionStatus::Listening,
                emotion: Emotion::Neutral,
            })
            .await;
    }

    /// Trimmed utterance, or why it was refused
    pub fn validate<'a>(&self, content: &'a str) -> Result<&'a str, ServerError> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(ServerError::InvalidRequest("Message is empty".into()));
        }

        let chars = trimmed.chars().count();
        if chars > self.max_input_chars {
            return Err(ServerError::InvalidRequest(format!(
                "Message is too long ({} characters, limit {})",
                chars, self.max_input_chars
            )));
        }

        Ok(trimmed)
    }
}
