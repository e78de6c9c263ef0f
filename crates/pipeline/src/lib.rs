//! Speech output pipeline
//!
//! This crate provides the pieces between streamed reply text and audio:
//! - Incremental sentence segmentation
//! - Process-wide synthesis concurrency limiting
//! - The TTS backend interface and a silence backend for development

pub mod tts;

pub use tts::{
    SentenceSegmenter, SilenceTts, SynthesisLimiter, SynthesisTicket, TtsBackend,
};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("TTS error: {0}")]
    Tts(String),

    #[error("Synthesis timed out after {0}ms")]
    Timeout(u64),

    #[error("Synthesis limiter closed")]
    LimiterClosed,
}

impl From<PipelineError> for parley_core::Error {
    fn from(err: PipelineError) -> Self {
        parley_core::Error::Synthesis(err.to_string())
    }
}
