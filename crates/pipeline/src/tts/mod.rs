//! Text-to-speech side of the pipeline
//!
//! Features:
//! - Sentence-level segmentation of streamed text for early synthesis
//! - A fair, process-wide admission limiter for synthesis calls
//! - Pluggable backends behind [`TtsBackend`]

mod limiter;
mod segmenter;
mod silence;

pub use limiter::{SynthesisLimiter, SynthesisTicket};
pub use segmenter::SentenceSegmenter;
pub use silence::SilenceTts;

use parley_core::Emotion;

use crate::PipelineError;

/// TTS backend trait
///
/// Failures are per call; a backend must stay usable after returning an error.
#[async_trait::async_trait]
pub trait TtsBackend: Send + Sync {
    /// Synthesize text to 16-bit little-endian mono PCM
    async fn synthesize(&self, text: &str, emotion: Emotion) -> Result<Vec<u8>, PipelineError>;

    /// Sample rate of the produced audio
    fn sample_rate(&self) -> u32;

    fn name(&self) -> &str {
        "tts"
    }
}
