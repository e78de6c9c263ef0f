//! Silence backend
//!
//! Produces correctly sized PCM without calling a vendor. Used in
//! development and as the default when no speech service is configured.

use std::time::Duration;

use parley_core::Emotion;

use super::TtsBackend;
use crate::PipelineError;

const MS_PER_CHAR: u64 = 60;
const MIN_DURATION_MS: u64 = 200;

/// TTS backend returning silence proportional to the text length
#[derive(Debug, Clone)]
pub struct SilenceTts {
    sample_rate: u32,
    latency: Option<Duration>,
}

impl SilenceTts {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            latency: None,
        }
    }

    /// Simulate vendor round-trip time on every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Length of audio produced for `text`
    pub fn duration_for(text: &str) -> Duration {
        let ms = (text.chars().count() as u64 * MS_PER_CHAR).max(MIN_DURATION_MS);
        Duration::from_millis(ms)
    }
}

#[async_trait::async_trait]
impl TtsBackend for SilenceTts {
    async fn synthesize(&self, text: &str, _emotion: Emotion) -> Result<Vec<u8>, PipelineError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let duration = Self::duration_for(text);
        let samples = (duration.as_millis() as u64 * self.sample_rate as u64 / 1000) as usize;
        tracing::trace!(chars = text.chars().count(), samples, "Synthesized silence");
        // 16-bit samples
        Ok(vec![0u8; samples * 2])
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        "silence"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_length_scales_with_text() {
        let tts = SilenceTts::new(24000);
        let short = tts.synthesize("はい", Emotion::Neutral).await.unwrap();
        let long = tts
            .synthesize("今日はとても良い天気ですね。", Emotion::Happy)
            .await
            .unwrap();

        // Two chars fall under the floor: 200ms at 24kHz, 2 bytes per sample
        assert_eq!(short.len(), 24000 / 5 * 2);
        assert!(long.len() > short.len());
        assert!(long.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_duration_floor() {
        assert_eq!(SilenceTts::duration_for(""), Duration::from_millis(200));
        assert_eq!(
            SilenceTts::duration_for("abcdefghij"),
            Duration::from_millis(600)
        );
    }
}
