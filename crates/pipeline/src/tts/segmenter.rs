//! Sentence segmentation for TTS
//!
//! Splits streamed reply text into sentences as soon as their boundary is
//! known, so each one can be synthesized while the LLM keeps talking.

use parley_config::SegmenterConfig;

/// Incremental sentence segmenter
///
/// A boundary is a run of terminal punctuation, optionally followed by
/// whitespace. The run is only closed when a character that belongs to the
/// next sentence arrives, which keeps `"?!"` together even when the two
/// characters come in separate deltas.
///
/// Everything fed in comes back out exactly once, either from [`feed`] or
/// from the final [`flush`].
///
/// [`feed`]: SentenceSegmenter::feed
/// [`flush`]: SentenceSegmenter::flush
#[derive(Debug, Clone)]
pub struct SentenceSegmenter {
    terminators: Vec<char>,
    min_chars: usize,
    buffer: String,
}

impl SentenceSegmenter {
    pub fn new(config: &SegmenterConfig) -> Self {
        Self {
            terminators: config.terminators.clone(),
            min_chars: config.min_sentence_chars,
            buffer: String::new(),
        }
    }

    /// Add a text delta and return every sentence it completed
    pub fn feed(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);

        let mut sentences = Vec::new();
        let mut start = 0;
        let mut in_boundary = false;

        for (i, c) in self.buffer.char_indices() {
            if self.is_terminator(c) || (in_boundary && c.is_whitespace()) {
                in_boundary = true;
                continue;
            }

            if in_boundary {
                in_boundary = false;
                let candidate = &self.buffer[start..i];
                // Too short to be worth its own synthesis call: keep it and
                // let it merge into the following sentence.
                if candidate.trim().chars().count() >= self.min_chars {
                    sentences.push(candidate.to_string());
                    start = i;
                }
            }
        }

        self.buffer.drain(..start);
        sentences
    }

    /// Take whatever is left once the stream has ended
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    /// Text fed but not yet emitted
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    fn is_terminator(&self, c: char) -> bool {
        self.terminators.contains(&c)
    }
}

impl Default for SentenceSegmenter {
    fn default() -> Self {
        Self::new(&SegmenterConfig::default())
    }
}
