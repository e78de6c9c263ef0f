//! Keyword-based emotion detection
//!
//! Picks the emotion used as a synthesis style hint from cues in the user's
//! utterance. Japanese cues match as substrings; English cues match whole
//! words or phrases.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use parley_core::Emotion;

/// Cue tables in tie-break order
static CUES: Lazy<Vec<(Emotion, HashSet<&'static str>)>> = Lazy::new(|| {
    vec![
        (
            Emotion::Happy,
            [
                "こんにちは",
                "おはよう",
                "こんばんは",
                "ありがとう",
                "嬉しい",
                "うれしい",
                "楽しい",
                "最高",
                "やった",
                "よかった",
                "良かった",
                "hello",
                "hi",
                "thanks",
                "thank you",
                "great",
                "awesome",
                "glad",
                "happy",
            ]
            .into_iter()
            .collect(),
        ),
        (
            Emotion::Sad,
            [
                "悲しい",
                "かなしい",
                "残念",
                "つらい",
                "辛い",
                "寂しい",
                "さびしい",
                "疲れた",
                "sad",
                "sorry",
                "tired",
                "lonely",
                "unfortunately",
            ]
            .into_iter()
            .collect(),
        ),
        (
            Emotion::Surprised,
            [
                "本当に",
                "ほんとに",
                "えっ",
                "まさか",
                "びっくり",
                "すごい",
                "wow",
                "really",
                "no way",
                "amazing",
            ]
            .into_iter()
            .collect(),
        ),
        (
            Emotion::Thinking,
            [
                "どう思",
                "なぜ",
                "なんで",
                "どうして",
                "教えて",
                "考え",
                "why",
                "how",
                "explain",
                "what do you think",
            ]
            .into_iter()
            .collect(),
        ),
    ]
});

/// Emotion detector
#[derive(Debug, Clone, Default)]
pub struct EmotionDetector;

impl EmotionDetector {
    pub fn new() -> Self {
        Self
    }

    /// Emotion with the most matching cues; `Neutral` when none match
    ///
    /// Earlier table entries win ties.
    pub fn detect(&self, text: &str) -> Emotion {
        let lowered = text.to_lowercase();
        let words = Self::word_padded(&lowered);

        let mut best = (Emotion::Neutral, 0usize);
        for (emotion, cues) in CUES.iter() {
            let score = cues
                .iter()
                .filter(|cue| {
                    if cue.is_ascii() {
                        words.contains(&format!(" {} ", cue))
                    } else {
                        lowered.contains(*cue)
                    }
                })
                .count();

            if score > best.1 {
                best = (*emotion, score);
            }
        }

        best.0
    }

    /// ASCII words separated by single spaces, with a space at both ends
    fn word_padded(text: &str) -> String {
        let mut out = String::with_capacity(text.len() + 2);
        out.push(' ');
        for word in text
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '\''))
            .filter(|w| !w.is_empty())
        {
            out.push_str(word);
            out.push(' ');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_is_happy() {
        let detector = EmotionDetector::new();
        assert_eq!(detector.detect("こんにちは"), Emotion::Happy);
        assert_eq!(detector.detect("Hi there!"), Emotion::Happy);
    }

    #[test]
    fn test_categories() {
        let detector = EmotionDetector::new();
        assert_eq!(detector.detect("今日は疲れたし、悲しい"), Emotion::Sad);
        assert_eq!(detector.detect("えっ、本当に？"), Emotion::Surprised);
        assert_eq!(detector.detect("なぜ空は青いのか教えて"), Emotion::Thinking);
        assert_eq!(detector.detect("明日の予定"), Emotion::Neutral);
    }

    #[test]
    fn test_english_cues_need_whole_words() {
        let detector = EmotionDetector::new();
        // "this" and "show" contain "hi" and "how" but are not cues
        assert_eq!(detector.detect("this show"), Emotion::Neutral);
        assert_eq!(detector.detect("What do you think?"), Emotion::Thinking);
    }
}
