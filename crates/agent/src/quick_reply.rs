//! LLM-free replies
//!
//! Greetings get a fixed answer, and replies to context-free utterances are
//! cached so a repeated opening question is answered without the LLM.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parley_config::ResponseConfig;
use parley_core::{Emotion, TtlLruCache};

/// Where a quick reply came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuickReplySource {
    Greeting,
    Cache,
}

impl QuickReplySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuickReplySource::Greeting => "greeting",
            QuickReplySource::Cache => "cache",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuickReply {
    pub text: String,
    pub emotion: Emotion,
    pub source: QuickReplySource,
}

#[derive(Debug, Clone)]
struct CachedReply {
    text: String,
    emotion: Emotion,
}

static GREETINGS: Lazy<HashMap<&'static str, (&'static str, Emotion)>> = Lazy::new(|| {
    [
        ("こんにちは", ("こんにちは！今日はどんなお話をしましょうか？", Emotion::Happy)),
        ("こんばんは", ("こんばんは！今日も一日お疲れさまでした。", Emotion::Happy)),
        ("おはよう", ("おはようございます！今日も良い一日にしましょう。", Emotion::Happy)),
        ("おはようございます", ("おはようございます！今日も良い一日にしましょう。", Emotion::Happy)),
        ("ありがとう", ("どういたしまして！ほかにお手伝いできることはありますか？", Emotion::Happy)),
        ("ありがとうございます", ("どういたしまして！ほかにお手伝いできることはありますか？", Emotion::Happy)),
        ("さようなら", ("さようなら。またお話ししましょうね。", Emotion::Neutral)),
        ("おやすみ", ("おやすみなさい。ゆっくり休んでくださいね。", Emotion::Neutral)),
        ("hello", ("Hello! What would you like to talk about?", Emotion::Happy)),
        ("hi", ("Hi! What would you like to talk about?", Emotion::Happy)),
        ("thanks", ("You're welcome! Anything else I can help with?", Emotion::Happy)),
        ("thank you", ("You're welcome! Anything else I can help with?", Emotion::Happy)),
        ("goodbye", ("Goodbye! Talk to you soon.", Emotion::Neutral)),
    ]
    .into_iter()
    .collect()
});

/// Greeting table plus bounded cache of context-free replies
pub struct QuickReplies {
    cache: TtlLruCache<String, CachedReply>,
}

impl QuickReplies {
    pub fn new(config: &ResponseConfig) -> Self {
        Self {
            cache: TtlLruCache::new(config.cache_capacity, Some(config.cache_ttl())),
        }
    }

    /// Greeting first, then the cache
    pub fn lookup(&self, utterance: &str) -> Option<QuickReply> {
        let key = Self::normalize(utterance);
        if key.is_empty() {
            return None;
        }

        if let Some((text, emotion)) = GREETINGS.get(key.as_str()) {
            return Some(QuickReply {
                text: (*text).to_string(),
                emotion: *emotion,
                source: QuickReplySource::Greeting,
            });
        }

        self.cache.get(&key).map(|cached| QuickReply {
            text: cached.text,
            emotion: cached.emotion,
            source: QuickReplySource::Cache,
        })
    }

    /// Cache a completed reply to an utterance made without prior context
    pub fn remember(&self, utterance: &str, reply: &str, emotion: Emotion) {
        let key = Self::normalize(utterance);
        if key.is_empty() || reply.trim().is_empty() {
            return;
        }
        self.cache.insert(
            key,
            CachedReply {
                text: reply.to_string(),
                emotion,
            },
        );
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Lowercase, strip trailing punctuation, collapse whitespace
    fn normalize(utterance: &str) -> String {
        let trimmed = utterance.trim().trim_end_matches(|c: char| {
            matches!(c, '。' | '！' | '？' | '!' | '?' | '.' | '、' | ',' | '〜' | '~')
        });
        trimmed
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replies() -> QuickReplies {
        QuickReplies::new(&ResponseConfig::default())
    }

    #[test]
    fn test_greeting() {
        let quick = replies().lookup("こんにちは！").unwrap();
        assert_eq!(quick.source, QuickReplySource::Greeting);
        assert_eq!(quick.emotion, Emotion::Happy);

        let quick = replies().lookup("  Thank   you. ").unwrap();
        assert_eq!(quick.text, "You're welcome! Anything else I can help with?");
    }

    #[test]
    fn test_cache_round_trip() {
        let quick = replies();
        assert!(quick.lookup("富士山の高さは？").is_none());

        quick.remember("富士山の高さは？", "3776メートルです。", Emotion::Neutral);
        let hit = quick.lookup("富士山の高さは").unwrap();
        assert_eq!(hit.source, QuickReplySource::Cache);
        assert_eq!(hit.text, "3776メートルです。");
    }

    #[test]
    fn test_blank_is_never_quick() {
        let quick = replies();
        quick.remember("   ", "x", Emotion::Neutral);
        assert!(quick.lookup("？").is_none());
        assert_eq!(quick.cached_len(), 0);
    }
}
