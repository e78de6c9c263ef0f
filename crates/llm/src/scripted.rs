//! Development backends
//!
//! `ScriptedLlm` plays back a fixed sequence of steps and records what it
//! was asked, which makes response flows deterministic in tests.
//! `EchoLlm` is the default backend of the server binary.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use parley_core::Turn;
use serde_json::Value;

use crate::backend::LlmBackend;
use crate::streaming::{ReplySender, ReplyStream};
use crate::LlmError;

const STREAM_BUFFER: usize = 32;

/// One step of a scripted reply
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Delta(String),
    Sleep(Duration),
    /// Request a tool and speak its output as the next delta
    ToolCall { name: String, arguments: Value },
    /// Break the stream
    Fail(String),
}

impl ScriptStep {
    pub fn delta(text: impl Into<String>) -> Self {
        ScriptStep::Delta(text.into())
    }

    pub fn sleep_ms(ms: u64) -> Self {
        ScriptStep::Sleep(Duration::from_millis(ms))
    }

    pub fn tool(name: impl Into<String>, arguments: Value) -> Self {
        ScriptStep::ToolCall {
            name: name.into(),
            arguments,
        }
    }
}

/// Backend that replays scripted replies
///
/// Each call to `stream_reply` takes the next script; the last script is
/// reused once the list is exhausted.
pub struct ScriptedLlm {
    scripts: Vec<Vec<ScriptStep>>,
    calls: AtomicUsize,
    histories: Mutex<Vec<Vec<Turn>>>,
    tool_results: Arc<Mutex<Vec<Result<String, String>>>>,
    unavailable: bool,
}

impl ScriptedLlm {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self::with_scripts(vec![steps])
    }

    pub fn with_scripts(scripts: Vec<Vec<ScriptStep>>) -> Self {
        Self {
            scripts,
            calls: AtomicUsize::new(0),
            histories: Mutex::new(Vec::new()),
            tool_results: Arc::new(Mutex::new(Vec::new())),
            unavailable: false,
        }
    }

    /// Stream text as deltas of `chars_per_delta` characters
    pub fn from_text(text: &str, chars_per_delta: usize, delay: Duration) -> Self {
        let chars: Vec<char> = text.chars().collect();
        let mut steps = Vec::new();
        for chunk in chars.chunks(chars_per_delta.max(1)) {
            if !delay.is_zero() {
                steps.push(ScriptStep::Sleep(delay));
            }
            steps.push(ScriptStep::Delta(chunk.iter().collect()));
        }
        Self::new(steps)
    }

    /// Backend whose streams never open
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::with_scripts(Vec::new())
        }
    }

    /// Number of `stream_reply` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// History snapshots passed to each call, in call order
    pub fn histories(&self) -> Vec<Vec<Turn>> {
        self.histories.lock().clone()
    }

    /// Results the consumer returned for scripted tool calls
    pub fn tool_results(&self) -> Vec<Result<String, String>> {
        self.tool_results.lock().clone()
    }

    fn script_for(&self, call: usize) -> Vec<ScriptStep> {
        self.scripts
            .get(call)
            .or_else(|| self.scripts.last())
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmBackend for ScriptedLlm {
    async fn stream_reply(
        &self,
        history: &[Turn],
        _utterance: &str,
    ) -> Result<ReplyStream, LlmError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.histories.lock().push(history.to_vec());

        if self.unavailable {
            return Err(LlmError::Unavailable("scripted backend is offline".to_string()));
        }

        let steps = self.script_for(call);
        let tool_results = self.tool_results.clone();
        let (tx, stream) = ReplyStream::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            play(steps, tx, tool_results).await;
        });

        Ok(stream)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

async fn play(
    steps: Vec<ScriptStep>,
    tx: ReplySender,
    tool_results: Arc<Mutex<Vec<Result<String, String>>>>,
) {
    for step in steps {
        match step {
            ScriptStep::Delta(text) => {
                if !tx.delta(text).await {
                    return;
                }
            }
            ScriptStep::Sleep(duration) => tokio::time::sleep(duration).await,
            ScriptStep::ToolCall { name, arguments } => {
                let result = tx.tool_call(name, arguments).await;
                let recorded = result.as_ref().map(Clone::clone).map_err(|e| e.to_string());
                tool_results.lock().push(recorded);

                match result {
                    Ok(output) => {
                        if !tx.delta(output).await {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "Scripted tool call failed");
                    }
                }
            }
            ScriptStep::Fail(message) => {
                tx.fail(LlmError::Stream(message)).await;
                return;
            }
        }
    }
}

/// Backend that acknowledges the utterance back to the user
pub struct EchoLlm {
    chars_per_delta: usize,
    delay: Duration,
}

impl EchoLlm {
    pub fn new(chars_per_delta: usize, delay: Duration) -> Self {
        Self {
            chars_per_delta: chars_per_delta.max(1),
            delay,
        }
    }

    fn reply_for(utterance: &str) -> String {
        format!("「{}」ですね。承知しました。ほかに何かありますか？", utterance.trim())
    }
}

impl Default for EchoLlm {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(20))
    }
}

#[async_trait]
impl LlmBackend for EchoLlm {
    async fn stream_reply(
        &self,
        _history: &[Turn],
        utterance: &str,
    ) -> Result<ReplyStream, LlmError> {
        let reply: Vec<char> = Self::reply_for(utterance).chars().collect();
        let chars_per_delta = self.chars_per_delta;
        let delay = self.delay;
        let (tx, stream) = ReplyStream::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            for chunk in reply.chunks(chars_per_delta) {
                tokio::time::sleep(delay).await;
                if !tx.delta(chunk.iter().collect::<String>()).await {
                    break;
                }
            }
        });

        Ok(stream)
    }

    fn name(&self) -> &str {
        "echo"
    }
}
