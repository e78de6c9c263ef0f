//! Response coordination
//!
//! One [`ResponseCoordinator`] handles one user utterance:
//!
//! 1. `start` makes the response current, snapshots history and picks an
//!    emotion, then reports `thinking`.
//! 2. `run` streams the LLM reply to the client, cuts it into sentences and
//!    synthesizes each sentence in its own task as soon as it is known.
//! 3. Once the stream ends and the synthesis tasks are done, the exchange is
//!    added to history and persisted.
//!
//! A newer utterance demotes this response by moving the session's current
//! pointer. From then on every client-visible effect is dropped at the
//! delivery check; work already in flight still runs to completion.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use parley_core::{Emotion, ErrorCode, ServerMessage, SessionStatus, Turn};
use parley_llm::{LlmError, LlmEvent, ToolCall};
use parley_persistence::{spawn_append, TurnRecord};
use parley_pipeline::{PipelineError, SentenceSegmenter, SynthesisLimiter, TtsBackend};
use tokio::task::{JoinHandle, JoinSet};

use crate::quick_reply::QuickReply;
use crate::session::Session;
use crate::AgentServices;

/// How a response ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    Completed,
    /// Demoted by a newer utterance or an interrupt
    Superseded,
    /// The LLM stream failed while the response was current
    Failed,
}

impl ResponseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseState::Completed => "completed",
            ResponseState::Superseded => "superseded",
            ResponseState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResponseOutcome {
    pub response_id: u64,
    pub state: ResponseState,
    pub emotion: Emotion,
    /// Reply text produced, complete or not
    pub text: String,
    pub chunks_delivered: usize,
    pub synthesis_failures: usize,
}

/// Synthesized audio for one sentence
#[derive(Debug, Clone)]
pub struct SynthesisChunk {
    pub response_id: u64,
    pub index: usize,
    /// Sentences known when this chunk was delivered
    pub total: usize,
    pub audio: Vec<u8>,
    pub source_text: String,
    pub is_last: bool,
}

impl SynthesisChunk {
    pub fn into_message(self, sample_rate: u32) -> ServerMessage {
        ServerMessage::AudioChunk {
            response_id: self.response_id,
            index: self.index,
            total: self.total,
            is_last: self.is_last,
            audio: base64::engine::general_purpose::STANDARD.encode(&self.audio),
            sample_rate,
            source_text: self.source_text,
        }
    }
}

pub struct ResponseCoordinator {
    services: Arc<AgentServices>,
    session: Arc<Session>,
    response_id: u64,
    utterance: String,
    history: Vec<Turn>,
    emotion: Emotion,
    quick: Option<QuickReply>,
}

impl ResponseCoordinator {
    /// Make a new response current for `session`
    ///
    /// Must be awaited before the next utterance of the same session is
    /// handled, so responses become current in arrival order.
    pub async fn start(
        services: Arc<AgentServices>,
        session: Arc<Session>,
        utterance: impl Into<String>,
    ) -> Self {
        let utterance = utterance.into();
        let response_id = session.begin_response();
        let history = session.history_snapshot();

        let quick = if services.response.quick_replies && history.is_empty() {
            services.quick_replies.lookup(&utterance)
        } else {
            None
        };
        let emotion = match &quick {
            Some(quick) => quick.emotion,
            None => services.emotions.detect(&utterance),
        };

        tracing::info!(
            session_id = %session.id(),
            response_id,
            emotion = %emotion,
            history_len = history.len(),
            quick = ?quick.as_ref().map(|q| q.source.as_str()),
            "Response started"
        );

        session
            .set_status_if_current(response_id, SessionStatus::Thinking, emotion)
            .await;

        Self {
            services,
            session,
            response_id,
            utterance,
            history,
            emotion,
            quick,
        }
    }

    pub fn response_id(&self) -> u64 {
        self.response_id
    }

    pub fn emotion(&self) -> Emotion {
        self.emotion
    }

    /// Run to completion on a background task
    pub fn spawn(self) -> JoinHandle<ResponseOutcome> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) -> ResponseOutcome {
        let chunks = Arc::new(ChunkDispatcher {
            session: self.session.clone(),
            tts: self.services.tts.clone(),
            limiter: self.services.limiter.clone(),
            timeout: self.services.synthesis_timeout,
            response_id: self.response_id,
            emotion: self.emotion,
            dispatched: AtomicUsize::new(0),
            sealed: AtomicBool::new(false),
            final_total: AtomicUsize::new(0),
            delivered: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            speaking: AtomicBool::new(false),
        });
        let mut tasks = JoinSet::new();

        let (text, error) = match self.quick.clone() {
            Some(quick) => (self.run_quick(&chunks, quick).await, None),
            None => self.run_stream(&chunks, &mut tasks).await,
        };

        match error {
            Some(error) => self.fail(&chunks, tasks, text, error).await,
            None => self.finish(&chunks, tasks, text).await,
        }
    }

    async fn run_quick(&self, chunks: &Arc<ChunkDispatcher>, quick: QuickReply) -> String {
        tracing::debug!(
            response_id = self.response_id,
            source = quick.source.as_str(),
            "Answering without the LLM"
        );

        self.session
            .deliver_if_current(
                self.response_id,
                ServerMessage::TextDelta {
                    response_id: self.response_id,
                    delta: quick.text.clone(),
                },
            )
            .await;

        chunks.seal(1);
        chunks.synthesize(chunks.next_index(), quick.text.clone()).await;
        quick.text
    }

    async fn run_stream(
        &self,
        chunks: &Arc<ChunkDispatcher>,
        tasks: &mut JoinSet<()>,
    ) -> (String, Option<LlmError>) {
        let mut stream = match self
            .services
            .llm
            .stream_reply(&self.history, &self.utterance)
            .await
        {
            Ok(stream) => stream,
            Err(e) => return (String::new(), Some(e)),
        };

        let mut segmenter = SentenceSegmenter::new(&self.services.segmenter);
        let min_parallel_chars = self.services.response.min_parallel_chars;
        let mut text = String::new();
        let mut held: Vec<String> = Vec::new();
        let mut parallel = false;

        while let Some(event) = stream.next_event().await {
            match event {
                LlmEvent::Delta(delta) => {
                    if delta.is_empty() {
                        continue;
                    }
                    text.push_str(&delta);

                    self.session
                        .deliver_if_current(
                            self.response_id,
                            ServerMessage::TextDelta {
                                response_id: self.response_id,
                                delta: delta.clone(),
                            },
                        )
                        .await;

                    held.extend(segmenter.feed(&delta));

                    // Short replies are cheaper as one call; hold sentences
                    // back until the reply is long enough to be worth splitting.
                    if !parallel && text.chars().count() >= min_parallel_chars {
                        parallel = true;
                    }
                    if parallel {
                        for sentence in held.drain(..) {
                            chunks.dispatch(tasks, sentence);
                        }
                    }
                }
                LlmEvent::ToolCall(call) => self.resolve_tool(call).await,
                LlmEvent::Failed(e) => return (text, Some(e)),
            }
        }

        let remainder = segmenter.flush().filter(|r| !r.trim().is_empty());
        if parallel {
            held.extend(remainder);
            chunks.seal(held.len());
            for sentence in held {
                chunks.dispatch(tasks, sentence);
            }
        } else if !text.trim().is_empty() {
            chunks.seal(1);
            chunks.synthesize(chunks.next_index(), text.clone()).await;
        } else {
            chunks.seal(0);
        }

        (text, None)
    }

    async fn resolve_tool(&self, call: ToolCall) {
        let name = call.name.clone();
        let result = self.services.tools.call(&name, call.arguments.clone()).await;

        match &result {
            Ok(_) => tracing::info!(response_id = self.response_id, tool = %name, "Tool call succeeded"),
            Err(e) => {
                metrics::counter!("parley_errors_total", "type" => "tool").increment(1);
                tracing::warn!(response_id = self.response_id, tool = %name, error = %e, "Tool call failed");
            }
        }

        call.respond(result.map(|output| output.text).map_err(|e| e.to_string()));
    }

    async fn finish(
        self,
        chunks: &Arc<ChunkDispatcher>,
        mut tasks: JoinSet<()>,
        text: String,
    ) -> ResponseOutcome {
        while self.session.is_current(self.response_id) {
            if tasks.join_next().await.is_none() {
                break;
            }
        }
        // Superseded: let in-flight synthesis finish on its own
        tasks.detach_all();

        let state = if self.session.is_current(self.response_id) {
            self.session
                .set_status_if_current(self.response_id, SessionStatus::Idle, self.emotion)
                .await;
            ResponseState::Completed
        } else {
            ResponseState::Superseded
        };

        self.record(&text, state);

        if state == ResponseState::Completed && self.history.is_empty() && self.quick.is_none() {
            self.services
                .quick_replies
                .remember(&self.utterance, &text, self.emotion);
        }

        self.outcome(chunks, state, text)
    }

    async fn fail(
        self,
        chunks: &Arc<ChunkDispatcher>,
        mut tasks: JoinSet<()>,
        text: String,
        error: LlmError,
    ) -> ResponseOutcome {
        tasks.detach_all();

        // Retire before surfacing anything, so no in-flight chunk of this
        // response can reach the client after the error
        let state = if self.session.retire_with_status(self.response_id, SessionStatus::Idle) {
            metrics::counter!("parley_errors_total", "type" => "upstream").increment(1);
            tracing::warn!(
                session_id = %self.session.id(),
                response_id = self.response_id,
                error = %error,
                "LLM stream failed"
            );

            self.session
                .emit(ServerMessage::error(
                    ErrorCode::UpstreamFailure,
                    "The reply could not be generated. Please try again.",
                ))
                .await;
            self.session
                .emit(ServerMessage::Status {
                    status: SessionStatus::Idle,
                    emotion: self.emotion,
                })
                .await;
            ResponseState::Failed
        } else {
            tracing::debug!(response_id = self.response_id, error = %error, "Superseded stream failed");
            ResponseState::Superseded
        };

        self.outcome(chunks, state, text)
    }

    /// Add the exchange to history and persist it
    fn record(&self, text: &str, state: ResponseState) {
        if text.is_empty() {
            self.session.append_turn(Turn::user(self.utterance.clone()));
        } else {
            self.session
                .append_exchange(Turn::user(self.utterance.clone()), Turn::assistant(text));
        }

        spawn_append(
            self.services.store.clone(),
            TurnRecord {
                session_id: self.session.id().to_string(),
                response_id: self.response_id,
                user_text: self.utterance.clone(),
                assistant_text: text.to_string(),
                emotion: self.emotion,
                superseded: state == ResponseState::Superseded,
                completed_at: chrono::Utc::now(),
            },
        );
    }

    fn outcome(&self, chunks: &ChunkDispatcher, state: ResponseState, text: String) -> ResponseOutcome {
        metrics::counter!("parley_responses_total", "outcome" => state.as_str()).increment(1);

        let outcome = ResponseOutcome {
            response_id: self.response_id,
            state,
            emotion: self.emotion,
            text,
            chunks_delivered: chunks.delivered.load(Ordering::SeqCst),
            synthesis_failures: chunks.failures.load(Ordering::SeqCst),
        };

        tracing::info!(
            session_id = %self.session.id(),
            response_id = outcome.response_id,
            state = state.as_str(),
            chunks = outcome.chunks_delivered,
            failures = outcome.synthesis_failures,
            "Response finished"
        );

        outcome
    }
}

/// Per-response synthesis bookkeeping shared with the sentence tasks
struct ChunkDispatcher {
    session: Arc<Session>,
    tts: Arc<dyn TtsBackend>,
    limiter: Arc<SynthesisLimiter>,
    timeout: Duration,
    response_id: u64,
    emotion: Emotion,
    dispatched: AtomicUsize,
    sealed: AtomicBool,
    final_total: AtomicUsize,
    delivered: AtomicUsize,
    failures: AtomicUsize,
    speaking: AtomicBool,
}

impl ChunkDispatcher {
    fn next_index(&self) -> usize {
        self.dispatched.fetch_add(1, Ordering::SeqCst)
    }

    /// Fix the sentence count: `remaining` more will be dispatched
    ///
    /// Called before the last sentences are dispatched so their tasks
    /// already see the final total.
    fn seal(&self, remaining: usize) {
        let total = self.dispatched.load(Ordering::SeqCst) + remaining;
        self.final_total.store(total, Ordering::SeqCst);
        self.sealed.store(true, Ordering::SeqCst);
    }

    fn total_known(&self) -> (usize, bool) {
        if self.sealed.load(Ordering::SeqCst) {
            (self.final_total.load(Ordering::SeqCst), true)
        } else {
            (self.dispatched.load(Ordering::SeqCst), false)
        }
    }

    fn dispatch(self: &Arc<Self>, tasks: &mut JoinSet<()>, sentence: String) {
        let index = self.next_index();
        let this = self.clone();
        tasks.spawn(async move { this.synthesize(index, sentence).await });
    }

    async fn synthesize(&self, index: usize, text: String) {
        let started = std::time::Instant::now();

        let result = self
            .limiter
            .run(async {
                // Not started yet and no longer wanted
                if !self.session.is_current(self.response_id) {
                    return None;
                }
                Some(tokio::time::timeout(self.timeout, self.tts.synthesize(&text, self.emotion)).await)
            })
            .await;
        metrics::gauge!("parley_limiter_outstanding").set(self.limiter.outstanding() as f64);

        let audio = match result {
            Ok(Some(Ok(Ok(audio)))) => audio,
            Ok(None) => {
                tracing::debug!(response_id = self.response_id, index, "Skipped synthesis for superseded response");
                return;
            }
            Ok(Some(Ok(Err(e)))) | Err(e) => return self.record_failure(index, e),
            Ok(Some(Err(_))) => {
                return self.record_failure(index, PipelineError::Timeout(self.timeout.as_millis() as u64))
            }
        };
        metrics::histogram!("parley_synthesis_seconds").record(started.elapsed().as_secs_f64());

        let (total, sealed) = self.total_known();
        self.deliver(SynthesisChunk {
            response_id: self.response_id,
            index,
            total,
            audio,
            source_text: text,
            is_last: sealed && index + 1 == total,
        })
        .await;
    }

    async fn deliver(&self, chunk: SynthesisChunk) {
        if !self.session.is_current(self.response_id) {
            return;
        }

        if !self.speaking.swap(true, Ordering::SeqCst) {
            self.session
                .set_status_if_current(self.response_id, SessionStatus::Speaking, self.emotion)
                .await;
        }

        let index = chunk.index;
        let message = chunk.into_message(self.tts.sample_rate());
        if self.session.deliver_if_current(self.response_id, message).await {
            self.delivered.fetch_add(1, Ordering::SeqCst);
        } else {
            tracing::debug!(response_id = self.response_id, index, "Dropped chunk of superseded response");
        }
    }

    fn record_failure(&self, index: usize, error: PipelineError) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        metrics::counter!("parley_errors_total", "type" => "synthesis").increment(1);
        tracing::warn!(
            session_id = %self.session.id(),
            response_id = self.response_id,
            index,
            error = %error,
            "Sentence synthesis failed"
        );
    }
}
