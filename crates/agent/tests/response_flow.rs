//! Integration tests for the response flow (LLM -> segmenter -> TTS -> client)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use parley_agent::{AgentServices, ResponseCoordinator, ResponseState, Session, NO_RESPONSE};
use parley_config::Settings;
use parley_core::{Emotion, ErrorCode, ServerMessage, SessionStatus};
use parley_llm::{ScriptStep, ScriptedLlm};
use parley_persistence::{InMemoryTurnStore, TurnStore};
use parley_pipeline::{PipelineError, TtsBackend};
use parley_tools::{StaticSearchProvider, ToolRegistry};

/// TTS double that records every call
struct RecordingTts {
    calls: Mutex<Vec<String>>,
    delay: Duration,
    fail_on: Option<&'static str>,
}

impl RecordingTts {
    fn new(delay_ms: u64) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            delay: Duration::from_millis(delay_ms),
            fail_on: None,
        }
    }

    fn failing_on(marker: &'static str) -> Self {
        Self {
            fail_on: Some(marker),
            ..Self::new(1)
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl TtsBackend for RecordingTts {
    async fn synthesize(&self, text: &str, _emotion: Emotion) -> Result<Vec<u8>, PipelineError> {
        self.calls.lock().push(text.to_string());
        tokio::time::sleep(self.delay).await;

        match self.fail_on {
            Some(marker) if text.contains(marker) => Err(PipelineError::Tts("vendor 503".into())),
            _ => Ok(vec![0u8; 8]),
        }
    }

    fn sample_rate(&self) -> u32 {
        24000
    }
}

struct Harness {
    services: Arc<AgentServices>,
    llm: Arc<ScriptedLlm>,
    tts: Arc<RecordingTts>,
    store: Arc<InMemoryTurnStore>,
}

fn harness(llm: ScriptedLlm, tts: RecordingTts) -> Harness {
    let settings = Settings::default();
    let llm = Arc::new(llm);
    let tts = Arc::new(tts);
    let store = Arc::new(InMemoryTurnStore::new());
    let tools = Arc::new(ToolRegistry::with_defaults(
        &settings.tools,
        Arc::new(StaticSearchProvider::default()),
    ));

    let services = Arc::new(AgentServices::new(
        &settings,
        llm.clone(),
        tts.clone(),
        tools,
        store.clone(),
    ));

    Harness {
        services,
        llm,
        tts,
        store,
    }
}

fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

/// (index, total, is_last) of every audio chunk
fn chunks(messages: &[ServerMessage]) -> Vec<(usize, usize, bool)> {
    messages
        .iter()
        .filter_map(|m| match m {
            ServerMessage::AudioChunk {
                index,
                total,
                is_last,
                ..
            } => Some((*index, *total, *is_last)),
            _ => None,
        })
        .collect()
}

fn text_of(messages: &[ServerMessage]) -> String {
    messages
        .iter()
        .filter_map(|m| match m {
            ServerMessage::TextDelta { delta, .. } => Some(delta.as_str()),
            _ => None,
        })
        .collect()
}

fn last_status(messages: &[ServerMessage]) -> Option<SessionStatus> {
    messages.iter().rev().find_map(|m| match m {
        ServerMessage::Status { status, .. } => Some(*status),
        _ => None,
    })
}

#[tokio::test]
async fn test_greeting_skips_llm_and_sends_one_chunk() {
    let h = harness(ScriptedLlm::new(vec![ScriptStep::delta("unused")]), RecordingTts::new(1));
    let (session, mut rx) = Session::channel(20, 256);

    let coordinator = ResponseCoordinator::start(h.services.clone(), session.clone(), "こんにちは").await;
    assert_eq!(coordinator.emotion(), Emotion::Happy);

    let outcome = coordinator.run().await;
    let messages = drain(&mut rx);

    assert_eq!(outcome.state, ResponseState::Completed);
    assert_eq!(outcome.emotion, Emotion::Happy);
    assert_eq!(h.llm.calls(), 0);
    assert_eq!(chunks(&messages), vec![(0, 1, true)]);
    assert_eq!(h.tts.calls().len(), 1);

    assert_eq!(
        messages[0],
        ServerMessage::Status {
            status: SessionStatus::Thinking,
            emotion: Emotion::Happy
        }
    );
    assert_eq!(last_status(&messages), Some(SessionStatus::Idle));
    assert_eq!(session.history_len(), 2);
}

#[tokio::test]
async fn test_long_reply_is_synthesized_per_sentence() {
    let llm = ScriptedLlm::new(vec![
        ScriptStep::delta("今日はいい天気ですね。"),
        ScriptStep::sleep_ms(5),
        ScriptStep::delta("散歩に行きましょう。"),
        ScriptStep::sleep_ms(5),
        ScriptStep::delta("公園の桜がきれいですよ。"),
    ]);
    let h = harness(llm, RecordingTts::new(2));
    let (session, mut rx) = Session::channel(20, 256);

    let outcome = ResponseCoordinator::start(h.services.clone(), session.clone(), "今日の予定は")
        .await
        .run()
        .await;
    let messages = drain(&mut rx);

    assert_eq!(outcome.state, ResponseState::Completed);
    assert_eq!(outcome.chunks_delivered, 3);
    assert_eq!(text_of(&messages), outcome.text);

    let mut delivered = chunks(&messages);
    delivered.sort();
    assert_eq!(delivered.iter().map(|c| c.0).collect::<Vec<_>>(), vec![0, 1, 2]);

    let last: Vec<_> = delivered.iter().filter(|c| c.2).collect();
    assert_eq!(last, vec![&(2, 3, true)]);

    assert_eq!(
        h.tts.calls(),
        vec!["今日はいい天気ですね。", "散歩に行きましょう。", "公園の桜がきれいですよ。"]
    );
    assert!(messages.contains(&ServerMessage::Status {
        status: SessionStatus::Speaking,
        emotion: Emotion::Neutral
    }));
    assert_eq!(last_status(&messages), Some(SessionStatus::Idle));
    assert_eq!(session.status(), SessionStatus::Idle);
}

#[tokio::test]
async fn test_short_reply_uses_one_sequential_call() {
    let llm = ScriptedLlm::new(vec![ScriptStep::delta("はい。"), ScriptStep::delta("そうです。")]);
    let h = harness(llm, RecordingTts::new(1));
    let (session, mut rx) = Session::channel(20, 256);

    let outcome = ResponseCoordinator::start(h.services.clone(), session, "そうなの")
        .await
        .run()
        .await;

    assert_eq!(outcome.state, ResponseState::Completed);
    assert_eq!(h.tts.calls(), vec!["はい。そうです。"]);
    assert_eq!(chunks(&drain(&mut rx)), vec![(0, 1, true)]);
}

#[tokio::test]
async fn test_synthesis_failure_only_loses_that_sentence() {
    let llm = ScriptedLlm::new(vec![
        ScriptStep::delta("一つ目の文です。"),
        ScriptStep::delta("これは失敗する文です。"),
        ScriptStep::delta("三つ目の文です。"),
    ]);
    let h = harness(llm, RecordingTts::failing_on("失敗"));
    let (session, mut rx) = Session::channel(20, 256);

    let outcome = ResponseCoordinator::start(h.services.clone(), session, "三つ話して")
        .await
        .run()
        .await;
    let messages = drain(&mut rx);

    assert_eq!(outcome.state, ResponseState::Completed);
    assert_eq!(outcome.synthesis_failures, 1);
    assert_eq!(outcome.chunks_delivered, 2);

    let mut indices: Vec<usize> = chunks(&messages).iter().map(|c| c.0).collect();
    indices.sort();
    assert_eq!(indices, vec![0, 2]);
    assert!(!messages.iter().any(|m| matches!(m, ServerMessage::Error { .. })));
}

#[tokio::test]
async fn test_llm_failure_aborts_with_recoverable_error() {
    let llm = ScriptedLlm::new(vec![
        ScriptStep::delta("少々お待ち"),
        ScriptStep::Fail("connection reset".into()),
    ]);
    let h = harness(llm, RecordingTts::new(1));
    let (session, mut rx) = Session::channel(20, 256);

    let outcome = ResponseCoordinator::start(h.services.clone(), session.clone(), "調べて")
        .await
        .run()
        .await;
    let messages = drain(&mut rx);

    assert_eq!(outcome.state, ResponseState::Failed);
    assert!(messages.contains(&ServerMessage::Error {
        code: ErrorCode::UpstreamFailure,
        message: "The reply could not be generated. Please try again.".into(),
        recoverable: true,
    }));
    assert_eq!(last_status(&messages), Some(SessionStatus::Idle));
    assert!(chunks(&messages).is_empty());
    assert_eq!(session.current_response_id(), NO_RESPONSE);
    assert_eq!(session.history_len(), 0);
}

#[tokio::test]
async fn test_llm_failure_silences_in_flight_synthesis() {
    let llm = ScriptedLlm::new(vec![
        ScriptStep::delta("本日の予定を確認します。少々お待ちください。"),
        ScriptStep::Fail("connection reset".into()),
    ]);
    let h = harness(llm, RecordingTts::new(40));
    let (session, mut rx) = Session::channel(20, 1);

    // Slow client on a one-slot queue keeps every send waiting
    let consumer = tokio::spawn(async move {
        let mut received = Vec::new();
        while let Ok(Some(message)) = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await {
            received.push(message);
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        received
    });

    let outcome = ResponseCoordinator::start(h.services.clone(), session.clone(), "予定は？")
        .await
        .run()
        .await;
    let messages = consumer.await.unwrap();

    assert_eq!(outcome.state, ResponseState::Failed);
    let error_at = messages
        .iter()
        .position(|m| matches!(m, ServerMessage::Error { code: ErrorCode::UpstreamFailure, .. }))
        .unwrap();
    let after = &messages[error_at + 1..];
    assert!(chunks(after).is_empty());
    assert_eq!(
        after,
        &[ServerMessage::Status {
            status: SessionStatus::Idle,
            emotion: outcome.emotion,
        }]
    );
    assert_eq!(session.status(), SessionStatus::Idle);
    assert_eq!(session.current_response_id(), NO_RESPONSE);
}

#[tokio::test]
async fn test_unavailable_llm_fails_the_response() {
    let h = harness(ScriptedLlm::unavailable(), RecordingTts::new(1));
    let (session, mut rx) = Session::channel(20, 256);

    let outcome = ResponseCoordinator::start(h.services.clone(), session, "調べて")
        .await
        .run()
        .await;

    assert_eq!(outcome.state, ResponseState::Failed);
    assert!(drain(&mut rx).iter().any(|m| matches!(
        m,
        ServerMessage::Error {
            code: ErrorCode::UpstreamFailure,
            ..
        }
    )));
}

#[tokio::test]
async fn test_newer_utterance_supersedes_current_response() {
    let llm = ScriptedLlm::with_scripts(vec![
        vec![
            ScriptStep::delta("最初の返事はとても長くなる予定です。"),
            ScriptStep::sleep_ms(60),
            ScriptStep::delta("まだまだ続きます。"),
            ScriptStep::sleep_ms(60),
            ScriptStep::delta("これが最後の文です。"),
        ],
        vec![ScriptStep::delta("二番目の返事です。これで終わりです。")],
    ]);
    let h = harness(llm, RecordingTts::new(10));
    let (session, mut rx) = Session::channel(20, 256);

    let first = ResponseCoordinator::start(h.services.clone(), session.clone(), "最初の質問").await;
    let first_id = first.response_id();
    let first = first.spawn();

    tokio::time::sleep(Duration::from_millis(30)).await;
    let before = drain(&mut rx);
    assert!(before.iter().any(|m| m.response_id() == Some(first_id)));

    let second = ResponseCoordinator::start(h.services.clone(), session.clone(), "次の質問").await;
    let second_id = second.response_id();
    let second = second.spawn();

    let second = second.await.unwrap();
    let first = first.await.unwrap();
    // Let detached synthesis of the first response drain out
    tokio::time::sleep(Duration::from_millis(100)).await;
    let after = drain(&mut rx);

    assert_eq!(first.state, ResponseState::Superseded);
    assert_eq!(second.state, ResponseState::Completed);
    assert!(after.iter().all(|m| m.response_id() != Some(first_id)));
    assert!(after.iter().any(|m| m.response_id() == Some(second_id)));

    // The second response saw no history; both exchanges were recorded
    assert!(h.llm.histories()[1].is_empty());
    assert_eq!(session.history_len(), 4);

    let records = h.store.turns_for(session.id()).await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().any(|r| r.response_id == first_id && r.superseded));
    assert!(records.iter().any(|r| r.response_id == second_id && !r.superseded));
}

#[tokio::test]
async fn test_interrupt_silences_response() {
    let llm = ScriptedLlm::new(vec![
        ScriptStep::delta("長い説明を始めます。"),
        ScriptStep::sleep_ms(50),
        ScriptStep::delta("ここから先は聞こえないはずです。"),
    ]);
    let h = harness(llm, RecordingTts::new(1));
    let (session, mut rx) = Session::channel(20, 256);

    let coordinator = ResponseCoordinator::start(h.services.clone(), session.clone(), "説明して").await;
    let id = coordinator.response_id();
    let handle = coordinator.spawn();

    tokio::time::sleep(Duration::from_millis(20)).await;
    drain(&mut rx);
    assert_eq!(session.interrupt(), Some(id));

    let outcome = handle.await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(outcome.state, ResponseState::Superseded);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_tool_result_is_spoken() {
    let llm = ScriptedLlm::new(vec![
        ScriptStep::delta("ただいま"),
        ScriptStep::tool("current_time", serde_json::json!({})),
    ]);
    let h = harness(llm, RecordingTts::new(1));
    let (session, _rx) = Session::channel(20, 256);

    let outcome = ResponseCoordinator::start(h.services.clone(), session, "今何時")
        .await
        .run()
        .await;

    assert_eq!(outcome.state, ResponseState::Completed);
    assert!(outcome.text.starts_with("ただいま"));
    assert!(outcome.text.ends_with("分です。"));
    assert!(h.llm.tool_results()[0].is_ok());
}

#[tokio::test]
async fn test_context_free_reply_is_cached() {
    let llm = ScriptedLlm::new(vec![ScriptStep::delta("富士山の標高は3776メートルです。")]);
    let h = harness(llm, RecordingTts::new(1));

    let (first, _rx1) = Session::channel(20, 256);
    ResponseCoordinator::start(h.services.clone(), first, "富士山の高さは？")
        .await
        .run()
        .await;

    let (second, mut rx2) = Session::channel(20, 256);
    let outcome = ResponseCoordinator::start(h.services.clone(), second, "富士山の高さは？")
        .await
        .run()
        .await;

    assert_eq!(h.llm.calls(), 1);
    assert_eq!(outcome.text, "富士山の標高は3776メートルです。");
    assert_eq!(chunks(&drain(&mut rx2)), vec![(0, 1, true)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sessions_share_synthesis_capacity() {
    let llm = ScriptedLlm::from_text(
        "一つ目の文です。二つ目の文です。三つ目の文です。四つ目の文です。",
        3,
        Duration::from_millis(1),
    );
    let h = harness(llm, RecordingTts::new(5));
    let max = h.services.limiter.max_concurrent();

    let mut handles = Vec::new();
    let mut receivers = Vec::new();
    for i in 0..10 {
        let (session, rx) = Session::channel(20, 256);
        receivers.push(rx);
        let coordinator =
            ResponseCoordinator::start(h.services.clone(), session, format!("質問その{}", i)).await;
        handles.push(coordinator.spawn());
    }

    for handle in handles {
        let outcome = handle.await.unwrap();
        assert_eq!(outcome.state, ResponseState::Completed);
        assert_eq!(outcome.chunks_delivered, 4);
    }

    assert!(h.services.limiter.peak() <= max);
    assert_eq!(h.services.limiter.outstanding(), 0);
}
