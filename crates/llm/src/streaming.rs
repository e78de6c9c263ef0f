//! Streaming reply channel
//!
//! A backend writes [`LlmEvent`]s into a [`ReplySender`]; the response
//! coordinator owns the matching [`ReplyStream`] and consumes it in order.

use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::Stream;

use crate::LlmError;

/// Reply event
#[derive(Debug)]
pub enum LlmEvent {
    /// Next piece of reply text
    Delta(String),
    /// The model wants a tool result before it continues
    ToolCall(ToolCall),
    /// The stream broke; no further events follow
    Failed(LlmError),
}

/// Tool invocation requested mid-stream
#[derive(Debug)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
    respond: oneshot::Sender<Result<String, String>>,
}

impl ToolCall {
    /// Hand the tool result back to the model
    ///
    /// Returns false when the backend stopped waiting for it.
    pub fn respond(self, result: Result<String, String>) -> bool {
        self.respond.send(result).is_ok()
    }
}

/// Consumer side of a reply
pub struct ReplyStream {
    rx: mpsc::Receiver<LlmEvent>,
    text: String,
    complete: bool,
}

impl ReplyStream {
    pub fn new(rx: mpsc::Receiver<LlmEvent>) -> Self {
        Self {
            rx,
            text: String::new(),
            complete: false,
        }
    }

    /// Create a connected sender/stream pair
    pub fn channel(buffer: usize) -> (ReplySender, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (ReplySender { tx }, Self::new(rx))
    }

    /// Next event, or `None` once the backend is done
    pub async fn next_event(&mut self) -> Option<LlmEvent> {
        if self.complete {
            return None;
        }

        let event = self.rx.recv().await;
        self.observe(event.as_ref());
        event
    }

    /// Text received so far
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    fn observe(&mut self, event: Option<&LlmEvent>) {
        match event {
            Some(LlmEvent::Delta(delta)) => self.text.push_str(delta),
            Some(LlmEvent::Failed(_)) | None => self.complete = true,
            Some(LlmEvent::ToolCall(_)) => {}
        }
    }
}

impl Stream for ReplyStream {
    type Item = LlmEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.complete {
            return Poll::Ready(None);
        }

        match Pin::new(&mut self.rx).poll_recv(cx) {
            Poll::Ready(event) => {
                self.observe(event.as_ref());
                Poll::Ready(event)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Producer side of a reply
///
/// Every send reports whether the consumer is still listening, so a backend
/// can stop generating once the reply is abandoned.
#[derive(Debug, Clone)]
pub struct ReplySender {
    tx: mpsc::Sender<LlmEvent>,
}

impl ReplySender {
    pub async fn delta(&self, text: impl Into<String>) -> bool {
        self.tx.send(LlmEvent::Delta(text.into())).await.is_ok()
    }

    pub async fn fail(&self, error: LlmError) -> bool {
        self.tx.send(LlmEvent::Failed(error)).await.is_ok()
    }

    /// Ask the consumer to run a tool and wait for its result
    pub async fn tool_call(&self, name: impl Into<String>, arguments: Value) -> Result<String, LlmError> {
        let (respond, result) = oneshot::channel();
        let call = ToolCall {
            name: name.into(),
            arguments,
            respond,
        };

        self.tx
            .send(LlmEvent::ToolCall(call))
            .await
            .map_err(|_| LlmError::Stream("reply consumer dropped".to_string()))?;

        match result.await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(message)) => Err(LlmError::ToolCall(message)),
            Err(_) => Err(LlmError::ToolCall("no tool result returned".to_string())),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_stream_collects_text() {
        let (tx, mut stream) = ReplyStream::channel(8);
        tokio::spawn(async move {
            tx.delta("こんにちは").await;
            tx.delta("。").await;
        });

        let mut deltas = Vec::new();
        while let Some(event) = stream.next_event().await {
            if let LlmEvent::Delta(d) = event {
                deltas.push(d);
            }
        }

        assert_eq!(deltas, vec!["こんにちは", "。"]);
        assert_eq!(stream.text(), "こんにちは。");
        assert!(stream.is_complete());
        assert!(stream.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_failure_ends_stream() {
        let (tx, stream) = ReplyStream::channel(8);
        tokio::spawn(async move {
            tx.delta("partial").await;
            tx.fail(LlmError::Stream("reset".into())).await;
            // Ignored by the consumer
            tx.delta("after").await;
        });

        let events: Vec<LlmEvent> = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], LlmEvent::Failed(_)));
    }

    #[tokio::test]
    async fn test_tool_call_round_trip() {
        let (tx, mut stream) = ReplyStream::channel(8);
        let producer = tokio::spawn(async move {
            tx.tool_call("current_time", serde_json::json!({})).await
        });

        match stream.next_event().await {
            Some(LlmEvent::ToolCall(call)) => {
                assert_eq!(call.name, "current_time");
                assert!(call.respond(Ok("12:00".to_string())));
            }
            other => panic!("expected tool call, got {:?}", other),
        }

        assert_eq!(producer.await.unwrap().unwrap(), "12:00");
    }

    #[tokio::test]
    async fn test_dropped_tool_call_is_an_error() {
        let (tx, mut stream) = ReplyStream::channel(8);
        let producer = tokio::spawn(async move {
            tx.tool_call("web_search", serde_json::json!({"query": "x"})).await
        });

        drop(stream.next_event().await);
        let result = producer.await.unwrap();
        assert!(matches!(result, Err(LlmError::ToolCall(_))));
    }

    #[tokio::test]
    async fn test_sender_sees_closed_consumer() {
        let (tx, stream) = ReplyStream::channel(1);
        drop(stream);
        assert!(tx.is_closed());
        assert!(!tx.delta("lost").await);
    }
}
