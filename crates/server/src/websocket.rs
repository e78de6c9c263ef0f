//! WebSocket Handler
//!
//! One connection is one session. Outbound messages are produced by the
//! session's responses and drained here by a writer task; inbound frames
//! are handled one at a time, in arrival order.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parley_agent::Session;
use parley_core::{ErrorCode, ServerMessage};
use tokio::sync::{mpsc, watch};

use crate::metrics::record_session_created;
use crate::state::AppState;

/// Upgrade the connection and register a new session for it
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Result<Response, StatusCode> {
    let (session, outbound) = Session::channel(
        state.settings.session.history_turns,
        state.settings.server.outbound_buffer,
    );
    state.registry.register(session.clone())?;
    record_session_created();

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, session, outbound, state)))
}

async fn handle_socket(
    socket: WebSocket,
    session: Arc<Session>,
    outbound: mpsc::Receiver<ServerMessage>,
    state: AppState,
) {
    let (sender, mut receiver) = socket.split();

    session
        .emit(ServerMessage::SessionInfo {
            session_id: session.id().to_string(),
        })
        .await;

    let writer = tokio::spawn(write_loop(sender, outbound, session.closed()));
    let mut closed = session.closed();

    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    // Responses run detached
                    let _ = state.handler.handle(&session, &text).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    session
                        .emit(ServerMessage::error(
                            ErrorCode::MalformedMessage,
                            "Binary frames are not supported",
                        ))
                        .await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => session.touch(),
                Some(Err(e)) => {
                    tracing::warn!(session_id = %session.id(), error = %e, "WebSocket error");
                    break;
                }
            },
            _ = closed.changed() => {
                tracing::debug!(session_id = %session.id(), "Session closed by server");
                break;
            }
        }
    }

    state.registry.unregister(session.id());
    // Unregister closed the session, which stops the writer
    if let Err(e) = writer.await {
        tracing::debug!(session_id = %session.id(), error = %e, "Writer task ended abnormally");
    }
    tracing::info!(session_id = %session.id(), "WebSocket closed");
}

async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ServerMessage>,
    mut closed: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else { break };
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize outbound message");
                        continue;
                    }
                };
                if let Err(e) = sender.send(Message::Text(json)).await {
                    tracing::debug!(error = %e, "Client went away");
                    break;
                }
            }
            _ = closed.changed() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }
}
