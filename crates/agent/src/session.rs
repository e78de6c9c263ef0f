//! Live per-connection session state
//!
//! A session owns the pointer to its current response. Every
//! client-visible effect of a response goes through
//! [`Session::deliver_if_current`], which re-checks that pointer right
//! before the message is queued. Demoting a response is a single atomic
//! store; nothing is aborted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use parley_core::{Emotion, ServerMessage, SessionStatus, Turn};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::conversation::ConversationHistory;

/// No response is current
pub const NO_RESPONSE: u64 = 0;

/// Fixed rate-limit window, stored per session
#[derive(Debug, Clone, Copy)]
pub struct RateWindow {
    pub start: Instant,
    pub count: u32,
}

pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    current_response: AtomicU64,
    last_response: AtomicU64,
    status: RwLock<SessionStatus>,
    history: Mutex<ConversationHistory>,
    last_activity: Mutex<Instant>,
    rate_window: Mutex<RateWindow>,
    outbound: mpsc::Sender<ServerMessage>,
    closed: watch::Sender<bool>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        history_turns: usize,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Self {
        let now = Instant::now();
        let (closed, _) = watch::channel(false);

        Self {
            id: id.into(),
            created_at: Utc::now(),
            current_response: AtomicU64::new(NO_RESPONSE),
            last_response: AtomicU64::new(NO_RESPONSE),
            status: RwLock::new(SessionStatus::Idle),
            history: Mutex::new(ConversationHistory::new(history_turns)),
            last_activity: Mutex::new(now),
            rate_window: Mutex::new(RateWindow {
                start: now,
                count: 0,
            }),
            outbound,
            closed,
        }
    }

    /// Session with a fresh UUID and its own outbound queue
    pub fn channel(
        history_turns: usize,
        buffer: usize,
    ) -> (Arc<Self>, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let session = Self::new(uuid::Uuid::new_v4().to_string(), history_turns, tx);
        (Arc::new(session), rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Allocate the next response id and make it current
    ///
    /// Whatever response was current before is demoted by this store.
    pub fn begin_response(&self) -> u64 {
        let id = self.last_response.fetch_add(1, Ordering::SeqCst) + 1;
        self.current_response.store(id, Ordering::SeqCst);
        id
    }

    /// Demote the current response without starting another
    pub fn interrupt(&self) -> Option<u64> {
        let previous = self.current_response.swap(NO_RESPONSE, Ordering::SeqCst);
        (previous != NO_RESPONSE).then_some(previous)
    }

    /// Stop `response_id` from producing further effects, if still current
    pub fn retire(&self, response_id: u64) -> bool {
        self.current_response
            .compare_exchange(response_id, NO_RESPONSE, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Retire `response_id` and settle the session on `status`
    ///
    /// The status lock is held across the swap, so a concurrent
    /// [`Session::set_status_if_current`] either lands before it and is
    /// overwritten, or sees the response retired and does nothing.
    pub fn retire_with_status(&self, response_id: u64, status: SessionStatus) -> bool {
        let mut current = self.status.write();
        if !self.retire(response_id) {
            return false;
        }
        *current = status;
        true
    }

    pub fn current_response_id(&self) -> u64 {
        self.current_response.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, response_id: u64) -> bool {
        response_id != NO_RESPONSE && self.current_response_id() == response_id
    }

    /// Queue a message for the client
    ///
    /// Returns false once the connection is gone.
    pub async fn emit(&self, message: ServerMessage) -> bool {
        match self.outbound.send(message).await {
            Ok(()) => {
                self.touch();
                true
            }
            Err(_) => false,
        }
    }

    /// Queue a message only while `response_id` is current
    ///
    /// Currency is checked after queue space is reserved, so no await point
    /// separates the check from the send.
    pub async fn deliver_if_current(&self, response_id: u64, message: ServerMessage) -> bool {
        if !self.is_current(response_id) {
            return false;
        }

        let permit = match self.outbound.reserve().await {
            Ok(permit) => permit,
            Err(_) => return false,
        };

        if !self.is_current(response_id) {
            return false;
        }

        permit.send(message);
        self.touch();
        true
    }

    /// Change status and tell the client, only while `response_id` is current
    pub async fn set_status_if_current(
        &self,
        response_id: u64,
        status: SessionStatus,
        emotion: Emotion,
    ) -> bool {
        {
            let mut current = self.status.write();
            if !self.is_current(response_id) {
                return false;
            }
            *current = status;
        }
        self.deliver_if_current(response_id, ServerMessage::Status { status, emotion })
            .await
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.read()
    }

    pub fn set_status(&self, status: SessionStatus) {
        *self.status.write() = status;
    }

    pub fn history_snapshot(&self) -> Vec<Turn> {
        self.history.lock().snapshot()
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    pub fn append_turn(&self, turn: Turn) {
        self.history.lock().push(turn);
    }

    /// Append one user/assistant exchange
    pub fn append_exchange(&self, user: Turn, assistant: Turn) {
        let mut history = self.history.lock();
        history.push(user);
        history.push(assistant);
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Exclusive access to the rate-limit window
    pub fn rate_window(&self) -> parking_lot::MutexGuard<'_, RateWindow> {
        self.rate_window.lock()
    }

    /// Ask the connection to shut down
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves-on-change handle for the close signal
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("current_response", &self.current_response_id())
            .field("status", &self.status())
            .finish()
    }
}
