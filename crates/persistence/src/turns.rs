//! Completed turn storage

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use parley_core::Emotion;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::PersistenceError;

/// One user utterance and the assistant's reply to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub session_id: String,
    pub response_id: u64,
    pub user_text: String,
    pub assistant_text: String,
    pub emotion: Emotion,
    /// The reply was demoted by a newer utterance before it finished
    pub superseded: bool,
    pub completed_at: DateTime<Utc>,
}

/// Turn store trait for abstraction
#[async_trait]
pub trait TurnStore: Send + Sync {
    async fn append_turn(&self, record: &TurnRecord) -> Result<(), PersistenceError>;

    /// Turns of one session, oldest first
    async fn turns_for(&self, session_id: &str) -> Result<Vec<TurnRecord>, PersistenceError>;
}

/// Write a record without waiting for it
///
/// Failures are logged and otherwise dropped; persistence never blocks or
/// fails a response.
pub fn spawn_append(store: Arc<dyn TurnStore>, record: TurnRecord) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = store.append_turn(&record).await {
            tracing::warn!(
                session_id = %record.session_id,
                response_id = record.response_id,
                error = %e,
                "Failed to persist turn"
            );
        }
    })
}

/// In-memory store holding the most recent records
///
/// Once `capacity` records are held, each append drops the oldest one.
pub struct InMemoryTurnStore {
    records: RwLock<VecDeque<TurnRecord>>,
    capacity: usize,
}

impl InMemoryTurnStore {
    pub const DEFAULT_CAPACITY: usize = 10_000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for InMemoryTurnStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TurnStore for InMemoryTurnStore {
    async fn append_turn(&self, record: &TurnRecord) -> Result<(), PersistenceError> {
        let mut records = self.records.write();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record.clone());
        Ok(())
    }

    async fn turns_for(&self, session_id: &str) -> Result<Vec<TurnRecord>, PersistenceError> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect())
    }
}

/// Append-only JSON-lines file, one record per line
pub struct JsonlTurnStore {
    path: PathBuf,
    // Serializes appends so concurrent lines never interleave
    write_lock: Mutex<()>,
}

impl JsonlTurnStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TurnStore for JsonlTurnStore {
    async fn append_turn(&self, record: &TurnRecord) -> Result<(), PersistenceError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn turns_for(&self, session_id: &str) -> Result<Vec<TurnRecord>, PersistenceError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (i, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: TurnRecord =
                serde_json::from_str(line).map_err(|e| PersistenceError::InvalidData {
                    line: i + 1,
                    message: e.to_string(),
                })?;
            if record.session_id == session_id {
                records.push(record);
            }
        }
        Ok(records)
    }
}
