//! Session registry
//!
//! Tracks live sessions and evicts the ones that have gone idle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use parley_agent::Session;
use parley_config::{ServerConfig, SessionConfig};
use tokio::sync::watch;

use crate::ServerError;

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    max_sessions: usize,
    idle_timeout: Duration,
    sweep_interval: Duration,
}

impl SessionRegistry {
    pub fn new(server: &ServerConfig, session: &SessionConfig) -> Self {
        Self::with_limits(
            server.max_sessions,
            session.idle_timeout(),
            session.sweep_interval(),
        )
    }

    pub fn with_limits(max_sessions: usize, idle_timeout: Duration, sweep_interval: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
            idle_timeout,
            sweep_interval,
        }
    }

    /// Add a session, sweeping idle ones first if the registry is full
    pub fn register(&self, session: Arc<Session>) -> Result<(), ServerError> {
        let mut sessions = self.sessions.write();

        if sessions.len() >= self.max_sessions {
            self.sweep_locked(&mut sessions);

            if sessions.len() >= self.max_sessions {
                tracing::warn!(max_sessions = self.max_sessions, "Rejected session, registry full");
                return Err(ServerError::Capacity(sessions.len()));
            }
        }

        tracing::info!(session_id = %session.id(), "Registered session");
        sessions.insert(session.id().to_string(), session);
        crate::metrics::record_active_sessions(sessions.len());
        Ok(())
    }

    /// Remove a session and stop whatever it was saying
    pub fn unregister(&self, id: &str) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write();
        let session = sessions.remove(id)?;
        crate::metrics::record_active_sessions(sessions.len());
        drop(sessions);

        session.interrupt();
        session.close();
        tracing::info!(session_id = %id, "Unregistered session");
        Some(session)
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Evict idle sessions, returning how many were removed
    pub fn sweep(&self) -> usize {
        let mut sessions = self.sessions.write();
        self.sweep_locked(&mut sessions)
    }

    fn sweep_locked(&self, sessions: &mut HashMap<String, Arc<Session>>) -> usize {
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.idle_for() > self.idle_timeout)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(session) = sessions.remove(id) {
                session.interrupt();
                session.close();
                tracing::info!(
                    session_id = %id,
                    idle_secs = session.idle_for().as_secs(),
                    "Evicted idle session"
                );
            }
        }

        if !expired.is_empty() {
            crate::metrics::record_active_sessions(sessions.len());
        }
        expired.len()
    }

    /// Run `sweep` every `sweep_interval` until the returned sender sends `true`
    pub fn start_sweeper(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let registry = Arc::clone(self);
        let period = registry.sweep_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let evicted = registry.sweep();
                        if evicted > 0 {
                            tracing::info!(evicted, remaining = registry.count(), "Session sweep");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            tracing::info!("Session sweeper shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(max: usize) -> SessionRegistry {
        SessionRegistry::with_limits(max, Duration::from_secs(60), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = registry(10);
        let (session, _rx) = Session::channel(10, 8);
        registry.register(session.clone()).unwrap();

        let found = registry.lookup(session.id()).unwrap();
        assert_eq!(found.id(), session.id());
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.list(), vec![session.id().to_string()]);
    }

    #[tokio::test]
    async fn test_unregister_closes_session() {
        let registry = registry(10);
        let (session, _rx) = Session::channel(10, 8);
        let response = session.begin_response();
        registry.register(session.clone()).unwrap();

        assert!(registry.unregister(session.id()).is_some());
        assert!(registry.lookup(session.id()).is_none());
        assert!(session.is_closed());
        assert!(!session.is_current(response));
        assert!(registry.unregister(session.id()).is_none());
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let registry = registry(2);
        let (a, _ra) = Session::channel(10, 8);
        let (b, _rb) = Session::channel(10, 8);
        let (c, _rc) = Session::channel(10, 8);
        registry.register(a).unwrap();
        registry.register(b).unwrap();

        assert!(matches!(registry.register(c), Err(ServerError::Capacity(2))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_idle_sessions() {
        let registry = registry(10);
        let (idle, _ri) = Session::channel(10, 8);
        let (busy, _rb) = Session::channel(10, 8);
        registry.register(idle.clone()).unwrap();
        registry.register(busy.clone()).unwrap();

        tokio::time::advance(Duration::from_secs(45)).await;
        busy.touch();
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(registry.sweep(), 1);
        assert!(registry.lookup(idle.id()).is_none());
        assert!(idle.is_closed());
        assert!(registry.lookup(busy.id()).is_some());
        assert!(!busy.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_registry_sweeps_before_rejecting() {
        let registry = registry(1);
        let (stale, _rs) = Session::channel(10, 8);
        registry.register(stale.clone()).unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        let (fresh, _rf) = Session::channel(10, 8);
        registry.register(fresh.clone()).unwrap();

        assert!(registry.lookup(stale.id()).is_none());
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper() {
        let registry = Arc::new(registry(10));
        let (session, _rx) = Session::channel(10, 8);
        registry.register(session.clone()).unwrap();

        let shutdown = registry.start_sweeper();
        let mut closed = session.closed();

        // Idle past the timeout; the next tick evicts it
        tokio::time::timeout(Duration::from_secs(120), closed.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(registry.count(), 0);

        shutdown.send(true).unwrap();
    }
}
