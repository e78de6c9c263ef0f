//! Synthesis concurrency limiting
//!
//! The external TTS service is rate-limited on its side, so capacity is a
//! process-wide resource: one limiter is shared by every session.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::PipelineError;

/// Fair counting semaphore gating calls into the TTS backend
///
/// Waiters are admitted in FIFO order. The number of live
/// [`SynthesisTicket`]s never exceeds `max_concurrent`.
#[derive(Debug)]
pub struct SynthesisLimiter {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    outstanding: Arc<AtomicUsize>,
    peak: AtomicUsize,
}

impl SynthesisLimiter {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            outstanding: Arc::new(AtomicUsize::new(0)),
            peak: AtomicUsize::new(0),
        }
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> Result<SynthesisTicket, PipelineError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::LimiterClosed)?;

        let now = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        Ok(SynthesisTicket {
            outstanding: self.outstanding.clone(),
            _permit: permit,
        })
    }

    /// Release a ticket explicitly; equivalent to dropping it
    pub fn release(&self, ticket: SynthesisTicket) {
        drop(ticket);
    }

    /// Run `fut` while holding a ticket
    ///
    /// The ticket is released on every exit path, including when the
    /// future is dropped part-way through.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, PipelineError>
    where
        F: Future<Output = T>,
    {
        let ticket = self.acquire().await?;
        let output = fut.await;
        drop(ticket);
        Ok(output)
    }

    /// Fail every pending and future acquire
    pub fn close(&self) {
        self.semaphore.close();
        tracing::info!(outstanding = self.outstanding(), "Synthesis limiter closed");
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Tickets currently held
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Highest number of tickets ever held at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Lease on one synthesis slot
///
/// Released exactly once, when dropped. `release(self)` consumes the ticket
/// so a second release cannot be written.
#[derive(Debug)]
pub struct SynthesisTicket {
    outstanding: Arc<AtomicUsize>,
    // Dropped after `Drop::drop` runs, so the counter is decremented before
    // the slot becomes available to the next waiter.
    _permit: OwnedSemaphorePermit,
}

impl SynthesisTicket {
    pub fn release(self) {}
}

impl Drop for SynthesisTicket {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}
