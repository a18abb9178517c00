//! Completion barrier over a fixed set of participants.
//!
//! Every participant holds one [`CompletionGuard`]. The barrier releases
//! when the last guard is completed or dropped, and it releases exactly
//! once. Dropping a guard counts as completion, so a replica task that
//! exits early (or panics) can never wedge the run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Notify;

#[derive(Debug)]
struct BarrierInner {
    participants: usize,
    remaining: AtomicUsize,
    released: AtomicBool,
    notify: Notify,
}

/// Barrier that releases once every participant has signalled termination.
#[derive(Debug, Clone)]
pub struct CompletionBarrier {
    inner: Arc<BarrierInner>,
}

impl CompletionBarrier {
    /// Creates a barrier and one guard per participant.
    ///
    /// A barrier with zero participants is released immediately.
    #[must_use]
    pub fn new(participants: usize) -> (Self, Vec<CompletionGuard>) {
        let inner = Arc::new(BarrierInner {
            participants,
            remaining: AtomicUsize::new(participants),
            released: AtomicBool::new(participants == 0),
            notify: Notify::new(),
        });

        let guards = (0..participants)
            .map(|slot| CompletionGuard {
                inner: Some(Arc::clone(&inner)),
                slot,
            })
            .collect();

        (Self { inner }, guards)
    }

    /// Returns the number of participants.
    #[must_use]
    pub fn participants(&self) -> usize {
        self.inner.participants
    }

    /// Returns the number of participants that have not completed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.inner.remaining.load(Ordering::Acquire)
    }

    /// Returns true once every participant has completed.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Waits until the barrier releases.
    pub async fn wait(&self) {
        loop {
            // Register interest before checking, so a release between the
            // check and the await is not lost.
            let notified = self.inner.notify.notified();
            if self.is_released() {
                return;
            }
            notified.await;
        }
    }
}

/// One participant's completion signal.
#[derive(Debug)]
pub struct CompletionGuard {
    inner: Option<Arc<BarrierInner>>,
    slot: usize,
}

impl CompletionGuard {
    /// Returns the participant slot this guard was issued for.
    #[must_use]
    pub const fn slot(&self) -> usize {
        self.slot
    }

    /// Signals completion for this participant.
    pub fn complete(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };

        if inner.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            inner.released.store(true, Ordering::Release);
            inner.notify.notify_waiters();
            tracing::debug!(participants = inner.participants, "completion barrier released");
        }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.release();
    }
}
