//! Concurrency ceiling for tool processes.
//!
//! A job first reserves a [`QueueTicket`], which counts against the bounded
//! pending queue, then trades it for a [`SlotPermit`] once a running slot
//! frees. `tokio::sync::Semaphore` is fair, so waiters are promoted in the
//! order they started waiting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::CoreError;

pub struct ExecutionSlots {
    semaphore: Arc<Semaphore>,
    ceiling: usize,
    pending: Arc<AtomicUsize>,
    max_pending: usize,
}

/// A place in the pending queue. Released on drop.
#[derive(Debug)]
pub struct QueueTicket {
    pending: Arc<AtomicUsize>,
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A running slot. Released on drop.
#[derive(Debug)]
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
}

impl ExecutionSlots {
    /// `ceiling` running processes at most; `max_pending` jobs may hold a
    /// ticket (waiting or not yet started) at once.
    pub fn new(ceiling: usize, max_pending: usize) -> Self {
        let ceiling = ceiling.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(ceiling)),
            ceiling,
            pending: Arc::new(AtomicUsize::new(0)),
            max_pending,
        }
    }

    /// Reserve a place in the pending queue, or fail with
    /// [`CoreError::QueueFull`].
    pub fn try_enqueue(&self) -> Result<QueueTicket, CoreError> {
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_pending).then_some(n + 1)
            })
            .map_err(|_| CoreError::QueueFull {
                capacity: self.max_pending,
            })?;
        Ok(QueueTicket {
            pending: Arc::clone(&self.pending),
        })
    }

    /// Wait for a running slot. The ticket is released once the slot is held.
    pub async fn acquire(&self, ticket: QueueTicket) -> Result<SlotPermit, CoreError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| CoreError::Internal("execution slots closed".to_string()))?;
        drop(ticket);
        Ok(SlotPermit { _permit: permit })
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Slots currently held by running jobs.
    pub fn running(&self) -> usize {
        self.ceiling - self.semaphore.available_permits()
    }

    /// Tickets currently outstanding.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn enqueue_rejects_when_full() {
        let slots = ExecutionSlots::new(1, 2);
        let _a = slots.try_enqueue().unwrap();
        let _b = slots.try_enqueue().unwrap();
        assert_matches!(
            slots.try_enqueue(),
            Err(CoreError::QueueFull { capacity: 2 })
        );
    }

    #[test]
    fn dropping_ticket_frees_queue_place() {
        let slots = ExecutionSlots::new(1, 1);
        let ticket = slots.try_enqueue().unwrap();
        assert_eq!(slots.pending(), 1);
        drop(ticket);
        assert_eq!(slots.pending(), 0);
        assert!(slots.try_enqueue().is_ok());
    }

    #[test]
    fn zero_ceiling_is_clamped() {
        assert_eq!(ExecutionSlots::new(0, 1).ceiling(), 1);
    }

    #[tokio::test]
    async fn acquire_releases_ticket_and_holds_slot() {
        let slots = ExecutionSlots::new(2, 4);
        let ticket = slots.try_enqueue().unwrap();
        let permit = slots.acquire(ticket).await.unwrap();
        assert_eq!(slots.pending(), 0);
        assert_eq!(slots.running(), 1);
        drop(permit);
        assert_eq!(slots.running(), 0);
    }

    #[tokio::test]
    async fn waiter_is_promoted_when_slot_frees() {
        let slots = Arc::new(ExecutionSlots::new(1, 4));
        let first = slots.acquire(slots.try_enqueue().unwrap()).await.unwrap();

        let waiting = Arc::clone(&slots);
        let ticket = slots.try_enqueue().unwrap();
        let handle = tokio::spawn(async move { waiting.acquire(ticket).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        assert_eq!(slots.pending(), 1);

        drop(first);
        let second = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(second.is_ok());
        assert_eq!(slots.pending(), 0);
        assert_eq!(slots.running(), 1);
    }
}
