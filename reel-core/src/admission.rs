use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::ServiceError;

/// Admission rejected the request: every execution slot is busy and the wait
/// queue is full. Terminal for this request; the caller may retry later.
#[derive(Debug, Clone, Copy, Error)]
#[error("execution slots and wait queue are full")]
pub struct Overloaded;

impl From<Overloaded> for ServiceError {
    fn from(_: Overloaded) -> Self {
        ServiceError::Overloaded
    }
}

/// Proof that a request holds an execution slot. Dropping it releases the
/// slot and wakes the oldest queued waiter, on every exit path.
#[derive(Debug)]
pub struct AdmissionPermit {
    _slot: OwnedSemaphorePermit,
}

/// Bounds concurrent and queued work against the shared model resource.
///
/// Up to `max_concurrent` requests execute at once; up to `max_queued` more
/// wait in FIFO order for a slot. Anything beyond that is rejected
/// immediately rather than queued without bound.
#[derive(Debug)]
pub struct AdmissionController {
    slots: Arc<Semaphore>,
    queued: AtomicUsize,
    max_concurrent: usize,
    max_queued: usize,
}

impl AdmissionController {
    pub fn new(max_concurrent: usize, max_queued: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent)),
            queued: AtomicUsize::new(0),
            max_concurrent,
            max_queued,
        }
    }

    /// Admit the caller, queueing if every slot is busy. Returns
    /// `Err(Overloaded)` without suspending when the queue is already full.
    ///
    /// Queued waits are deliberately unbounded; callers that need a deadline
    /// wrap the call in a timeout.
    pub async fn admit(&self) -> Result<AdmissionPermit, Overloaded> {
        match self.slots.clone().try_acquire_owned() {
            Ok(slot) => Ok(AdmissionPermit { _slot: slot }),
            Err(TryAcquireError::Closed) => Err(Overloaded),
            Err(TryAcquireError::NoPermits) => {
                let _queue_slot = self.reserve_queue_slot()?;
                match self.slots.clone().acquire_owned().await {
                    Ok(slot) => Ok(AdmissionPermit { _slot: slot }),
                    Err(_) => Err(Overloaded),
                }
            }
        }
    }

    /// Claims one queue slot or rejects. Compare-exchange keeps the check and
    /// the increment atomic under concurrent arrivals.
    fn reserve_queue_slot(&self) -> Result<QueueSlot<'_>, Overloaded> {
        let mut observed = self.queued.load(Ordering::Acquire);
        loop {
            if observed >= self.max_queued {
                return Err(Overloaded);
            }
            match self.queued.compare_exchange(
                observed,
                observed + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(QueueSlot { queued: &self.queued }),
                Err(current) => observed = current,
            }
        }
    }

    /// Requests currently holding an execution slot.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.slots.available_permits()
    }

    /// Requests currently waiting for an execution slot.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn max_queued(&self) -> usize {
        self.max_queued
    }
}

/// Releases the queue slot when the waiter converts to running, or when the
/// waiting future is dropped before a slot frees.
struct QueueSlot<'a> {
    queued: &'a AtomicUsize,
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.queued.fetch_sub(1, Ordering::AcqRel);
    }
}
