//! In-memory FIFO of pending steps.
//!
//! The queue only orders work; the durable copy of every pending step lives
//! on its job record, so the queue can be rebuilt after a restart.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::domain::{JobId, StepKind, Ticket};
use crate::{Error, Result};

/// One enqueued step of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub job_id: JobId,
    pub step: StepKind,
    pub ticket: Ticket,
    /// Manual retry: the record is already `processing` with an open entry.
    pub retry: bool,
}

impl QueueEntry {
    pub fn new(job_id: JobId, step: StepKind, ticket: Ticket) -> Self {
        Self {
            job_id,
            step,
            ticket,
            retry: false,
        }
    }

    pub fn retry(job_id: JobId, step: StepKind, ticket: Ticket) -> Self {
        Self {
            job_id,
            step,
            ticket,
            retry: true,
        }
    }
}

/// Ordering backend for pending steps.
pub trait StepQueue: Send + Sync {
    /// Append to the tail. Fails with [`Error::QueueFull`] at capacity.
    fn push(&self, entry: QueueEntry) -> Result<()>;

    /// Insert at the head. Never fails; used for manual retries.
    fn push_front(&self, entry: QueueEntry);

    fn try_pop(&self) -> Option<QueueEntry>;

    /// Signalled whenever an entry is added.
    fn notifier(&self) -> Arc<Notify>;

    fn depth(&self) -> usize;
}

/// Bounded in-process FIFO.
pub struct InMemoryStepQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
    capacity: usize,
    notify: Arc<Notify>,
}

impl InMemoryStepQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            notify: Arc::new(Notify::new()),
        }
    }
}

impl StepQueue for InMemoryStepQueue {
    fn push(&self, entry: QueueEntry) -> Result<()> {
        {
            let mut entries = self.entries.lock();
            if entries.len() >= self.capacity {
                return Err(Error::QueueFull {
                    capacity: self.capacity,
                });
            }
            entries.push_back(entry);
        }
        self.notify.notify_one();
        Ok(())
    }

    fn push_front(&self, entry: QueueEntry) {
        self.entries.lock().push_front(entry);
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<QueueEntry> {
        self.entries.lock().pop_front()
    }

    fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    fn depth(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Source of enqueue tickets.
#[derive(Debug, Default)]
pub struct TicketSequence {
    last: AtomicU64,
}

impl TicketSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> Ticket {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Make sure future tickets are greater than `ticket`.
    pub fn observe(&self, ticket: Ticket) {
        self.last.fetch_max(ticket, Ordering::SeqCst);
    }
}
