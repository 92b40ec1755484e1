//! In-memory work queue shared by the workers of one batch.
//!
//! The lock is a plain (non-async) mutex held only for the duration of a single
//! deque operation, so it is never held across an await point. A popped item
//! leaves the queue entirely: the worker that popped it owns it until it either
//! finishes or pushes it back.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::QueueOrder;
use crate::model::WorkItem;

/// A work item plus the number of submissions already attempted for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedItem {
    pub item: WorkItem,
    pub attempts: u32,
    /// Not eligible to be taken before this instant.
    pub not_before: Option<Instant>,
}

impl QueuedItem {
    pub fn new(item: WorkItem) -> Self {
        Self {
            item,
            attempts: 0,
            not_before: None,
        }
    }

    fn is_due(&self, now: Instant) -> bool {
        self.not_before.is_none_or(|at| at <= now)
    }
}

/// Result of [`WorkQueue::take`].
#[derive(Debug)]
pub enum Next {
    Ready(QueuedItem),
    /// Items are pending but none is due; the earliest becomes due at this instant.
    Wait(Instant),
    /// Nothing left.
    Drained,
}

pub struct WorkQueue {
    items: Mutex<VecDeque<QueuedItem>>,
    order: QueueOrder,
    popped: AtomicU64,
    requeued: AtomicU64,
}

impl WorkQueue {
    pub fn new(order: QueueOrder) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            order,
            popped: AtomicU64::new(0),
            requeued: AtomicU64::new(0),
        }
    }

    /// Build a queue holding `items`. With [`QueueOrder::Fifo`] they are taken in
    /// the given order; with [`QueueOrder::Lifo`] the last one comes out first.
    pub fn seeded(order: QueueOrder, items: impl IntoIterator<Item = WorkItem>) -> Self {
        let queue = Self::new(order);
        queue
            .items
            .lock()
            .extend(items.into_iter().map(QueuedItem::new));
        queue
    }

    /// Remove and return the next due item in queue order.
    pub fn take(&self) -> Next {
        let now = Instant::now();
        let taken = {
            let mut items = self.items.lock();
            if items.is_empty() {
                return Next::Drained;
            }
            let position = match self.order {
                QueueOrder::Fifo => items.iter().position(|q| q.is_due(now)),
                QueueOrder::Lifo => items.iter().rposition(|q| q.is_due(now)),
            };
            match position {
                Some(i) => items.remove(i),
                None => {
                    let earliest = items.iter().filter_map(|q| q.not_before).min();
                    return Next::Wait(earliest.unwrap_or(now));
                }
            }
        };
        match taken {
            Some(queued) => {
                self.popped.fetch_add(1, Ordering::Relaxed);
                Next::Ready(queued)
            }
            None => Next::Drained,
        }
    }

    /// Remove and return the next due item, or None if nothing is due.
    pub fn pop(&self) -> Option<QueuedItem> {
        match self.take() {
            Next::Ready(queued) => Some(queued),
            Next::Wait(_) | Next::Drained => None,
        }
    }

    /// Return an item to the tail of the queue so it is retried later. Its
    /// `not_before` is kept as given.
    pub fn push_back(&self, item: QueuedItem) {
        self.items.lock().push_back(item);
        self.requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn order(&self) -> QueueOrder {
        self.order
    }

    /// Total successful pops since the queue was created.
    pub fn popped(&self) -> u64 {
        self.popped.load(Ordering::Relaxed)
    }

    /// Total push-backs since the queue was created.
    pub fn requeued(&self) -> u64 {
        self.requeued.load(Ordering::Relaxed)
    }

    /// Identifiers of pending items, in queue storage order.
    pub fn pending_identifiers(&self) -> Vec<String> {
        self.items
            .lock()
            .iter()
            .map(|q| q.item.identifier.clone())
            .collect()
    }
}
