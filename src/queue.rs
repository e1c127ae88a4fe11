//! Bounded read-ahead queue between the storage loader and the play loop
//!
//! Single producer (the storage loading thread), single consumer (the play
//! loop). `peek` is non-destructive so the play loop can hand its turn to
//! `play_next`/`seek` without losing the head message; `seek` drains the
//! queue from a control thread, which is safe because the steal-flag protocol
//! guarantees the consumer is not inside a queue operation at that point.
//!
//! There are no blocking operations; callers poll. `size_approx` is loosely
//! consistent and callable from either side without taking the lock.

use crate::types::SerializedMessage;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Bounded (by convention, not enforcement) FIFO of serialized messages.
#[derive(Default)]
pub struct MessageQueue {
    inner: Mutex<VecDeque<Arc<SerializedMessage>>>,
    len: AtomicUsize,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Producer side only; the boundary check lives in the
    /// storage loader, not here.
    pub fn enqueue(&self, message: Arc<SerializedMessage>) {
        let mut inner = self.inner.lock();
        inner.push_back(message);
        self.len.store(inner.len(), Ordering::Release);
    }

    /// A clone of the head message, without removing it.
    pub fn peek(&self) -> Option<Arc<SerializedMessage>> {
        self.inner.lock().front().cloned()
    }

    /// Remove the head message; returns whether one was removed.
    pub fn pop(&self) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.pop_front().is_some();
        self.len.store(inner.len(), Ordering::Release);
        removed
    }

    /// Loosely-consistent queue length, readable from either side.
    pub fn size_approx(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }
}
