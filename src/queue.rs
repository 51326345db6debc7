//! In-memory pending-event queue and the single-flight flush guard

use crate::event::Event;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::debug;

/// Unbounded FIFO of events awaiting delivery.
///
/// The lock is only held for the duration of a push or drain and never
/// across an await point, so producers can enqueue while a flush is
/// waiting on the network.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<VecDeque<Event>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the queue, e.g. from a restored snapshot
    pub fn from_events(events: Vec<Event>) -> Self {
        Self {
            events: Mutex::new(VecDeque::from(events)),
        }
    }

    pub fn push(&self, event: Event) {
        let mut events = self.events.lock();
        events.push_back(event);
        debug!("Queued event, current size: {}", events.len());
    }

    /// Append to the back, keeping the given order
    pub fn push_all(&self, batch: Vec<Event>) {
        if batch.is_empty() {
            return;
        }
        self.events.lock().extend(batch);
    }

    /// Put events back ahead of everything queued, keeping the given order
    pub fn push_front_all(&self, batch: Vec<Event>) {
        if batch.is_empty() {
            return;
        }
        let mut events = self.events.lock();
        for event in batch.into_iter().rev() {
            events.push_front(event);
        }
    }

    /// Remove up to `max` events from the front
    pub fn take_batch(&self, max: usize) -> Vec<Event> {
        let mut events = self.events.lock();
        let count = std::cmp::min(max, events.len());
        events.drain(..count).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Copy of the current contents, front first
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().iter().cloned().collect()
    }
}

/// Idle/Flushing state shared by all flush triggers
#[derive(Debug, Default)]
pub struct FlushState {
    flushing: AtomicBool,
    idle: Notify,
}

impl FlushState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move Idle -> Flushing. `None` means another flush holds the state.
    pub fn try_begin(&self) -> Option<FlushGuard<'_>> {
        self.flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlushGuard { state: self })
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    /// Resolve once no flush holds the state
    pub async fn wait_idle(&self) {
        let notified = self.idle.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if !self.is_flushing() {
            return;
        }
        notified.await;
    }
}

/// Returns the state to Idle when dropped, including when the flush
/// future itself is dropped mid-send.
#[derive(Debug)]
pub struct FlushGuard<'a> {
    state: &'a FlushState,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.state.flushing.store(false, Ordering::Release);
        self.state.idle.notify_waiters();
    }
}
