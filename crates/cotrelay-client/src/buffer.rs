//! Bounded FIFO of events awaiting the egress link
//!
//! Producers are the pipeline workers, the single consumer is the egress
//! task. The consumer peeks at the head, writes it, and only then pops it,
//! so an event survives a failed write.

use cotrelay_cot::Event;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug)]
struct Inner {
    events: VecDeque<Event>,
    closed: bool,
}

/// Bounded event queue shared between producers and the egress task.
#[derive(Debug)]
pub struct EventBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
    has_events: Notify,
    has_space: Notify,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                events: VecDeque::with_capacity(capacity.min(4096)),
                closed: false,
            }),
            capacity,
            has_events: Notify::new(),
            has_space: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().events.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Appends without waiting. Hands the event back when full or closed.
    pub fn try_push(&self, event: Event) -> Result<(), Event> {
        {
            let mut inner = self.inner.lock();
            if inner.closed || inner.events.len() >= self.capacity {
                return Err(event);
            }
            inner.events.push_back(event);
        }
        self.has_events.notify_one();
        Ok(())
    }

    /// Appends, waiting up to `timeout` for space.
    pub async fn push_timeout(&self, event: Event, timeout: Duration) -> Result<(), Event> {
        let deadline = Instant::now() + timeout;
        let mut event = event;

        loop {
            let space = self.has_space.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            event = match self.try_push(event) {
                Ok(()) => return Ok(()),
                Err(rejected) => rejected,
            };
            if self.is_closed() {
                return Err(event);
            }

            if tokio::time::timeout_at(deadline, space).await.is_err() {
                return self.try_push(event);
            }
        }
    }

    /// Runs `f` on the oldest event without removing it.
    pub fn peek_with<R>(&self, f: impl FnOnce(&Event) -> R) -> Option<R> {
        self.inner.lock().events.front().map(f)
    }

    /// Removes the oldest event.
    pub fn pop_front(&self) -> Option<Event> {
        let event = self.inner.lock().events.pop_front();
        if event.is_some() {
            self.has_space.notify_one();
        }
        event
    }

    /// Resolves once at least one event is buffered.
    pub async fn wait_for_events(&self) {
        loop {
            let notified = self.has_events.notified();
            if !self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Rejects further pushes and wakes blocked producers.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.has_space.notify_waiters();
    }

    /// Empties the buffer, returning how many events were discarded.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.events.len();
        inner.events.clear();
        count
    }
}
