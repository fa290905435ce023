use std::collections::VecDeque;

use parking_lot::Mutex;

/// Unbounded FIFO written by a producer and drained by the consumer.
///
/// Appends and drains share one lock so a drain racing an append never
/// reorders or loses entries. A closed queue refuses appends, which is how
/// events arriving after a resource was closed get dropped.
#[derive(Debug)]
pub struct EventQueue<T> {
    inner: Mutex<Inner<T>>,
}

#[derive(Debug)]
struct Inner<T> {
    events: VecDeque<T>,
    closed: bool,
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                events: VecDeque::new(),
                closed: false,
            }),
        }
    }
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false (and drops `event`) when the queue is closed.
    pub fn enqueue(&self, event: T) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        inner.events.push_back(event);
        true
    }

    pub fn drain(&self) -> Option<T> {
        self.inner.lock().events.pop_front()
    }

    pub fn has_data(&self) -> bool {
        !self.inner.lock().events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_data()
    }

    /// Discards pending events and refuses further appends.
    pub fn close(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.closed = true;
        let dropped = inner.events.len();
        inner.events.clear();
        dropped
    }

    /// Discards pending events and accepts appends again.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.closed = false;
        inner.events.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}
