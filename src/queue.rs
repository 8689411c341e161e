use crate::error::{Error, Result};
use crate::shutdown::StopToken;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::ops::Deref;
use std::time::{Duration, Instant};

// How often a producer blocked on a full queue rechecks its stop token.
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(10);

struct State<T> {
    items: VecDeque<T>,
    // Items enqueued but not yet released by a consumer.
    unfinished: usize,
}

/// Thread-safe FIFO used to hand decoded frames (or timing samples) from a
/// single producer to any number of polling consumers.
///
/// A bounded queue blocks the producer in [`HandoffQueue::enqueue`] until a
/// consumer makes room, or until stopped with [`HandoffQueue::enqueue_until`].
pub struct HandoffQueue<T> {
    state: Mutex<State<T>>,
    capacity: Option<usize>,
    not_empty: Condvar,
    not_full: Condvar,
    idle: Condvar,
}

impl<T> HandoffQueue<T> {
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    /// A queue holding at most `capacity` items. Zero is rejected, a
    /// producer could never hand anything over.
    pub fn bounded(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::configuration("queue capacity must be at least 1"));
        }
        Ok(Self::with_capacity(Some(capacity)))
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                unfinished: 0,
            }),
            capacity,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            idle: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Items enqueued that have not been released yet, including ones still
    /// held behind a [`Taken`] guard.
    pub fn unfinished(&self) -> usize {
        self.state.lock().unfinished
    }

    pub fn enqueue(&self, item: T) {
        let mut state = self.state.lock();
        if let Some(capacity) = self.capacity {
            while state.items.len() >= capacity {
                self.not_full.wait(&mut state);
            }
        }
        self.push(state, item);
    }

    /// Like [`HandoffQueue::enqueue`], but hands the item back if `stop`
    /// fires while the producer waits for room.
    pub fn enqueue_until(&self, item: T, stop: &StopToken) -> std::result::Result<(), T> {
        let mut state = self.state.lock();
        if let Some(capacity) = self.capacity {
            while state.items.len() >= capacity {
                if stop.is_stopped() {
                    return Err(item);
                }
                self.not_full.wait_for(&mut state, STOP_CHECK_INTERVAL);
            }
        }
        self.push(state, item);
        Ok(())
    }

    /// Blocks up to `timeout` for the next item.
    pub fn dequeue_blocking(&self, timeout: Duration) -> Result<T> {
        let mut state = self.state.lock();
        if let Some(item) = self.pop(&mut state) {
            return Ok(item);
        }
        // No representable deadline means wait without one.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            match deadline {
                Some(deadline) => {
                    if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                        // A producer may have slipped in right at the deadline.
                        return self.pop(&mut state).ok_or(Error::Empty);
                    }
                }
                None => self.not_empty.wait(&mut state),
            }
            if let Some(item) = self.pop(&mut state) {
                return Ok(item);
            }
        }
    }

    /// Everything currently queued, oldest first. Never blocks.
    pub fn drain_all_nonblocking(&self) -> Vec<T> {
        let mut state = self.state.lock();
        let drained: Vec<T> = state.items.drain(..).collect();
        self.release(&mut state, drained.len());
        drained
    }

    /// Removes the oldest item without blocking. The item counts as
    /// unfinished until the returned guard is dropped.
    pub fn try_take(&self) -> Option<Taken<'_, T>> {
        let item = {
            let mut state = self.state.lock();
            let item = state.items.pop_front()?;
            self.not_full.notify_one();
            item
        };
        Some(Taken {
            queue: self,
            item: Some(item),
        })
    }

    /// Waits until every enqueued item has been released. Returns false on
    /// timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if state.unfinished == 0 {
            return true;
        }
        let deadline = Instant::now().checked_add(timeout);
        while state.unfinished > 0 {
            match deadline {
                Some(deadline) => {
                    if self.idle.wait_until(&mut state, deadline).timed_out() {
                        return state.unfinished == 0;
                    }
                }
                None => self.idle.wait(&mut state),
            }
        }
        true
    }

    fn push(&self, mut state: MutexGuard<'_, State<T>>, item: T) {
        state.items.push_back(item);
        state.unfinished += 1;
        drop(state);
        self.not_empty.notify_one();
    }

    fn pop(&self, state: &mut MutexGuard<'_, State<T>>) -> Option<T> {
        let item = state.items.pop_front()?;
        self.release(state, 1);
        Some(item)
    }

    fn release(&self, state: &mut MutexGuard<'_, State<T>>, count: usize) {
        if count == 0 {
            return;
        }
        state.unfinished -= count;
        self.not_full.notify_all();
        if state.unfinished == 0 {
            self.idle.notify_all();
        }
    }

    fn finish_one(&self) {
        let mut state = self.state.lock();
        state.unfinished -= 1;
        if state.unfinished == 0 {
            self.idle.notify_all();
        }
    }
}

impl<T> Default for HandoffQueue<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// An item removed by [`HandoffQueue::try_take`]. Dropping it marks the item
/// processed, whichever way the consumer exits.
pub struct Taken<'a, T> {
    queue: &'a HandoffQueue<T>,
    item: Option<T>,
}

impl<T> Taken<'_, T> {
    /// Takes ownership of the item. It is still marked processed.
    pub fn into_inner(mut self) -> T {
        // Always Some until drop.
        match self.item.take() {
            Some(item) => item,
            None => unreachable!("taken item already moved out"),
        }
    }
}

impl<T> Deref for Taken<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.item {
            Some(item) => item,
            None => unreachable!("taken item already moved out"),
        }
    }
}

impl<T> Drop for Taken<'_, T> {
    fn drop(&mut self) {
        self.queue.finish_one();
    }
}
