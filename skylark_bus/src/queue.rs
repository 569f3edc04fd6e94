//! Bounded event queue with drop-oldest overflow.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use heapless::Deque;

struct QueueInner<T, const N: usize> {
    deque: Mutex<Deque<T, N>>,
    available: Condvar,
    dropped: AtomicU64,
}

/// Fixed-depth FIFO connecting a bus object to a consumer task.
///
/// Posts are lossless up to the depth `N`; a post into a full queue drops
/// the *oldest* entry so the consumer always sees the freshest data.
/// Consumers block with [`EventQueue::pop_timeout`]; producers never block.
pub struct EventQueue<T, const N: usize> {
    inner: Arc<QueueInner<T, N>>,
}

impl<T, const N: usize> Clone for EventQueue<T, N> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, const N: usize> Default for EventQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> EventQueue<T, N> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                deque: Mutex::new(Deque::new()),
                available: Condvar::new(),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Post an event. Never blocks; overflow drops the oldest entry.
    pub fn push(&self, value: T) {
        let mut deque = self.inner.deque.lock().unwrap();
        if deque.is_full() {
            deque.pop_front();
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(depth = N, "event queue overflow, oldest entry dropped");
        }
        // Cannot fail: a slot was just guaranteed.
        let _ = deque.push_back(value);
        drop(deque);
        self.inner.available.notify_one();
    }

    /// Take the oldest queued event without waiting.
    pub fn pop(&self) -> Option<T> {
        self.inner.deque.lock().unwrap().pop_front()
    }

    /// Take the oldest queued event, waiting up to `timeout` for one.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut deque = self.inner.deque.lock().unwrap();
        loop {
            if let Some(v) = deque.pop_front() {
                return Some(v);
            }
            let (guard, result) = self.inner.available.wait_timeout(deque, timeout).unwrap();
            deque = guard;
            if result.timed_out() {
                return deque.pop_front();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.deque.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.deque.lock().unwrap().is_empty()
    }

    /// Number of events lost to overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn fifo_order() {
        let q: EventQueue<u32, 4> = EventQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn overflow_drops_oldest() {
        let q: EventQueue<u32, 2> = EventQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.len(), 2);
        assert_eq!(q.dropped(), 1);
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
    }

    #[test]
    fn pop_timeout_waits_then_gives_up() {
        let q: EventQueue<u32, 2> = EventQueue::new();
        let start = Instant::now();
        assert_eq!(q.pop_timeout(Duration::from_millis(20)), None);
        assert!(start.elapsed() >= Duration::from_millis(18));
    }

    #[test]
    fn pop_timeout_wakes_on_push() {
        let q: EventQueue<u32, 2> = EventQueue::new();
        let producer = q.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            producer.push(42);
        });
        assert_eq!(q.pop_timeout(Duration::from_secs(2)), Some(42));
        handle.join().unwrap();
    }
}
