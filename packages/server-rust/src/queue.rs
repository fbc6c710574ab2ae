//! Deduplicating active-work queue with two-phase pop/release.
//!
//! The queue holds connection descriptors with traffic waiting to be
//! dispatched. A descriptor appears at most once, keyed by id; popping with
//! `release_from_set = false` keeps the id excluded so the connection
//! cannot be re-queued while a router is draining it. `release` lifts the
//! exclusion once processing finishes. This is the mechanism behind the
//! "at most one router per connection" guarantee.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::connection::ConnectionDescriptor;

#[derive(Debug, Default)]
struct Inner {
    queue: VecDeque<Arc<ConnectionDescriptor>>,
    /// Ids queued or currently held by a router.
    members: HashSet<u64>,
}

/// Thread-safe dedup queue of pending connection descriptors.
#[derive(Debug, Default)]
pub struct ActiveQueue {
    inner: Mutex<Inner>,
    available: Condvar,
}

impl ActiveQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a descriptor unless its id is already queued or held.
    ///
    /// Returns `true` when the descriptor was actually enqueued.
    pub fn push(&self, descriptor: &Arc<ConnectionDescriptor>) -> bool {
        let mut inner = self.inner.lock();
        if !inner.members.insert(descriptor.id()) {
            return false;
        }
        inner.queue.push_back(Arc::clone(descriptor));
        drop(inner);
        self.available.notify_one();
        true
    }

    /// Removes and returns the head of the queue.
    ///
    /// With `release_from_set = false` the popped id stays excluded from
    /// re-queueing until [`Self::release`] is called.
    pub fn pop(&self, release_from_set: bool) -> Option<Arc<ConnectionDescriptor>> {
        let mut inner = self.inner.lock();
        Self::pop_locked(&mut inner, release_from_set)
    }

    /// Like [`Self::pop`], but waits up to `timeout` for an entry.
    pub fn pop_timeout(
        &self,
        timeout: Duration,
        release_from_set: bool,
    ) -> Option<Arc<ConnectionDescriptor>> {
        let mut inner = self.inner.lock();
        if inner.queue.is_empty() {
            let _ = self.available.wait_for(&mut inner, timeout);
        }
        Self::pop_locked(&mut inner, release_from_set)
    }

    fn pop_locked(inner: &mut Inner, release_from_set: bool) -> Option<Arc<ConnectionDescriptor>> {
        let descriptor = inner.queue.pop_front()?;
        if release_from_set {
            inner.members.remove(&descriptor.id());
        }
        Some(descriptor)
    }

    /// Frees a descriptor's id from the dedup set so future traffic can
    /// queue it again.
    pub fn release(&self, descriptor: &ConnectionDescriptor) {
        self.inner.lock().members.remove(&descriptor.id());
    }

    /// Whether the id is queued or held by a router.
    #[must_use]
    pub fn is_in_queue(&self, id: u64) -> bool {
        self.inner.lock().members.contains(&id)
    }

    /// Number of entries waiting (excludes popped-but-unreleased ids).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// `true` when no entries are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    /// Empties the queue and the dedup set. Used during shutdown.
    pub fn drain(&self) {
        let mut inner = self.inner.lock();
        inner.queue.clear();
        inner.members.clear();
    }

    /// Wakes every waiter blocked in [`Self::pop_timeout`]. Called when the
    /// stop flag flips so workers observe it immediately.
    pub fn notify_all(&self) {
        self.available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use crate::connection::callback_pair;

    use super::*;

    fn descriptor(id: u64) -> Arc<ConnectionDescriptor> {
        let (endpoint, _peer) = callback_pair();
        Arc::new(ConnectionDescriptor::new(id, Arc::new(endpoint), None))
    }

    #[test]
    fn double_push_yields_one_entry() {
        let queue = ActiveQueue::new();
        let entry = descriptor(1);

        assert!(queue.push(&entry));
        assert!(!queue.push(&entry));
        assert_eq!(queue.len(), 1);

        assert!(queue.pop(true).is_some());
        assert!(queue.pop(true).is_none());
    }

    #[test]
    fn pop_without_release_suppresses_requeue() {
        let queue = ActiveQueue::new();
        let entry = descriptor(1);

        queue.push(&entry);
        let held = queue.pop(false).unwrap();
        assert_eq!(held.id(), 1);
        assert!(queue.is_in_queue(1));

        // Still held: new traffic for the same descriptor must not queue it.
        assert!(!queue.push(&entry));
        assert!(queue.pop(false).is_none());

        queue.release(&held);
        assert!(!queue.is_in_queue(1));
        assert!(queue.push(&entry));
    }

    #[test]
    fn pop_with_release_frees_immediately() {
        let queue = ActiveQueue::new();
        let entry = descriptor(1);

        queue.push(&entry);
        assert!(queue.pop(true).is_some());
        assert!(!queue.is_in_queue(1));
        assert!(queue.push(&entry));
    }

    #[test]
    fn release_without_pop_allows_requeue() {
        let queue = ActiveQueue::new();
        let entry = descriptor(1);

        queue.push(&entry);
        queue.release(&entry);
        // The stale queue entry is still there, but membership is free again.
        assert!(queue.push(&entry));
    }

    #[test]
    fn pop_timeout_returns_none_when_empty() {
        let queue = ActiveQueue::new();
        let started = Instant::now();
        assert!(queue.pop_timeout(Duration::from_millis(30), true).is_none());
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn pop_timeout_wakes_on_push() {
        let queue = Arc::new(ActiveQueue::new());
        let entry = descriptor(1);

        let waiter = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.pop_timeout(Duration::from_secs(5), true))
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.push(&entry);

        let popped = waiter.join().unwrap();
        assert_eq!(popped.unwrap().id(), 1);
    }

    /// Concurrent pushes of one descriptor must never let two workers hold
    /// it at the same time.
    #[test]
    fn at_most_one_concurrent_holder() {
        let queue = Arc::new(ActiveQueue::new());
        let entry = descriptor(7);
        let holders = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let pops = Arc::new(AtomicUsize::new(0));

        let pushers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let entry = Arc::clone(&entry);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        queue.push(&entry);
                        std::thread::yield_now();
                    }
                })
            })
            .collect();

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let holders = Arc::clone(&holders);
                let max_seen = Arc::clone(&max_seen);
                let pops = Arc::clone(&pops);
                std::thread::spawn(move || {
                    let deadline = Instant::now() + Duration::from_millis(500);
                    while Instant::now() < deadline {
                        let Some(held) = queue.pop(false) else {
                            std::thread::yield_now();
                            continue;
                        };
                        pops.fetch_add(1, Ordering::SeqCst);
                        let active = holders.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(active, Ordering::SeqCst);
                        std::thread::yield_now();
                        holders.fetch_sub(1, Ordering::SeqCst);
                        queue.release(&held);
                    }
                })
            })
            .collect();

        for handle in pushers {
            handle.join().unwrap();
        }
        for handle in workers {
            handle.join().unwrap();
        }
        assert!(pops.load(Ordering::SeqCst) > 0);
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
