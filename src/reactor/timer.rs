//! Indexed min-heap of idle deadlines.
//!
//! Unlike `std::collections::BinaryHeap`, every entry can be found again by
//! its key: a side table maps `key -> position in the heap array` and is
//! rewritten on every swap. That makes renewing or cancelling an arbitrary
//! entry O(log n) instead of O(n).
//!
//! ## Complexity
//!
//! - `insert`: O(log n)
//! - `renew`: O(log n)
//! - `cancel`: O(log n)
//! - `fire_expired`: O(k log n) for k expired entries
//!
//! ## Firing Contract
//!
//! `fire_expired` hands the heap itself to the expiry callback, and the
//! callback is expected to `cancel` its own key (normally as part of tearing
//! the connection down). The heap does not pop on the callback's behalf.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tracing::warn;

/// A single deadline.
#[derive(Debug, Clone)]
pub struct TimerEntry<K, T> {
    pub key: K,
    pub expires_at: Instant,
    pub payload: T,
}

/// Min-heap of [`TimerEntry`] ordered by `expires_at`, addressable by key.
#[derive(Debug)]
pub struct TimerHeap<K, T> {
    heap: Vec<TimerEntry<K, T>>,
    index: HashMap<K, usize>,
}

impl<K, T> Default for TimerHeap<K, T>
where
    K: Copy + Eq + Hash + std::fmt::Debug,
    T: Copy,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> TimerHeap<K, T>
where
    K: Copy + Eq + Hash + std::fmt::Debug,
    T: Copy,
{
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, key: K) -> bool {
        self.index.contains_key(&key)
    }

    /// The entry with the earliest deadline.
    pub fn peek(&self) -> Option<&TimerEntry<K, T>> {
        self.heap.first()
    }

    /// Deadline currently recorded for `key`.
    pub fn deadline(&self, key: K) -> Option<Instant> {
        self.index.get(&key).map(|&i| self.heap[i].expires_at)
    }

    /// Adds a deadline `timeout` from now.
    pub fn insert(&mut self, key: K, timeout: Duration, payload: T) {
        self.insert_at(Instant::now(), key, timeout, payload);
    }

    /// Adds a deadline `timeout` from `now`.
    ///
    /// Inserting a key that is already present replaces its deadline and payload.
    pub fn insert_at(&mut self, now: Instant, key: K, timeout: Duration, payload: T) {
        let expires_at = now + timeout;

        if let Some(&i) = self.index.get(&key) {
            self.heap[i].expires_at = expires_at;
            self.heap[i].payload = payload;
            self.restore(i);
            return;
        }

        self.heap.push(TimerEntry {
            key,
            expires_at,
            payload,
        });
        let last = self.heap.len() - 1;
        self.index.insert(key, last);
        self.sift_up(last);
    }

    /// Pushes `key`'s deadline to `timeout` from now.
    ///
    /// Returns false if the key is not present.
    pub fn renew(&mut self, key: K, timeout: Duration) -> bool {
        self.renew_at(Instant::now(), key, timeout)
    }

    /// Pushes `key`'s deadline to `timeout` from `now`.
    pub fn renew_at(&mut self, now: Instant, key: K, timeout: Duration) -> bool {
        let Some(&i) = self.index.get(&key) else {
            return false;
        };
        self.heap[i].expires_at = now + timeout;
        // Renewals move deadlines later, so this normally only sifts down.
        self.restore(i);
        true
    }

    /// Removes `key`'s entry. Returns false if the key is not present.
    pub fn cancel(&mut self, key: K) -> bool {
        let Some(i) = self.index.remove(&key) else {
            return false;
        };

        let last = self.heap.len() - 1;
        if i < last {
            self.heap.swap(i, last);
            let moved = self.heap[i].key;
            self.index.insert(moved, i);
            self.heap.pop();
            self.restore(i);
        } else {
            self.heap.pop();
        }
        true
    }

    /// Fires every entry whose deadline has passed.
    ///
    /// See [`fire_expired_at`](Self::fire_expired_at).
    pub fn fire_expired<F>(&mut self, on_expire: F) -> Option<Duration>
    where
        F: FnMut(&mut Self, K, T),
    {
        self.fire_expired_at(Instant::now(), on_expire)
    }

    /// Invokes `on_expire(heap, key, payload)` while the root's deadline is
    /// `<= now`, then returns the time until the next deadline (floored at
    /// zero), or `None` when no timers remain.
    ///
    /// The callback must cancel `key`. If it does not, the entry is removed
    /// here so the loop always makes progress.
    pub fn fire_expired_at<F>(&mut self, now: Instant, mut on_expire: F) -> Option<Duration>
    where
        F: FnMut(&mut Self, K, T),
    {
        while let Some(root) = self.heap.first() {
            if root.expires_at > now {
                break;
            }
            let (key, payload) = (root.key, root.payload);
            on_expire(self, key, payload);

            if self.contains(key) && self.deadline(key).is_some_and(|d| d <= now) {
                warn!(key = ?key, "Timer callback did not cancel its entry");
                self.cancel(key);
            }
        }

        self.next_timeout_at(now)
    }

    /// Time from `now` until the earliest deadline, or `None` when empty.
    pub fn next_timeout_at(&self, now: Instant) -> Option<Duration> {
        self.heap
            .first()
            .map(|root| root.expires_at.saturating_duration_since(now))
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.index.clear();
    }

    /// Moves the entry at `i` to its correct place in either direction.
    fn restore(&mut self, i: usize) {
        if !self.sift_down(i) {
            self.sift_up(i);
        }
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[i].expires_at >= self.heap[parent].expires_at {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
    }

    /// Returns true if the entry moved.
    fn sift_down(&mut self, start: usize) -> bool {
        let n = self.heap.len();
        let mut i = start;
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }
            let right = left + 1;
            let child = if right < n && self.heap[right].expires_at < self.heap[left].expires_at {
                right
            } else {
                left
            };
            if self.heap[child].expires_at >= self.heap[i].expires_at {
                break;
            }
            self.swap(i, child);
            i = child;
        }
        i != start
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.heap.swap(a, b);
        self.index.insert(self.heap[a].key, a);
        self.index.insert(self.heap[b].key, b);
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        assert_eq!(self.heap.len(), self.index.len());
        for (pos, entry) in self.heap.iter().enumerate() {
            assert_eq!(self.index.get(&entry.key), Some(&pos), "stale index for {:?}", entry.key);
            if pos > 0 {
                let parent = (pos - 1) / 2;
                assert!(self.heap[parent].expires_at <= entry.expires_at);
            }
        }
    }
}
