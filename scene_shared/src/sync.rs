//! Mutex/condvar primitives shared between producer and consumer threads.
//!
//! All waits re-check their predicate under the lock, so a notification sent
//! between a consumer's check and its wait is never lost, and spurious wakeups
//! are absorbed. Poisoned locks are recovered: the guarded data are plain
//! queues and flags that stay consistent across a panicking holder.

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// FIFO queue with blocking pop.
#[derive(Debug)]
pub struct SharedQueue<T> {
    items: Mutex<VecDeque<T>>,
    cond: Condvar,
}

impl<T> Default for SharedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SharedQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
        }
    }

    pub fn push(&self, item: T) {
        lock(&self.items).push_back(item);
        self.cond.notify_all();
    }

    pub fn extend(&self, items: impl IntoIterator<Item = T>) {
        lock(&self.items).extend(items);
        self.cond.notify_all();
    }

    pub fn pop(&self) -> Option<T> {
        lock(&self.items).pop_front()
    }

    /// Blocks until an item is available or `timeout` elapses.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let guard = lock(&self.items);
        let (mut guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |q| q.is_empty())
            .unwrap_or_else(|e| e.into_inner());
        guard.pop_front()
    }

    pub fn drain(&self) -> Vec<T> {
        lock(&self.items).drain(..).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.items).is_empty()
    }

    pub fn clear(&self) {
        lock(&self.items).clear();
    }

    /// Direct access for compound updates; call `notify` afterwards if items
    /// were added.
    pub fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        lock(&self.items)
    }

    pub fn notify(&self) {
        self.cond.notify_all();
    }
}

/// Wakeup channel for a thread waiting on state owned elsewhere.
///
/// Producers change their state first and then call `notify`; the waiter's
/// predicate is evaluated under the signal lock.
#[derive(Debug, Default)]
pub struct Signal {
    epoch: Mutex<u64>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        *lock(&self.epoch) += 1;
        self.cond.notify_all();
    }

    /// Waits until `ready()` holds or `timeout` elapses; returns the final
    /// predicate value.
    pub fn wait_until(&self, timeout: Duration, mut ready: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = lock(&self.epoch);
        loop {
            if ready() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = self
                .cond
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }
}

/// Holds only the freshest value; writers overwrite, readers take.
#[derive(Debug)]
pub struct LatestSlot<T> {
    value: Mutex<Option<T>>,
    cond: Condvar,
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self {
            value: Mutex::new(None),
            cond: Condvar::new(),
        }
    }
}

impl<T: Clone> LatestSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, value: T) {
        *lock(&self.value) = Some(value);
        self.cond.notify_all();
    }

    pub fn take(&self) -> Option<T> {
        lock(&self.value).take()
    }

    pub fn peek(&self) -> Option<T> {
        lock(&self.value).clone()
    }

    /// Waits up to `timeout` for a value and takes it.
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        let guard = lock(&self.value);
        let (mut guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |v| v.is_none())
            .unwrap_or_else(|e| e.into_inner());
        guard.take()
    }

    pub fn clear(&self) {
        lock(&self.value).take();
    }
}
