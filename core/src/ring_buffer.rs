// Copyright (C) 2021  Pierre Krieger
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Bounded MPMC queue with blocking variants and a stop signal.
//!
//! The hot path goes through a lock-free [`ArrayQueue`]; the mutex and
//! condition variables only come into play when a caller actually has to
//! block, or when [`stop`](RingBuffer::stop) has to wake everybody up.
//!
//! After `stop`, consumers drain whatever is still queued and then observe
//! `None`; producers are turned away immediately.

use core::sync::atomic::{AtomicBool, Ordering};
use crossbeam_queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};

/// Bounded multi-producer multi-consumer FIFO.
pub struct RingBuffer<T> {
    queue: ArrayQueue<T>,
    running: AtomicBool,
    /// Guards nothing by itself; both condition variables wait on it.
    /// Notifications are issued with the lock held, and blocked callers
    /// re-check the queue with the lock held before waiting, which is what
    /// rules out lost wakeups.
    lock: Mutex<()>,
    /// Signaled after an item has been enqueued, and on stop.
    on_enqueue: Condvar,
    /// Signaled after an item has been dequeued, and on stop.
    on_dequeue: Condvar,
}

impl<T> RingBuffer<T> {
    /// Creates a ring buffer holding up to `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> RingBuffer<T> {
        assert!(capacity != 0, "ring buffer capacity must be non-zero");
        RingBuffer {
            queue: ArrayQueue::new(capacity),
            running: AtomicBool::new(true),
            lock: Mutex::new(()),
            on_enqueue: Condvar::new(),
            on_dequeue: Condvar::new(),
        }
    }

    /// Number of items the ring can hold.
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// False once [`stop`](RingBuffer::stop) has been called.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Attempts to enqueue without blocking. Returns the value back if the
    /// ring is full or stopped.
    pub fn try_enqueue(&self, value: T) -> Result<(), T> {
        if !self.is_running() {
            return Err(value);
        }
        match self.queue.push(value) {
            Ok(()) => {
                let _guard = self.lock.lock();
                self.on_enqueue.notify_one();
                Ok(())
            }
            Err(value) => Err(value),
        }
    }

    /// Enqueues, blocking while the ring is full. Returns the value back
    /// only if the ring is stopped.
    pub fn enqueue(&self, value: T) -> Result<(), T> {
        let mut value = value;
        loop {
            match self.try_enqueue(value) {
                Ok(()) => return Ok(()),
                Err(v) => value = v,
            }

            let mut guard = self.lock.lock();
            // Re-check with the lock held, so that a dequeue or a stop
            // cannot slip in between the failed push and the wait.
            if !self.is_running() {
                return Err(value);
            }
            if !self.queue.is_full() {
                continue;
            }
            self.on_dequeue.wait(&mut guard);
        }
    }

    /// Attempts to dequeue without blocking.
    pub fn try_dequeue(&self) -> Option<T> {
        let value = self.queue.pop()?;
        let _guard = self.lock.lock();
        self.on_dequeue.notify_one();
        Some(value)
    }

    /// Dequeues, blocking while the ring is empty. Returns `None` only once
    /// the ring has been stopped and drained.
    pub fn dequeue(&self) -> Option<T> {
        loop {
            if let Some(value) = self.try_dequeue() {
                return Some(value);
            }

            let mut guard = self.lock.lock();
            if let Some(value) = self.queue.pop() {
                self.on_dequeue.notify_one();
                drop(guard);
                return Some(value);
            }
            if !self.is_running() {
                return None;
            }
            self.on_enqueue.wait(&mut guard);
        }
    }

    /// Stops the ring and wakes every blocked caller.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let _guard = self.lock.lock();
        self.on_enqueue.notify_all();
        self.on_dequeue.notify_all();
    }
}
