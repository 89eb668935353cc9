// Copyright (C) 2022  Pierre Krieger
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

//! Data mover backed by a pool of worker threads.
//!
//! Operations are pushed onto a bounded ring buffer that the workers
//! consume. A full ring is not an error: `op_start` reports "not armed"
//! and the poll that follows retries the submission.
//!
//! Depending on how the mover was configured, a finished operation either
//! invokes the waker captured at submission time or raises a monitor flag
//! the executor polls.

use crate::future::{FutureState, Monitor, Notifier, NotifierKind};
use crate::membuf::{Membuf, Slot, SlotState};
use crate::ring_buffer::RingBuffer;
use crate::vdm::{DataMover, OpFns, Operation, OperationOutput, OperationResult};
use core::mem;
use core::sync::atomic::{AtomicBool, Ordering};
use core::task::Waker;
use err_derive::*;
use spinning_top::Spinlock;
use std::io;
use std::sync::Arc;
use std::thread;

/// How a queued operation announces its completion.
enum Wakeup {
    None,
    Waker(Waker),
    Poller,
}

/// Per-operation record of a [`DataMoverThreads`]. Shared with the worker
/// that executes the operation.
pub struct ThreadsOp {
    operation: Operation,
    wakeup: Spinlock<Wakeup>,
    complete: Monitor,
    started: AtomicBool,
}

/// Reuse predicate: a record whose operation finished is reclaimable; one
/// that has been handed to a worker but not finished must be left alone.
fn op_slot_state(op: &ThreadsOp) -> SlotState {
    if op.complete.is_set() {
        SlotState::CanReuse
    } else if op.started.load(Ordering::Acquire) {
        SlotState::CanWait
    } else {
        SlotState::InUse
    }
}

fn worker_loop(ring: &RingBuffer<Arc<ThreadsOp>>, op_fns: &OpFns) {
    while let Some(op) = ring.dequeue() {
        op.operation.execute_with(op_fns);
        let wakeup = mem::replace(&mut *op.wakeup.lock(), Wakeup::None);
        // The waker must run before the completion flag is raised: an
        // executor that observes completion is free to tear down
        // everything reachable from the record, waker included.
        if let Wakeup::Waker(waker) = wakeup {
            waker.wake();
        }
        op.complete.set();
    }
}

/// Error that can happen when creating a [`DataMoverThreads`].
#[derive(Debug, Error)]
pub enum NewErr {
    /// Spawning a worker thread failed.
    #[error(display = "failed to spawn a worker thread")]
    SpawnThread(#[error(source)] io::Error),
}

/// Mover that executes operations on dedicated worker threads.
pub struct DataMoverThreads {
    ring: Arc<RingBuffer<Arc<ThreadsOp>>>,
    membuf: Spinlock<Membuf<ThreadsOp>>,
    desired_notifier: NotifierKind,
    workers: Vec<thread::JoinHandle<()>>,
}

impl DataMoverThreads {
    /// Ring capacity used by [`new_default`](DataMoverThreads::new_default).
    pub const DEFAULT_RING_CAPACITY: usize = 128;

    /// Creates a mover with `n_threads` workers consuming a ring of
    /// `ring_capacity` operations. `desired_notifier` selects how finished
    /// operations signal executors: through their waker
    /// ([`NotifierKind::Waker`]) or through a pollable monitor
    /// ([`NotifierKind::Poller`]).
    ///
    /// # Panics
    ///
    /// Panics if `n_threads` or `ring_capacity` is zero, or if
    /// `desired_notifier` is [`NotifierKind::None`].
    pub fn new(
        n_threads: usize,
        ring_capacity: usize,
        desired_notifier: NotifierKind,
    ) -> Result<DataMoverThreads, NewErr> {
        DataMoverThreads::new_with_op_fns(n_threads, ring_capacity, desired_notifier, OpFns::default())
    }

    /// Same as [`new`](DataMoverThreads::new), with the primitive memory
    /// operations replaced by `op_fns`. Workers invoke these instead of the
    /// plain copy and fill routines, with each operation's flag bits passed
    /// through.
    pub fn new_with_op_fns(
        n_threads: usize,
        ring_capacity: usize,
        desired_notifier: NotifierKind,
        op_fns: OpFns,
    ) -> Result<DataMoverThreads, NewErr> {
        assert!(n_threads != 0, "worker thread count must be non-zero");
        assert!(
            matches!(desired_notifier, NotifierKind::Waker | NotifierKind::Poller),
            "threaded mover requires waker or poller notifications"
        );
        let ring = Arc::new(RingBuffer::new(ring_capacity));

        let mut workers = Vec::with_capacity(n_threads);
        for n in 0..n_threads {
            let spawn_result = thread::Builder::new()
                .name(format!("datamover-worker-{}", n))
                .spawn({
                    let ring = ring.clone();
                    move || worker_loop(&ring, &op_fns)
                });
            match spawn_result {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    // Unwind the half-built pool before reporting failure.
                    ring.stop();
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(NewErr::SpawnThread(err));
                }
            }
        }

        log::debug!("spawned {} data mover worker threads", n_threads);
        Ok(DataMoverThreads {
            ring,
            membuf: Spinlock::new(Membuf::new(op_slot_state, ())),
            desired_notifier,
            workers,
        })
    }

    /// Creates a mover sized for the host: one worker per CPU, a
    /// default-sized ring, waker notifications.
    pub fn new_default() -> Result<DataMoverThreads, NewErr> {
        DataMoverThreads::new(
            num_cpus::get(),
            DataMoverThreads::DEFAULT_RING_CAPACITY,
            NotifierKind::Waker,
        )
    }
}

impl DataMover for DataMoverThreads {
    type Op = ThreadsOp;

    fn is_async(&self) -> bool {
        true
    }

    fn op_new(&self, operation: Operation) -> Slot<ThreadsOp> {
        self.membuf.lock().alloc(ThreadsOp {
            operation,
            wakeup: Spinlock::new(Wakeup::None),
            complete: Monitor::new(),
            started: AtomicBool::new(false),
        })
    }

    fn op_start(&self, op: &Slot<ThreadsOp>, notifier: Option<&mut Notifier>) -> bool {
        // Snapshot the notifier first; the worker may pick the record up
        // the instant it lands in the ring.
        *op.wakeup.lock() = match notifier {
            None => Wakeup::None,
            Some(notifier) => match self.desired_notifier {
                NotifierKind::Waker => Wakeup::Waker(notifier.arm_waker()),
                NotifierKind::Poller => {
                    notifier.arm_poller(op.complete.clone());
                    Wakeup::Poller
                }
                // Ruled out by the constructor assert.
                NotifierKind::None => unreachable!(),
            },
        };

        if self.ring.try_enqueue(op.share()).is_ok() {
            op.started.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }

    fn op_check(&self, op: &ThreadsOp) -> FutureState {
        if op.complete.is_set() {
            FutureState::Complete
        } else if op.started.load(Ordering::Acquire) {
            FutureState::Running
        } else {
            FutureState::Idle
        }
    }

    fn op_delete(&self, op: Slot<ThreadsOp>) -> OperationOutput {
        if !op.started.load(Ordering::Acquire) {
            // Never handed to a worker, so it will never complete on its
            // own; settle it so the arena can reclaim the slot.
            op.complete.set();
        }
        let output = OperationOutput {
            dest: op.operation.dest(),
            result: OperationResult::Success,
        };
        self.membuf.lock().free(op);
        output
    }
}

impl Drop for DataMoverThreads {
    fn drop(&mut self) {
        // Workers drain whatever is still queued, then observe the stop
        // sentinel and exit.
        self.ring.stop();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        log::debug!("data mover worker threads joined");
    }
}
