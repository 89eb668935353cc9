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

//! Virtual data movers: pluggable providers of bulk memory operations.
//!
//! A data mover turns a memory operation (copy, move, fill) into a future.
//! Callers do not care whether the work happens inline, on a pool of worker
//! threads, or on a DMA-style offload engine; they poll the returned
//! [`OperationFuture`] like any other future.
//!
//! Backends implement the [`DataMover`] trait, which describes the life of
//! one operation:
//!
//! 1. [`op_new`](DataMover::op_new) allocates a record for the operation
//!    from the mover's arena;
//! 2. [`op_start`](DataMover::op_start) arms the caller's notifier and
//!    hands the record to whatever executes it; reporting "not armed" is
//!    fine and simply means the poll should be retried;
//! 3. [`op_check`](DataMover::op_check) observes progress without blocking;
//! 4. [`op_delete`](DataMover::op_delete) extracts the output and retires
//!    the record.
//!
//! Two backends live here: [`sync::DataMoverSync`] and
//! [`threads::DataMoverThreads`]. An external offload engine plugs in by
//! implementing the same trait with poller-style completion and reporting
//! failures through [`OperationResult`].

use crate::future::{Future, FutureState, Notifier, Runnable};
use crate::membuf::Slot;
use core::marker::PhantomData;
use core::ptr;

pub mod sync;
pub mod threads;


/// Operation flag: the destination is durable memory. Backends may respond
/// with stronger store instructions or dedicated submission flags; the
/// software backends accept it as a hint.
pub const DURABLE_DEST: u64 = 1 << 0;

/// Descriptor of a bulk memory operation.
///
/// Kept small so it embeds directly in a backend's per-operation record.
/// The pointers are guaranteed valid, and unaliased where written, for as
/// long as the operation is in flight; the [`OperationFuture`] borrows the
/// underlying buffers for its whole lifetime and quiesces in-flight work
/// before releasing them.
#[derive(Debug, Copy, Clone)]
pub enum Operation {
    /// Copy `len` bytes between disjoint buffers.
    Memcpy {
        /// Destination of the copy.
        dest: *mut u8,
        /// Source of the copy.
        src: *const u8,
        /// Number of bytes to copy.
        len: usize,
        /// Operation flags.
        flags: u64,
    },
    /// Copy `len` bytes between possibly overlapping locations.
    Memmove {
        /// Destination of the move.
        dest: *mut u8,
        /// Source of the move.
        src: *const u8,
        /// Number of bytes to move.
        len: usize,
        /// Operation flags.
        flags: u64,
    },
    /// Fill `len` bytes with `value`.
    Memset {
        /// Destination of the fill.
        dest: *mut u8,
        /// Byte to store.
        value: u8,
        /// Number of bytes to fill.
        len: usize,
        /// Operation flags.
        flags: u64,
    },
}

// Records embedding an `Operation` travel to worker threads. The
// constructors on `DataMover` take real borrows of the buffers, and the
// returned future both pins those borrows and waits out in-flight work on
// drop, so the pointers never outlive what they point to.
unsafe impl Send for Operation {}
unsafe impl Sync for Operation {}

impl Operation {
    /// Performs the described memory operation on the calling thread.
    pub(crate) fn execute(&self) {
        self.execute_with(&OpFns::default());
    }

    /// Performs the described memory operation through `fns`.
    pub(crate) fn execute_with(&self, fns: &OpFns) {
        unsafe {
            match *self {
                Operation::Memcpy {
                    dest,
                    src,
                    len,
                    flags,
                } => (fns.memcpy)(dest, src, len, flags),
                Operation::Memmove {
                    dest,
                    src,
                    len,
                    flags,
                } => (fns.memmove)(dest, src, len, flags),
                Operation::Memset {
                    dest,
                    value,
                    len,
                    flags,
                } => (fns.memset)(dest, value, len, flags),
            }
        }
    }

    /// Destination pointer of the operation.
    pub(crate) fn dest(&self) -> *mut u8 {
        match *self {
            Operation::Memcpy { dest, .. }
            | Operation::Memmove { dest, .. }
            | Operation::Memset { dest, .. } => dest,
        }
    }

    /// Flags the operation was created with.
    pub(crate) fn flags(&self) -> u64 {
        match *self {
            Operation::Memcpy { flags, .. }
            | Operation::Memmove { flags, .. }
            | Operation::Memset { flags, .. } => flags,
        }
    }
}

/// Replaceable implementations of the primitive memory operations.
///
/// The threaded mover can be built around a custom set, for environments
/// where plain stores are not enough: persistent memory wanting flushing
/// stores behind [`DURABLE_DEST`], instrumented copies, and so on. The
/// `flags` argument passes the operation's flag bits through verbatim.
#[derive(Copy, Clone)]
pub struct OpFns {
    /// Copies `len` bytes between non-overlapping locations.
    ///
    /// # Safety
    ///
    /// Same contract as [`core::ptr::copy_nonoverlapping`].
    pub memcpy: unsafe fn(dest: *mut u8, src: *const u8, len: usize, flags: u64),
    /// Copies `len` bytes between possibly overlapping locations.
    ///
    /// # Safety
    ///
    /// Same contract as [`core::ptr::copy`].
    pub memmove: unsafe fn(dest: *mut u8, src: *const u8, len: usize, flags: u64),
    /// Fills `len` bytes with `value`.
    ///
    /// # Safety
    ///
    /// Same contract as [`core::ptr::write_bytes`].
    pub memset: unsafe fn(dest: *mut u8, value: u8, len: usize, flags: u64),
}

unsafe fn default_memcpy(dest: *mut u8, src: *const u8, len: usize, _flags: u64) {
    ptr::copy_nonoverlapping(src, dest, len);
}

unsafe fn default_memmove(dest: *mut u8, src: *const u8, len: usize, _flags: u64) {
    ptr::copy(src, dest, len);
}

unsafe fn default_memset(dest: *mut u8, value: u8, len: usize, _flags: u64) {
    ptr::write_bytes(dest, value, len);
}

impl Default for OpFns {
    fn default() -> OpFns {
        OpFns {
            memcpy: default_memcpy,
            memmove: default_memmove,
            memset: default_memset,
        }
    }
}

impl core::fmt::Debug for OpFns {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("OpFns").finish()
    }
}

/// Outcome a backend reports for a finished operation.
///
/// The software backends always report [`Success`](OperationResult::Success);
/// the other variants exist for offload engines that can fail a submitted
/// job.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// The operation completed.
    Success,
    /// The backend ran out of submission resources.
    OutOfMemory,
    /// The backend reported the job corrupted.
    JobCorrupted,
}

/// Output of an [`OperationFuture`].
#[derive(Debug, Copy, Clone)]
pub struct OperationOutput {
    /// Destination the operation wrote to. Null until the operation
    /// completes.
    pub dest: *mut u8,
    /// Backend-reported outcome.
    pub result: OperationResult,
}

impl OperationOutput {
    fn empty() -> OperationOutput {
        OperationOutput {
            dest: ptr::null_mut(),
            result: OperationResult::Success,
        }
    }
}

/// A provider of bulk memory operations.
///
/// The four `op_*` methods are the backend half of the protocol and are
/// normally only called by [`OperationFuture`]; users call the
/// [`memcpy`](DataMover::memcpy), [`memmove`](DataMover::memmove) and
/// [`memset`](DataMover::memset) constructors.
pub trait DataMover {
    /// Per-operation record, shared with any backend workers.
    type Op: Send + Sync + 'static;

    /// Operation flag bits this mover accepts. Passing any other bit to a
    /// constructor is a programming error and panics.
    fn valid_flags(&self) -> u64 {
        DURABLE_DEST
    }

    /// True when operations execute off-thread. Futures of such movers
    /// report [`is_async`](Runnable::is_async).
    fn is_async(&self) -> bool {
        false
    }

    /// Allocates the record for a new operation. The record address stays
    /// stable until [`op_delete`](DataMover::op_delete).
    fn op_new(&self, operation: Operation) -> Slot<Self::Op>;

    /// Attempts to start the operation, arming `notifier` with the way
    /// completion will be announced. Returns false when the work could not
    /// be handed off (e.g. a full submission queue); the caller keeps the
    /// operation idle and retries on a later poll.
    fn op_start(&self, op: &Slot<Self::Op>, notifier: Option<&mut Notifier>) -> bool;

    /// Observes the operation's progress. Lock-free and safe to call from
    /// the polling thread at any time.
    fn op_check(&self, op: &Self::Op) -> FutureState;

    /// Extracts the output and retires the record.
    fn op_delete(&self, op: Slot<Self::Op>) -> OperationOutput;

    /// Returns a future copying `src` into the beginning of `dest`.
    ///
    /// # Panics
    ///
    /// Panics if `dest` is shorter than `src`, or on unknown `flags` bits.
    fn memcpy<'m>(
        &'m self,
        dest: &'m mut [u8],
        src: &'m [u8],
        flags: u64,
    ) -> OperationFuture<'m, Self>
    where
        Self: Sized,
    {
        assert!(
            dest.len() >= src.len(),
            "memcpy destination shorter than source"
        );
        let operation = Operation::Memcpy {
            dest: dest.as_mut_ptr(),
            src: src.as_ptr(),
            len: src.len(),
            flags,
        };
        OperationFuture::new(self, operation)
    }

    /// Returns a future moving `len` bytes within `buf`, from offset `src`
    /// to offset `dest`. The two ranges may overlap.
    ///
    /// # Panics
    ///
    /// Panics if either range falls outside `buf`, or on unknown `flags`
    /// bits.
    fn memmove<'m>(
        &'m self,
        buf: &'m mut [u8],
        dest: usize,
        src: usize,
        len: usize,
        flags: u64,
    ) -> OperationFuture<'m, Self>
    where
        Self: Sized,
    {
        assert!(
            dest.checked_add(len).map_or(false, |end| end <= buf.len()),
            "memmove destination range out of bounds"
        );
        assert!(
            src.checked_add(len).map_or(false, |end| end <= buf.len()),
            "memmove source range out of bounds"
        );
        let base = buf.as_mut_ptr();
        let operation = Operation::Memmove {
            dest: base.wrapping_add(dest),
            src: base.wrapping_add(src) as *const u8,
            len,
            flags,
        };
        OperationFuture::new(self, operation)
    }

    /// Returns a future filling all of `dest` with `value`.
    ///
    /// # Panics
    ///
    /// Panics on unknown `flags` bits.
    fn memset<'m>(
        &'m self,
        dest: &'m mut [u8],
        value: u8,
        flags: u64,
    ) -> OperationFuture<'m, Self>
    where
        Self: Sized,
    {
        let operation = Operation::Memset {
            dest: dest.as_mut_ptr(),
            value,
            len: dest.len(),
            flags,
        };
        OperationFuture::new(self, operation)
    }
}

/// Future representing one operation submitted to a [`DataMover`].
///
/// Borrows the mover and the operated-on buffers for its whole lifetime, so
/// neither can go away while a backend worker might still touch them. If
/// the future is dropped while its operation is in flight, the drop blocks
/// until the backend is done with the record.
pub struct OperationFuture<'m, M: DataMover> {
    mover: &'m M,
    op: Option<Slot<M::Op>>,
    state: FutureState,
    output: OperationOutput,
    /// Stands in for the borrows of the destination and source buffers.
    buffers: PhantomData<&'m mut [u8]>,
}

impl<'m, M: DataMover> OperationFuture<'m, M> {
    fn new(mover: &'m M, operation: Operation) -> OperationFuture<'m, M> {
        assert_eq!(
            operation.flags() & !mover.valid_flags(),
            0,
            "unknown operation flags: {:#x}",
            operation.flags() & !mover.valid_flags()
        );
        let op = mover.op_new(operation);
        OperationFuture {
            mover,
            op: Some(op),
            state: FutureState::Idle,
            output: OperationOutput::empty(),
            buffers: PhantomData,
        }
    }
}

impl<'m, M: DataMover> Runnable for OperationFuture<'m, M> {
    fn poll(&mut self, notifier: Option<&mut Notifier>) -> FutureState {
        let op = match &self.op {
            Some(op) => op,
            None => return self.state,
        };

        if self.state == FutureState::Idle && !self.mover.op_start(op, notifier) {
            // Not armed; leave the operation idle and retry on the next
            // poll, re-arming the notifier then.
            return FutureState::Idle;
        }

        self.state = self.mover.op_check(op);
        if self.state == FutureState::Complete {
            if let Some(op) = self.op.take() {
                self.output = self.mover.op_delete(op);
            }
        }
        self.state
    }

    fn state(&self) -> FutureState {
        self.state
    }

    fn is_async(&self) -> bool {
        self.mover.is_async()
    }
}

impl<'m, M: DataMover> Future for OperationFuture<'m, M> {
    type Output = OperationOutput;

    fn output(&self) -> &OperationOutput {
        &self.output
    }
}

impl<'m, M: DataMover> Drop for OperationFuture<'m, M> {
    fn drop(&mut self) {
        if let Some(op) = self.op.take() {
            // A worker may still be writing through the operation's
            // pointers; the borrows they alias die with this future, so
            // wait for the record to settle first.
            while self.mover.op_check(&op) == FutureState::Running {
                core::hint::spin_loop();
            }
            self.mover.op_delete(op);
        }
    }
}
