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

//! Data mover that performs operations inline on the calling thread.

use crate::future::{FutureState, Notifier};
use crate::membuf::{Membuf, Slot, SlotState};
use crate::vdm::{DataMover, Operation, OperationOutput, OperationResult};
use core::sync::atomic::{AtomicBool, Ordering};
use spinning_top::Spinlock;

/// Per-operation record of a [`DataMoverSync`].
pub struct SyncOp {
    operation: Operation,
    complete: AtomicBool,
}

/// Reuse predicate: operations finish during `op_start`, so any record
/// whose flag is raised is safe to overwrite.
fn op_slot_state(op: &SyncOp) -> SlotState {
    if op.complete.load(Ordering::Acquire) {
        SlotState::CanReuse
    } else {
        SlotState::InUse
    }
}

/// Mover that completes every operation before `op_start` returns.
///
/// Useful as a fallback when no worker pool or offload engine is
/// available, and as the reference behavior for the other backends.
pub struct DataMoverSync {
    membuf: Spinlock<Membuf<SyncOp>>,
}

impl DataMoverSync {
    /// Creates a synchronous mover.
    pub fn new() -> DataMoverSync {
        DataMoverSync {
            membuf: Spinlock::new(Membuf::new(op_slot_state, ())),
        }
    }
}

impl Default for DataMoverSync {
    fn default() -> DataMoverSync {
        DataMoverSync::new()
    }
}

impl DataMover for DataMoverSync {
    type Op = SyncOp;

    fn op_new(&self, operation: Operation) -> Slot<SyncOp> {
        self.membuf.lock().alloc(SyncOp {
            operation,
            complete: AtomicBool::new(false),
        })
    }

    fn op_start(&self, op: &Slot<SyncOp>, notifier: Option<&mut Notifier>) -> bool {
        if let Some(notifier) = notifier {
            notifier.arm_none();
        }
        op.operation.execute();
        op.complete.store(true, Ordering::Release);
        true
    }

    fn op_check(&self, op: &SyncOp) -> FutureState {
        if op.complete.load(Ordering::Acquire) {
            FutureState::Complete
        } else {
            FutureState::Idle
        }
    }

    fn op_delete(&self, op: Slot<SyncOp>) -> OperationOutput {
        // A record that was never started will never raise its flag;
        // settle it here so the arena can reclaim the slot.
        op.complete.store(true, Ordering::Release);
        let output = OperationOutput {
            dest: op.operation.dest(),
            result: OperationResult::Success,
        };
        self.membuf.lock().free(op);
        output
    }
}
