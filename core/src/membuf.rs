// Copyright (C) 2021-2022  Pierre Krieger
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

//! Arena of operation records with predicate-driven reuse.
//!
//! A data mover allocates one record per in-flight operation. Records
//! cannot simply be destroyed when the caller is done with them: a worker
//! thread may still be about to touch one for a short while after the
//! operation logically finished. Instead of reference counting every access
//! or deferring frees through an epoch scheme, the arena keeps retired
//! records around and asks a user-provided predicate, at allocation time,
//! which of them are safe to overwrite.
//!
//! Records never move: a [`Slot`] hands out a stable address from the
//! moment it is allocated until the arena reclaims it, and reclamation only
//! happens once the predicate reports [`SlotState::CanReuse`] *and* no
//! worker still holds a [`share`](Slot::share) of the record.
//!
//! Allocation is O(1) amortized. Each call sweeps at most a bounded number
//! of retired records through the predicate; records that pass land on a
//! confirmed-free list they are handed out from, the rest return to the
//! back of the queue for a later sweep. A passed check is final (a record,
//! once reclaimable, stays reclaimable until reused), so the free list
//! never needs re-checking.

use core::fmt;
use core::ops::Deref;
use slab::Slab;
use std::collections::VecDeque;
use std::sync::Arc;

/// Reusability of a retired record, as reported by the arena's predicate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SlotState {
    /// The record is still owned by an in-flight operation.
    InUse,
    /// The operation is logically finished but a backend worker may still
    /// briefly touch the record; it must stay valid and unchanged.
    CanWait,
    /// Nothing will ever touch the record again; safe to overwrite.
    CanReuse,
}

/// Handle to an allocated record.
///
/// Dereferences to the record itself. Dropping the handle does *not* retire
/// the record; pass it back to [`Membuf::free`] for that.
pub struct Slot<T> {
    index: usize,
    record: Arc<T>,
}

impl<T> Slot<T> {
    /// Returns a shared handle to the record, suitable for handing to a
    /// backend worker thread. The arena will not reuse the record while any
    /// share is alive.
    pub fn share(&self) -> Arc<T> {
        self.record.clone()
    }
}

impl<T> Deref for Slot<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.record
    }
}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Slot").field("index", &self.index).finish()
    }
}

/// Arena of records of type `T`, owned by a single data mover.
///
/// `U` is arbitrary user data associated with the arena as a whole,
/// typically whatever identifies the owning mover.
pub struct Membuf<T, U = ()> {
    /// Every record ever allocated. Entries are never removed; retired ones
    /// are overwritten in place when reclaimed.
    slots: Slab<Arc<T>>,
    /// Retired records not yet confirmed reclaimable, oldest first.
    retired: VecDeque<usize>,
    /// Records the predicate confirmed reclaimable, with no worker share
    /// left. Handed out without re-checking.
    free: Vec<usize>,
    /// Decides whether a retired record can be overwritten.
    check: fn(&T) -> SlotState,
    user_data: U,
}

impl<T, U> Membuf<T, U> {
    /// How many retired records one allocation sweeps through the
    /// predicate. Bounding the sweep is what keeps `alloc` O(1) amortized
    /// no matter how many records are still in flight.
    const SETTLE_BUDGET: usize = 8;

    /// Creates an empty arena with the given reuse predicate.
    pub fn new(check: fn(&T) -> SlotState, user_data: U) -> Membuf<T, U> {
        Membuf {
            slots: Slab::new(),
            retired: VecDeque::new(),
            free: Vec::new(),
            check,
            user_data,
        }
    }

    /// The user data associated with the arena.
    pub fn user_data(&self) -> &U {
        &self.user_data
    }

    /// Total number of records backing the arena, retired ones included.
    pub fn allocated(&self) -> usize {
        self.slots.len()
    }

    /// Allocates a record, preferably by reclaiming a retired one.
    ///
    /// A retired record is reclaimed only if the predicate reports
    /// [`SlotState::CanReuse`] and no worker share of it remains. The
    /// search is bounded; if no confirmed-reclaimable record is at hand,
    /// the arena grows.
    pub fn alloc(&mut self, value: T) -> Slot<T> {
        self.settle();

        while let Some(index) = self.free.pop() {
            let record = &mut self.slots[index];
            if let Some(place) = Arc::get_mut(record) {
                *place = value;
                let record = record.clone();
                return Slot { index, record };
            }
            // Cannot happen while confirmation checks sole ownership; be
            // safe anyway and send the record back for another sweep.
            self.retired.push_back(index);
        }

        let record = Arc::new(value);
        let index = self.slots.insert(record.clone());
        Slot { index, record }
    }

    /// Sweeps up to [`SETTLE_BUDGET`](Membuf::SETTLE_BUDGET) retired
    /// records through the predicate, moving confirmed ones to the free
    /// list and requeueing the rest.
    fn settle(&mut self) {
        for _ in 0..Self::SETTLE_BUDGET.min(self.retired.len()) {
            let index = match self.retired.pop_front() {
                Some(index) => index,
                None => break,
            };
            let record = &self.slots[index];
            if (self.check)(record) == SlotState::CanReuse && Arc::strong_count(record) == 1 {
                self.free.push(index);
            } else {
                self.retired.push_back(index);
            }
        }
    }

    /// Retires a record. Its memory stays valid, and is overwritten only
    /// once a later [`alloc`](Membuf::alloc) reclaims it.
    pub fn free(&mut self, slot: Slot<T>) {
        debug_assert!(self.slots.contains(slot.index));
        self.retired.push_back(slot.index);
    }
}

impl<T, U> fmt::Debug for Membuf<T, U> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Membuf")
            .field("allocated", &self.slots.len())
            .field("retired", &self.retired.len())
            .field("free", &self.free.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Membuf, SlotState};
    use std::cell::Cell;
    use std::sync::Arc;

    struct Entry {
        done: Cell<bool>,
        waiting: Cell<bool>,
    }

    impl Entry {
        fn new() -> Entry {
            Entry {
                done: Cell::new(false),
                waiting: Cell::new(false),
            }
        }
    }

    fn entry_state(entry: &Entry) -> SlotState {
        if entry.done.get() {
            SlotState::CanReuse
        } else if entry.waiting.get() {
            SlotState::CanWait
        } else {
            SlotState::InUse
        }
    }

    const USER_DATA: usize = 0xC0FFEE;

    #[test]
    fn reclaims_reusable_records() {
        let mut membuf = Membuf::new(entry_state, USER_DATA);
        assert_eq!(*membuf.user_data(), USER_DATA);

        let mut slots = Vec::new();
        for _ in 0..100 {
            slots.push(membuf.alloc(Entry::new()));
        }
        assert_eq!(membuf.allocated(), 100);

        let mut recycled = Vec::new();
        for slot in slots.drain(..50) {
            slot.done.set(true);
            recycled.push(Arc::as_ptr(&slot.share()));
            membuf.free(slot);
        }

        // The next 50 allocations must all come out of the retired pool.
        for _ in 0..50 {
            let slot = membuf.alloc(Entry::new());
            assert!(!slot.done.get());
            assert!(recycled.contains(&Arc::as_ptr(&slot.share())));
            slots.push(slot);
        }
        assert_eq!(membuf.allocated(), 100);

        // Records still in use are not reclaimed; the arena grows instead.
        slots.push(membuf.alloc(Entry::new()));
        assert_eq!(membuf.allocated(), 101);
    }

    #[test]
    fn can_wait_records_are_not_reclaimed() {
        let mut membuf = Membuf::new(entry_state, ());
        let slot = membuf.alloc(Entry::new());
        let address = Arc::as_ptr(&slot.share());
        slot.waiting.set(true);
        membuf.free(slot);

        let other = membuf.alloc(Entry::new());
        assert_ne!(Arc::as_ptr(&other.share()), address);
        assert_eq!(membuf.allocated(), 2);
    }

    #[test]
    fn sweep_is_bounded_but_eventually_reclaims() {
        let mut membuf = Membuf::new(entry_state, ());
        let mut slots = Vec::new();
        for _ in 0..20 {
            slots.push(membuf.alloc(Entry::new()));
        }
        let shares: Vec<_> = slots.iter().map(|slot| slot.share()).collect();
        for slot in slots.drain(..) {
            slot.waiting.set(true);
            membuf.free(slot);
        }

        // Nothing is reclaimable yet; the sweep gives up after its budget
        // and the arena grows.
        let _extra = membuf.alloc(Entry::new());
        assert_eq!(membuf.allocated(), 21);

        for share in &shares {
            share.waiting.set(false);
            share.done.set(true);
        }
        drop(shares);

        // The rotation now reclaims every retired record instead of
        // growing, a budgeted handful per allocation.
        for _ in 0..20 {
            let slot = membuf.alloc(Entry::new());
            assert!(!slot.done.get());
        }
        assert_eq!(membuf.allocated(), 21);
    }

    #[test]
    fn shared_records_are_not_reclaimed() {
        let mut membuf = Membuf::new(entry_state, ());
        let slot = membuf.alloc(Entry::new());
        let share = slot.share();
        slot.done.set(true);
        membuf.free(slot);

        // A worker still holds the record; reuse must grow instead.
        let other = membuf.alloc(Entry::new());
        assert_ne!(Arc::as_ptr(&other.share()), Arc::as_ptr(&share));
        assert_eq!(membuf.allocated(), 2);

        // Once the share is gone the record becomes reclaimable.
        drop(share);
        let reclaimed = membuf.alloc(Entry::new());
        assert_eq!(membuf.allocated(), 2);
        assert!(!reclaimed.done.get());
    }
}
