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

//! Executor that polls a set of futures to completion with adaptive
//! spin/sleep.
//!
//! The way it works is the following:
//!
//! - The runtime polls every not-yet-complete future in a loop, for a
//!   configurable number of passes, pausing the CPU between passes.
//!
//! - Each poll carries a [`Notifier`] built around a waker that signals the
//!   runtime's condition variable. A backend that completes work on a
//!   worker thread invokes the waker.
//!
//! - When the spin budget runs out without everything completing, the
//!   runtime parks itself on the condition variable, bounded by a short
//!   timeout. A waker invocation cuts the wait short; the timeout covers
//!   backends that only expose a pollable completion flag.
//!
//! Futures are polled strictly on the calling thread; the runtime borrows
//! them for the duration of the wait and never cancels them.

use crate::future::{FutureState, Notifier, NotifierKind, Runnable};
use core::hint;
use futures::task::{waker, ArcWake};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// Executor for [`Runnable`] futures.
pub struct Runtime {
    shared: Arc<Shared>,
    spins_before_sleep: u64,
    cond_wait_time: Duration,
}

/// State shared with the wakers handed out to backends.
struct Shared {
    /// True when a waker fired since the runtime last woke up.
    woken_up: Mutex<bool>,
    on_wake: Condvar,
}

impl ArcWake for Shared {
    fn wake_by_ref(arc_self: &Arc<Shared>) {
        let mut woken_up = arc_self.woken_up.lock();
        *woken_up = true;
        arc_self.on_wake.notify_all();
    }
}

impl Runtime {
    /// Creates a runtime with the default spin budget (1000 passes) and
    /// sleep bound (1 millisecond).
    pub fn new() -> Runtime {
        Runtime {
            shared: Arc::new(Shared {
                woken_up: Mutex::new(false),
                on_wake: Condvar::new(),
            }),
            spins_before_sleep: 1000,
            cond_wait_time: Duration::from_millis(1),
        }
    }

    /// Sets how many polling passes happen before the runtime goes to
    /// sleep.
    pub fn set_spins_before_sleep(&mut self, spins: u64) {
        self.spins_before_sleep = spins;
    }

    /// Sets the upper bound of a single sleep.
    pub fn set_cond_wait_time(&mut self, time: Duration) {
        self.cond_wait_time = time;
    }

    /// Drives a single future to completion.
    pub fn wait<F: Runnable>(&self, fut: &mut F) {
        self.wait_multiple(&mut [fut as &mut dyn Runnable]);
    }

    /// Drives every future in `futs` to completion, polling them
    /// concurrently on the calling thread.
    ///
    /// The slice may be reordered: asynchronous futures are moved to the
    /// front of each polling pass so that their off-thread work overlaps
    /// with the in-thread polls that follow. The partition is stable;
    /// within each class the caller's order is preserved.
    pub fn wait_multiple(&self, futs: &mut [&mut dyn Runnable]) {
        let waker = waker(self.shared.clone());
        let mut ndone = futs
            .iter()
            .filter(|fut| fut.state() == FutureState::Complete)
            .count();

        loop {
            for _ in 0..self.spins_before_sleep {
                futs.sort_by_key(|fut| !fut.is_async());

                for fut in futs.iter_mut() {
                    if fut.state() == FutureState::Complete {
                        continue;
                    }
                    let mut notifier = Notifier::new(waker.clone());
                    if fut.poll(Some(&mut notifier)) == FutureState::Complete {
                        ndone += 1;
                    }
                    match notifier.kind() {
                        // TODO: when a single poller-mode future remains,
                        // wait on its monitor with an umonitor/umwait-style
                        // primitive instead of timing out of the condvar.
                        NotifierKind::Poller => {}
                        NotifierKind::Waker | NotifierKind::None => {}
                    }
                }

                if ndone == futs.len() {
                    return;
                }
                hint::spin_loop();
            }
            self.sleep();
        }
    }

    /// Parks the calling thread until a waker fires or the configured wait
    /// time elapses.
    fn sleep(&self) {
        let mut woken_up = self.shared.woken_up.lock();
        if !*woken_up {
            self.shared
                .on_wake
                .wait_for(&mut woken_up, self.cond_wait_time);
        }
        *woken_up = false;
    }
}

impl Default for Runtime {
    fn default() -> Runtime {
        Runtime::new()
    }
}
