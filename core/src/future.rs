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

//! Pollable futures and the notification channel between backends and executors.
//!
//! A future in this crate is a state machine that is advanced by calling
//! [`Runnable::poll`]. It starts [`Idle`](FutureState::Idle), spends some
//! number of polls [`Running`](FutureState::Running), and eventually settles
//! on [`Complete`](FutureState::Complete). Once complete, polling is a no-op.
//!
//! The executor passes a [`Notifier`] to each poll. A backend that accepts
//! work arms the notifier with the way it intends to report completion:
//!
//! - nothing at all, because the work finished inline;
//! - a [`Waker`](core::task::Waker) it will invoke from a worker thread;
//! - a [`Monitor`], a shared flag the executor can read without being woken.
//!
//! Polling a future never blocks and never allocates; all of a future's
//! state, including its output, lives inside the future itself.

use core::sync::atomic::{AtomicU64, Ordering};
use core::task::Waker;
use std::sync::Arc;

pub mod chain;

/// State of a future.
///
/// States are totally ordered; a well-behaved future only ever moves towards
/// [`Complete`](FutureState::Complete).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FutureState {
    /// The future has not been successfully started yet.
    Idle,
    /// Work is in progress; more polls are needed.
    Running,
    /// The result has been materialized in the future's output.
    Complete,
}

/// Which notification mechanism a backend armed during a poll.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NotifierKind {
    /// The future completes inline; no wakeup is needed.
    None,
    /// The backend will invoke the executor's waker on completion.
    Waker,
    /// The backend exposes a [`Monitor`] the executor can poll.
    Poller,
}

/// Shared 64-bit completion flag.
///
/// Backends that complete work off-thread set the flag with release
/// semantics; observers read it with acquire semantics, so everything the
/// backend wrote before [`set`](Monitor::set) is visible once
/// [`is_set`](Monitor::is_set) returns true.
#[derive(Debug, Clone)]
pub struct Monitor {
    flag: Arc<AtomicU64>,
}

impl Monitor {
    /// Creates a monitor in the unset state.
    pub fn new() -> Monitor {
        Monitor {
            flag: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Raises the flag.
    pub fn set(&self) {
        self.flag.store(1, Ordering::Release);
    }

    /// Returns true once the flag has been raised.
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire) != 0
    }
}

impl Default for Monitor {
    fn default() -> Monitor {
        Monitor::new()
    }
}

/// Notification request handed to [`Runnable::poll`].
///
/// The executor builds one of these around its waker before every poll. A
/// backend that starts work calls exactly one of the `arm_*` methods to tell
/// the executor how completion will be announced; the executor then reads
/// [`kind`](Notifier::kind) and [`monitor`](Notifier::monitor) back.
#[derive(Debug)]
pub struct Notifier {
    waker: Waker,
    kind: NotifierKind,
    monitor: Option<Monitor>,
}

impl Notifier {
    /// Creates a notifier around the executor's waker. Starts out in the
    /// [`None`](NotifierKind::None) state.
    pub fn new(waker: Waker) -> Notifier {
        Notifier {
            waker,
            kind: NotifierKind::None,
            monitor: None,
        }
    }

    /// Declares that no wakeup will happen; the work completed inline.
    pub fn arm_none(&mut self) {
        self.kind = NotifierKind::None;
        self.monitor = None;
    }

    /// Declares that the returned waker will be invoked on completion.
    pub fn arm_waker(&mut self) -> Waker {
        self.kind = NotifierKind::Waker;
        self.monitor = None;
        self.waker.clone()
    }

    /// Declares that completion will be announced through `monitor`.
    pub fn arm_poller(&mut self, monitor: Monitor) {
        self.kind = NotifierKind::Poller;
        self.monitor = Some(monitor);
    }

    /// The mechanism the backend armed, if any.
    pub fn kind(&self) -> NotifierKind {
        self.kind
    }

    /// The monitor exposed by the backend, in poller mode.
    pub fn monitor(&self) -> Option<&Monitor> {
        self.monitor.as_ref()
    }
}

/// Object-safe half of the future protocol. This is what a
/// [`Runtime`](crate::runtime::Runtime) drives.
pub trait Runnable {
    /// Advances the future by at most one step and returns the new state.
    ///
    /// `notifier` is `None` when the caller intends to busy-poll. Returning
    /// [`Idle`](FutureState::Idle) is legal and means the underlying work
    /// could not be started yet; the caller should simply poll again later.
    ///
    /// Once a poll has returned [`Complete`](FutureState::Complete), all
    /// subsequent polls must return `Complete` without side effects.
    fn poll(&mut self, notifier: Option<&mut Notifier>) -> FutureState;

    /// The state most recently returned by [`poll`](Runnable::poll), or
    /// [`Idle`](FutureState::Idle) before the first poll.
    fn state(&self) -> FutureState;

    /// True when the future's work executes off-thread. Executors poll such
    /// futures first, so that in-thread work overlaps with them.
    fn is_async(&self) -> bool {
        false
    }
}

/// A pollable unit of asynchronous work with a typed result.
pub trait Future: Runnable {
    /// Type of the value produced by the future.
    type Output;

    /// Borrows the in-place output storage.
    ///
    /// The value is only meaningful once [`state`](Runnable::state) reports
    /// [`Complete`](FutureState::Complete).
    fn output(&self) -> &Self::Output;
}

/// Polls `fut` in a tight loop, without a notifier, until it completes.
pub fn busy_poll<F: Future + ?Sized>(fut: &mut F) -> &F::Output {
    while fut.poll(None) != FutureState::Complete {
        core::hint::spin_loop();
    }
    fut.output()
}

#[cfg(test)]
mod tests {
    use super::{busy_poll, Future, FutureState, Monitor, Notifier, Runnable};
    use futures::task::noop_waker;

    const MAX_COUNT: u32 = 10;

    struct Countup {
        counter: u32,
        state: FutureState,
        output: u32,
    }

    impl Countup {
        fn new() -> Countup {
            Countup {
                counter: 0,
                state: FutureState::Idle,
                output: 0,
            }
        }
    }

    impl Runnable for Countup {
        fn poll(&mut self, _notifier: Option<&mut Notifier>) -> FutureState {
            if self.state == FutureState::Complete {
                return FutureState::Complete;
            }
            self.counter += 1;
            self.state = if self.counter == MAX_COUNT {
                self.output = 1;
                FutureState::Complete
            } else {
                FutureState::Running
            };
            self.state
        }

        fn state(&self) -> FutureState {
            self.state
        }
    }

    impl Future for Countup {
        type Output = u32;

        fn output(&self) -> &u32 {
            &self.output
        }
    }

    #[test]
    fn states_are_monotone() {
        let mut fut = Countup::new();
        assert_eq!(fut.state(), FutureState::Idle);
        assert_eq!(*fut.output(), 0);

        let mut previous = FutureState::Idle;
        for poll in 0..MAX_COUNT {
            assert_eq!(fut.counter, poll);
            let state = fut.poll(None);
            assert!(state >= previous);
            previous = state;
        }
        assert_eq!(previous, FutureState::Complete);
        assert_eq!(*fut.output(), 1);
    }

    #[test]
    fn polling_complete_future_is_noop() {
        let mut fut = Countup::new();
        busy_poll(&mut fut);
        assert_eq!(fut.counter, MAX_COUNT);

        for _ in 0..5 {
            assert_eq!(fut.poll(None), FutureState::Complete);
        }
        assert_eq!(fut.counter, MAX_COUNT);
        assert_eq!(*fut.output(), 1);
    }

    #[test]
    fn busy_poll_returns_output() {
        let mut fut = Countup::new();
        assert_eq!(*busy_poll(&mut fut), 1);
    }

    #[test]
    fn notifier_arming() {
        let mut notifier = Notifier::new(noop_waker());
        assert_eq!(notifier.kind(), super::NotifierKind::None);
        assert!(notifier.monitor().is_none());

        let _waker = notifier.arm_waker();
        assert_eq!(notifier.kind(), super::NotifierKind::Waker);

        let monitor = Monitor::new();
        notifier.arm_poller(monitor.clone());
        assert_eq!(notifier.kind(), super::NotifierKind::Poller);
        assert!(!notifier.monitor().unwrap().is_set());
        monitor.set();
        assert!(notifier.monitor().unwrap().is_set());

        notifier.arm_none();
        assert!(notifier.monitor().is_none());
    }
}
