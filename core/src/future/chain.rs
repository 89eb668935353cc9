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

//! Sequential composition of futures with typed value propagation.
//!
//! A [`Chain`] runs two futures one after the other. When the first one
//! completes, a user-provided map callback is invoked with the completed
//! first stage and exclusive access to the second, so that it can move
//! values forward before the second stage is ever polled. The map may also
//! decide to [skip](MapOutcome::SkipNext) the rest of the chain entirely.
//!
//! A [`Then`] is the lazy variant: the second stage does not exist until the
//! first one completes, at which point it is constructed from the first
//! stage's result.
//!
//! Both combinators are futures themselves and nest freely, which is how
//! pipelines of more than two stages are expressed. At any point in time at
//! most one stage of a chain is actually executing, and stages complete in
//! declaration order.

use crate::future::{Future, FutureState, Notifier, Runnable};

/// What a map callback tells the chain to do once it returns.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MapOutcome {
    /// Proceed to the next stage normally.
    Continue,
    /// Mark the rest of the chain complete. The next stage is never polled
    /// and its work is never started; its output keeps whatever value it
    /// held when the map ran.
    SkipNext,
}

/// Which stage the chain's cursor rests on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Stage {
    First,
    Second,
    Done,
}

/// Future that runs `A`, maps its result into `B`, then runs `B`.
pub struct Chain<A, B, M> {
    first: A,
    second: B,
    map: Option<M>,
    stage: Stage,
    state: FutureState,
    skipped: bool,
}

impl<A, B, M> Chain<A, B, M>
where
    A: Future,
    B: Future,
    M: FnOnce(&A, &mut B) -> MapOutcome,
{
    /// Builds a chain out of two futures and a map callback.
    ///
    /// `map` runs exactly once, when `first` completes and before `second`
    /// is polled for the first time.
    pub fn new(first: A, second: B, map: M) -> Chain<A, B, M> {
        Chain {
            first,
            second,
            map: Some(map),
            stage: Stage::First,
            state: FutureState::Idle,
            skipped: false,
        }
    }

    /// The first stage.
    pub fn first(&self) -> &A {
        &self.first
    }

    /// The second stage.
    pub fn second(&self) -> &B {
        &self.second
    }
}

impl<A, B, M> Runnable for Chain<A, B, M>
where
    A: Future,
    B: Future,
    M: FnOnce(&A, &mut B) -> MapOutcome,
{
    fn poll(&mut self, notifier: Option<&mut Notifier>) -> FutureState {
        if self.state == FutureState::Complete {
            return FutureState::Complete;
        }
        self.state = FutureState::Running;

        match self.stage {
            Stage::First => {
                if self.first.state() != FutureState::Complete
                    && self.first.poll(notifier) != FutureState::Complete
                {
                    // An inner stage stuck in `Idle` still makes the whole
                    // chain report `Running`; `Idle` is only ever observed
                    // externally before the first poll.
                    return FutureState::Running;
                }
                if let Some(map) = self.map.take() {
                    if map(&self.first, &mut self.second) == MapOutcome::SkipNext {
                        self.skipped = true;
                    }
                }
                if self.skipped {
                    self.stage = Stage::Done;
                    self.state = FutureState::Complete;
                    return FutureState::Complete;
                }
                self.stage = Stage::Second;
                FutureState::Running
            }
            Stage::Second => {
                if self.second.state() == FutureState::Complete
                    || self.second.poll(notifier) == FutureState::Complete
                {
                    self.stage = Stage::Done;
                    self.state = FutureState::Complete;
                    return FutureState::Complete;
                }
                FutureState::Running
            }
            Stage::Done => {
                self.state = FutureState::Complete;
                FutureState::Complete
            }
        }
    }

    fn state(&self) -> FutureState {
        self.state
    }

    fn is_async(&self) -> bool {
        // Delegate to the stage the cursor rests on, so that an executor
        // ordering futures by this property tracks the work that is
        // actually pending.
        match self.stage {
            Stage::First => self.first.is_async(),
            Stage::Second => self.second.is_async(),
            Stage::Done => false,
        }
    }
}

impl<A, B, M> Future for Chain<A, B, M>
where
    A: Future,
    B: Future,
    M: FnOnce(&A, &mut B) -> MapOutcome,
{
    type Output = B::Output;

    fn output(&self) -> &B::Output {
        self.second.output()
    }
}

/// Future that runs `A`, then builds and runs a `B` out of its result.
pub struct Then<A, B, F> {
    first: A,
    second: Option<B>,
    init: Option<F>,
    state: FutureState,
}

impl<A, B, F> Then<A, B, F>
where
    A: Future,
    B: Future,
    F: FnOnce(&A) -> B,
{
    /// Builds a lazy chain. `init` runs exactly once, when `first`
    /// completes; the future it returns becomes the second stage.
    pub fn new(first: A, init: F) -> Then<A, B, F> {
        Then {
            first,
            second: None,
            init: Some(init),
            state: FutureState::Idle,
        }
    }

    /// The first stage.
    pub fn first(&self) -> &A {
        &self.first
    }

    /// The second stage, if it has been constructed already.
    pub fn second(&self) -> Option<&B> {
        self.second.as_ref()
    }
}

impl<A, B, F> Runnable for Then<A, B, F>
where
    A: Future,
    B: Future,
    F: FnOnce(&A) -> B,
{
    fn poll(&mut self, notifier: Option<&mut Notifier>) -> FutureState {
        if self.state == FutureState::Complete {
            return FutureState::Complete;
        }
        self.state = FutureState::Running;

        if self.second.is_none() {
            if self.first.state() != FutureState::Complete
                && self.first.poll(notifier) != FutureState::Complete
            {
                return FutureState::Running;
            }
            if let Some(init) = self.init.take() {
                self.second = Some(init(&self.first));
            }
            return FutureState::Running;
        }

        let second = match &mut self.second {
            Some(second) => second,
            None => unreachable!(),
        };
        if second.state() == FutureState::Complete
            || second.poll(notifier) == FutureState::Complete
        {
            self.state = FutureState::Complete;
        }
        self.state
    }

    fn state(&self) -> FutureState {
        self.state
    }

    fn is_async(&self) -> bool {
        if self.first.state() != FutureState::Complete {
            self.first.is_async()
        } else {
            self.second.as_ref().map_or(false, |second| second.is_async())
        }
    }
}

impl<A, B, F> Future for Then<A, B, F>
where
    A: Future,
    B: Future,
    F: FnOnce(&A) -> B,
{
    type Output = B::Output;

    /// # Panics
    ///
    /// Panics if the second stage has not been constructed yet, i.e. before
    /// the first stage has completed.
    fn output(&self) -> &B::Output {
        match &self.second {
            Some(second) => second.output(),
            None => panic!("second stage of a lazy chain does not exist yet"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Chain, MapOutcome, Then};
    use crate::future::{busy_poll, Future, FutureState, Notifier, Runnable};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Countup {
        id: u64,
        counter: u32,
        max: u32,
        state: FutureState,
        output: u32,
        asynchronous: bool,
        completion_log: Rc<RefCell<Vec<u64>>>,
    }

    impl Countup {
        fn new(id: u64, max: u32, log: &Rc<RefCell<Vec<u64>>>) -> Countup {
            Countup {
                id,
                counter: 0,
                max,
                state: FutureState::Idle,
                output: 0,
                asynchronous: false,
                completion_log: log.clone(),
            }
        }

        fn new_async(id: u64, max: u32, log: &Rc<RefCell<Vec<u64>>>) -> Countup {
            let mut fut = Countup::new(id, max, log);
            fut.asynchronous = true;
            fut
        }
    }

    impl Runnable for Countup {
        fn poll(&mut self, _notifier: Option<&mut Notifier>) -> FutureState {
            if self.state == FutureState::Complete {
                return FutureState::Complete;
            }
            self.counter += 1;
            self.state = if self.counter == self.max {
                self.output += 1;
                self.completion_log.borrow_mut().push(self.id);
                FutureState::Complete
            } else {
                FutureState::Running
            };
            self.state
        }

        fn state(&self) -> FutureState {
            self.state
        }

        fn is_async(&self) -> bool {
            self.asynchronous
        }
    }

    impl Future for Countup {
        type Output = u32;

        fn output(&self) -> &u32 {
            &self.output
        }
    }

    #[test]
    fn stages_run_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let first = Countup::new(1, 5, &log);
        let second = Countup::new(2, 3, &log);

        let mut chain = Chain::new(first, second, |first: &Countup, second: &mut Countup| {
            // The second stage must not have been touched yet.
            assert_eq!(second.counter, 0);
            second.output += first.output;
            MapOutcome::Continue
        });

        assert_eq!(chain.state(), FutureState::Idle);
        busy_poll(&mut chain);
        assert_eq!(*chain.output(), 2);
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn idle_inner_future_reports_running() {
        struct NeverStarts;
        impl Runnable for NeverStarts {
            fn poll(&mut self, _: Option<&mut Notifier>) -> FutureState {
                FutureState::Idle
            }
            fn state(&self) -> FutureState {
                FutureState::Idle
            }
        }
        impl Future for NeverStarts {
            type Output = ();
            fn output(&self) -> &() {
                &()
            }
        }

        let log = Rc::new(RefCell::new(Vec::new()));
        let mut chain = Chain::new(NeverStarts, Countup::new(1, 1, &log), |_: &NeverStarts, _: &mut Countup| {
            MapOutcome::Continue
        });
        for _ in 0..10 {
            assert_eq!(chain.poll(None), FutureState::Running);
        }
    }

    #[test]
    fn skip_next_never_polls_second_stage() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let first = Countup::new(1, 2, &log);
        let second = Countup::new(2, 2, &log);

        let mut chain = Chain::new(first, second, |_: &Countup, second: &mut Countup| {
            second.output = 7;
            MapOutcome::SkipNext
        });

        busy_poll(&mut chain);
        assert_eq!(chain.second().counter, 0);
        assert_eq!(chain.second().state(), FutureState::Idle);
        assert_eq!(*chain.output(), 7);
        assert_eq!(*log.borrow(), vec![1]);
    }

    #[test]
    fn chains_nest() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let inner = Chain::new(
            Countup::new(1, 3, &log),
            Countup::new(2, 3, &log),
            |first: &Countup, second: &mut Countup| {
                second.output += first.output;
                MapOutcome::Continue
            },
        );
        let mut outer = Chain::new(inner, Countup::new(3, 3, &log), |inner: &Chain<_, _, _>, last: &mut Countup| {
            last.output += inner.output();
            MapOutcome::Continue
        });

        busy_poll(&mut outer);
        assert_eq!(*outer.output(), 3);
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn lazy_second_stage_is_built_from_first() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let first = Countup::new(1, 4, &log);

        let log2 = log.clone();
        let mut then = Then::new(first, move |first: &Countup| {
            // Constructed only once the first stage is complete, from its
            // result.
            assert_eq!(first.state(), FutureState::Complete);
            Countup::new(10 + u64::from(first.output), 2, &log2)
        });

        assert!(then.second().is_none());
        busy_poll(&mut then);
        assert_eq!(*then.output(), 1);
        assert_eq!(*log.borrow(), vec![1, 11]);
    }

    #[test]
    fn is_async_tracks_active_stage() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let first = Countup::new(1, 2, &log);
        let second = Countup::new_async(2, 2, &log);

        let mut chain = Chain::new(first, second, |_: &Countup, _: &mut Countup| {
            MapOutcome::Continue
        });
        assert!(!chain.is_async());
        // Finish the first stage; the cursor moves to the asynchronous one.
        while chain.first().state() != FutureState::Complete {
            chain.poll(None);
        }
        chain.poll(None);
        assert!(chain.is_async());
        busy_poll(&mut chain);
        assert!(!chain.is_async());
    }
}
