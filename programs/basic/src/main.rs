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

//! Tour of the data mover API: a plain asynchronous memcpy, then a chained
//! memcpy-and-print pipeline, driven once by the runtime and once by busy
//! polling.

use datamover_core::future::chain::{Chain, MapOutcome};
use datamover_core::future::{busy_poll, Future, FutureState, Notifier, Runnable};
use datamover_core::runtime::Runtime;
use datamover_core::vdm::threads::DataMoverThreads;
use datamover_core::vdm::DataMover as _;
use datamover_core::NotifierKind;

/// Future that prints the pointer handed over by the previous stage.
struct AsyncPrint {
    value: Option<*mut u8>,
    state: FutureState,
    output: (),
}

impl AsyncPrint {
    fn new() -> AsyncPrint {
        AsyncPrint {
            value: None,
            state: FutureState::Idle,
            output: (),
        }
    }
}

impl Runnable for AsyncPrint {
    fn poll(&mut self, notifier: Option<&mut Notifier>) -> FutureState {
        if let Some(notifier) = notifier {
            notifier.arm_none();
        }
        if self.state != FutureState::Complete {
            println!("async print: {:?}", self.value);
            self.state = FutureState::Complete;
        }
        self.state
    }

    fn state(&self) -> FutureState {
        self.state
    }
}

impl Future for AsyncPrint {
    type Output = ();

    fn output(&self) -> &() {
        &self.output
    }
}

fn main() {
    env_logger::init();

    let src = b"testbuf".to_vec();
    let mut dest = vec![0u8; src.len()];

    let runtime = Runtime::new();
    let mover = DataMoverThreads::new(4, 128, NotifierKind::Poller)
        .unwrap_or_else(|err| panic!("failed to create the thread mover: {}", err));

    // Plain asynchronous copy, driven by the runtime.
    {
        let mut copy = mover.memcpy(&mut dest[..], &src[..], 0);
        runtime.wait(&mut copy);
    }
    log::info!("first copy done: {:?}", String::from_utf8_lossy(&dest));

    // Copy chained with a print stage; the map propagates the copy's
    // destination pointer into the printer before it runs.
    let mut dest2 = vec![0u8; src.len()];
    {
        let copy = mover.memcpy(&mut dest2[..], &src[..], 0);
        let mut chain = Chain::new(copy, AsyncPrint::new(), |copy: &_, print: &mut AsyncPrint| {
            print.value = Some(copy.output().dest);
            MapOutcome::Continue
        });
        runtime.wait(&mut chain);
    }

    // The same pipeline again, this time driven by busy polling alone.
    let mut dest3 = vec![0u8; src.len()];
    {
        let copy = mover.memcpy(&mut dest3[..], &src[..], 0);
        let mut chain = Chain::new(copy, AsyncPrint::new(), |copy: &_, print: &mut AsyncPrint| {
            print.value = Some(copy.output().dest);
            MapOutcome::Continue
        });
        busy_poll(&mut chain);
    }

    println!(
        "{} {} {}",
        String::from_utf8_lossy(&src),
        String::from_utf8_lossy(&dest3),
        src == dest3
    );
}
