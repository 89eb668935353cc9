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

//! Embeddable asynchronous execution library built around pollable futures
//! and virtual data movers.
//!
//! The building blocks, from the bottom up:
//!
//! - [`future`] defines the poll protocol: a [`Future`](future::Future) is
//!   advanced by repeated polling, moving from idle through running to
//!   complete, and announces off-thread completion through a
//!   [`Notifier`](future::Notifier). [`future::chain`] composes futures
//!   into sequential pipelines with typed value propagation.
//!
//! - [`vdm`] provides *virtual data movers*: backends that turn bulk memory
//!   operations (copy, move, fill) into futures. A
//!   [`DataMoverSync`](vdm::sync::DataMoverSync) completes inline; a
//!   [`DataMoverThreads`](vdm::threads::DataMoverThreads) dispatches to a
//!   worker-thread pool; a hardware offload engine can plug into the same
//!   [`DataMover`](vdm::DataMover) trait.
//!
//! - [`runtime`] is a small executor that polls many futures concurrently
//!   on the calling thread, with adaptive spin/sleep and cooperative
//!   wakeup.
//!
//! - [`ring_buffer`] and [`membuf`] are the supporting structures: a
//!   bounded MPMC queue with a stop signal, and an arena of per-operation
//!   records with predicate-driven reuse.
//!
//! # Example
//!
//! ```
//! use datamover_core::future::busy_poll;
//! use datamover_core::vdm::{sync::DataMoverSync, DataMover as _};
//!
//! let mover = DataMoverSync::new();
//! let src = *b"testbuf";
//! let mut dest = [0u8; 7];
//!
//! let mut fut = mover.memcpy(&mut dest[..], &src[..], 0);
//! busy_poll(&mut fut);
//! drop(fut);
//!
//! assert_eq!(&dest, b"testbuf");
//! ```

#![warn(missing_docs)]

pub mod future;
pub mod membuf;
pub mod ring_buffer;
pub mod runtime;
pub mod vdm;

pub use self::future::{busy_poll, Future, FutureState, Monitor, Notifier, NotifierKind, Runnable};
pub use self::runtime::Runtime;
pub use self::vdm::{DataMover, OpFns, Operation, OperationOutput, OperationResult, DURABLE_DEST};
