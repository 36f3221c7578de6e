// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Wait-free data sharing between a realtime audio thread and the rest of
//! the app.
//!
//! One thread in an audio application is special: the processing callback.
//! It has a deadline every couple of milliseconds and therefore must never
//! block on a mutex, allocate, or spin for an unbounded number of
//! iterations. Everything else (UI, IPC, worker threads) is free to do all
//! of those. The primitives in this crate split every operation into a
//! bounded realtime fast path and a lock-and-allocate non-realtime slow
//! path, so the two sides can share data without the callback ever waiting.
//!
//! # Real-Time Safety
//!
//! The realtime thread has strict requirements:
//! - No memory allocation
//! - No locks (mutexes, RwLocks)
//! - No system calls (file I/O, network, logging)
//! - Bounded execution time
//!
//! Every operation documented as realtime-safe below meets all four. The
//! non-realtime counterparts may lock, allocate, and emit `tracing` events.
//!
//! # Picking a primitive
//!
//! - [`NonRealtimeMutatable`]: the realtime thread *reads* a value that
//!   other threads update (filter coefficients, routing tables). Realtime
//!   reads are wait-free: one atomic exchange in, one atomic store out.
//! - [`RealtimeMutatable`]: the realtime thread *writes* a value that
//!   other threads observe (playback position, analysis state). Realtime
//!   writes are wait-free; readers block only on each other.
//! - [`Fifo`]: a bounded lock-free queue of boxed events, safe on both
//!   sides, FIFO in single-producer/single-consumer use.
//! - [`RingBuffer`]: a bounded single-producer/single-consumer value
//!   queue for streams of small items (meter frames, parameter changes).
//!
//! # Example
//!
//! ```
//! use rtshare::NonRealtimeMutatable;
//!
//! #[derive(Clone, Copy)]
//! struct Coeffs {
//!     b0: f32,
//!     b1: f32,
//! }
//!
//! let (mut dsp, ui) = NonRealtimeMutatable::new(Coeffs { b0: 1.0, b1: 0.0 }).split();
//!
//! // Audio thread: wait-free read for the duration of one callback.
//! {
//!     let coeffs = dsp.read();
//!     assert_eq!(coeffs.b0, 1.0);
//! }
//!
//! // UI thread: clone, mutate, publish atomically.
//! {
//!     let mut coeffs = ui.write();
//!     coeffs.b0 = 0.5;
//!     coeffs.b1 = 0.5;
//! }
//!
//! assert_eq!(dsp.read().b0, 0.5);
//! ```

pub mod error;
pub mod fifo;
pub mod non_realtime_mutatable;
pub mod realtime_mutatable;
pub mod ringbuf;

pub use error::PushError;
pub use fifo::Fifo;
pub use non_realtime_mutatable::{NonRealtimeMutatable, NonRealtimeWriter, RealtimeReader};
pub use realtime_mutatable::{NonRealtimeReader, RealtimeMutatable, RealtimeWriter};
pub use ringbuf::{Consumer, Producer, RingBuffer};
