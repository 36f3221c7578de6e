// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Lock-free single-producer single-consumer ring buffer.
//!
//! The value-queue counterpart of [`Fifo`](crate::Fifo) for streams of
//! small items: parameter changes flowing into the audio thread, meter
//! frames flowing out. Items are stored inline (no boxing), and a full
//! buffer rejects the push and hands the item back rather than overwriting
//! unconsumed data.
//!
//! Exactly one producer and one consumer, each on a thread of its choice.
//! Both sides are wait-free: a fixed number of atomic operations per call,
//! no locks, no allocation after construction.
//!
//! # Example
//!
//! ```
//! use rtshare::RingBuffer;
//!
//! let (mut producer, mut consumer) = RingBuffer::new(1024).split();
//!
//! // Audio thread writes peak values.
//! producer.push(0.8f32).unwrap();
//! producer.push(0.75).unwrap();
//!
//! // UI thread reads them.
//! assert_eq!(consumer.pop(), Some(0.8));
//! assert_eq!(consumer.pop(), Some(0.75));
//! assert_eq!(consumer.pop(), None);
//! ```

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::PushError;

/// A bounded single-producer single-consumer queue of inline values.
///
/// Construct, then [`split`](RingBuffer::split) into the two endpoint
/// handles. The requested capacity is rounded up to the next power of two.
pub struct RingBuffer<T> {
    buffer: Box<[UnsafeCell<Option<T>>]>,
    /// Monotonically increasing; only the producer stores it.
    write_pos: AtomicUsize,
    /// Monotonically increasing; only the consumer stores it.
    read_pos: AtomicUsize,
    /// `capacity - 1`, for masking positions into the ring.
    mask: usize,
}

// SAFETY: designed for SPSC access. Only the producer writes slots at
// write_pos, only the consumer takes slots at read_pos, and the
// acquire/release pair on the positions orders the slot accesses.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Create a ring buffer holding at least `capacity` items.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two();

        let mut buffer = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            buffer.push(UnsafeCell::new(None));
        }

        Self {
            buffer: buffer.into_boxed_slice(),
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            mask: capacity - 1,
        }
    }

    /// Number of items the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Split into producer and consumer handles.
    pub fn split(self) -> (Producer<T>, Consumer<T>) {
        let shared = Arc::new(self);
        (
            Producer {
                inner: Arc::clone(&shared),
            },
            Consumer { inner: shared },
        )
    }

    /// Number of items currently readable.
    fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }
}

/// Producer endpoint of a [`RingBuffer`]. Only one exists per buffer.
pub struct Producer<T> {
    inner: Arc<RingBuffer<T>>,
}

impl<T> Producer<T> {
    /// Append an item.
    ///
    /// Returns the item back inside [`PushError`] if the buffer is full;
    /// unconsumed data is never overwritten.
    pub fn push(&mut self, item: T) -> Result<(), PushError<T>> {
        let write = self.inner.write_pos.load(Ordering::Relaxed);
        let read = self.inner.read_pos.load(Ordering::Acquire);

        if write.wrapping_sub(read) > self.inner.mask {
            return Err(PushError(item));
        }

        let idx = write & self.inner.mask;
        // SAFETY: we are the only writer, and the slot at write_pos is
        // outside the consumer's readable range until the store below.
        unsafe {
            *self.inner.buffer[idx].get() = Some(item);
        }

        self.inner
            .write_pos
            .store(write.wrapping_add(1), Ordering::Release);

        Ok(())
    }

    /// Number of items currently readable by the consumer.
    pub fn available(&self) -> usize {
        self.inner.available()
    }

    /// Whether a push would currently be rejected.
    pub fn is_full(&self) -> bool {
        self.inner.available() > self.inner.mask
    }
}

/// Consumer endpoint of a [`RingBuffer`]. Only one exists per buffer.
pub struct Consumer<T> {
    inner: Arc<RingBuffer<T>>,
}

impl<T> Consumer<T> {
    /// Take the oldest item, or `None` if the buffer is empty.
    pub fn pop(&mut self) -> Option<T> {
        let read = self.inner.read_pos.load(Ordering::Relaxed);
        let write = self.inner.write_pos.load(Ordering::Acquire);

        if read == write {
            return None;
        }

        let idx = read & self.inner.mask;
        // SAFETY: we are the only reader, and the acquire load above
        // ordered the producer's write of this slot before us.
        let item = unsafe { (*self.inner.buffer[idx].get()).take() };

        self.inner
            .read_pos
            .store(read.wrapping_add(1), Ordering::Release);

        item
    }

    /// Look at the oldest item without removing it.
    pub fn peek(&mut self) -> Option<&T> {
        let read = self.inner.read_pos.load(Ordering::Relaxed);
        let write = self.inner.write_pos.load(Ordering::Acquire);

        if read == write {
            return None;
        }

        let idx = read & self.inner.mask;
        // SAFETY: as in `pop`; `&mut self` keeps the slot borrowed until
        // the reference is released.
        unsafe { (*self.inner.buffer[idx].get()).as_ref() }
    }

    /// Number of items currently readable.
    pub fn available(&self) -> usize {
        self.inner.available()
    }

    /// Whether the buffer has nothing to read.
    pub fn is_empty(&self) -> bool {
        self.inner.available() == 0
    }
}
