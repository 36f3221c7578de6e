// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Bounded lock-free queue of boxed elements.
//!
//! A ring of atomic pointer slots, null meaning "empty". Producers claim a
//! position with a counter increment and try to CAS their element into that
//! slot; consumers do the same with an exchange back to null. Both sides
//! finish within `capacity` atomic operations, so either side may be the
//! realtime thread. The usual deployment is an event channel between the
//! audio callback and a worker, one direction per queue.
//!
//! Elements travel as `Box<T>`: [`Fifo::push`] takes ownership and
//! [`Fifo::pop`] hands it back, so the payload itself is never copied and
//! no allocation happens inside the queue. Allocate the box off the
//! realtime thread and recycle it there too if the realtime side is the
//! producer.
//!
//! # Ordering caveat
//!
//! Each endpoint advances its position counter *before* probing, so with
//! several concurrent producers (or several concurrent consumers) elements
//! can land or leave out of order. With one producer and one consumer the
//! queue is strictly FIFO. Use one queue per direction per thread pair.
//!
//! # Example
//!
//! ```
//! use rtshare::Fifo;
//!
//! let fifo = Fifo::with_capacity(8);
//! fifo.push(Box::new("note-on")).unwrap();
//!
//! assert_eq!(*fifo.pop().unwrap(), "note-on");
//! assert!(fifo.pop().is_none());
//! ```

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

use crate::error::PushError;

/// A bounded lock-free queue of `Box<T>` elements.
///
/// Capacity is fixed at construction and must be a power of two. See the
/// [module docs](self) for the ordering caveat under concurrent producers
/// or consumers.
pub struct Fifo<T> {
    slots: Box<[AtomicPtr<T>]>,
    /// `capacity - 1`; positions are masked with this to index the ring.
    mask: usize,
    /// Monotonically increasing; padded so the two endpoints do not share a
    /// cache line.
    readpos: CachePadded<AtomicUsize>,
    writepos: CachePadded<AtomicUsize>,
}

// SAFETY: the queue only transfers ownership of boxed elements between
// threads; no element is ever aliased across threads.
unsafe impl<T: Send> Send for Fifo<T> {}
unsafe impl<T: Send> Sync for Fifo<T> {}

impl<T> Fifo<T> {
    /// Create a queue with room for `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or not a power of two.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity >= 1 && capacity.is_power_of_two(),
            "fifo capacity must be a power of two, got {}",
            capacity
        );

        let slots: Vec<AtomicPtr<T>> = (0..capacity)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect();

        Self {
            slots: slots.into_boxed_slice(),
            mask: capacity - 1,
            readpos: CachePadded::new(AtomicUsize::new(0)),
            writepos: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Number of elements the queue can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slot currently holds an element.
    ///
    /// A racy snapshot: the verdict can be stale by the time the caller
    /// acts on it.
    pub fn is_empty(&self) -> bool {
        self.slots
            .iter()
            .all(|slot| slot.load(Ordering::Acquire).is_null())
    }

    /// Append an element.
    ///
    /// Returns the element back inside [`PushError`] if the queue is full.
    /// Lock-free: at most `capacity` CAS attempts.
    pub fn push(&self, value: Box<T>) -> Result<(), PushError<Box<T>>> {
        let raw = Box::into_raw(value);

        for _ in 0..self.slots.len() {
            let pos = self.writepos.fetch_add(1, Ordering::Relaxed) & self.mask;

            if self.slots[pos]
                .compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(());
            }
        }

        // SAFETY: every CAS failed, so `raw` never entered a slot and we
        // still own it.
        Err(PushError(unsafe { Box::from_raw(raw) }))
    }

    /// Take the oldest element, or `None` if the queue is empty.
    ///
    /// Lock-free: at most `capacity` exchanges.
    pub fn pop(&self) -> Option<Box<T>> {
        for _ in 0..self.slots.len() {
            let pos = self.readpos.fetch_add(1, Ordering::Relaxed) & self.mask;

            let taken = self.slots[pos].swap(ptr::null_mut(), Ordering::AcqRel);
            if !taken.is_null() {
                // SAFETY: a non-null slot holds a pointer produced by
                // Box::into_raw in `push`, and the exchange made us its
                // sole owner.
                return Some(unsafe { Box::from_raw(taken) });
            }
        }

        None
    }
}

impl<T> Drop for Fifo<T> {
    fn drop(&mut self) {
        for slot in self.slots.iter_mut() {
            let p = *slot.get_mut();
            if !p.is_null() {
                // SAFETY: the element was pushed and never popped; with
                // `&mut self` no other thread can race us for it.
                drop(unsafe { Box::from_raw(p) });
            }
        }
    }
}
