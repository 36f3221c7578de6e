// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A shared value the realtime thread writes and other threads observe.
//!
//! The mirror image of [`NonRealtimeMutatable`](crate::NonRealtimeMutatable):
//! the audio callback produces a value (playback position, envelope state,
//! analysis results) and UI or worker threads want a consistent snapshot of
//! it. The realtime writer mutates a private scratch copy with no
//! synchronization at all, then publishes it into one slot of a double
//! buffer. A single atomic control word packs three bits:
//!
//! - `INDEX_BIT`: the slot the realtime side writes, and therefore the
//!   slot readers must stay out of
//! - `BUSY_BIT`: a publish is in progress
//! - `NEWDATA_BIT`: a publish landed that no reader has consumed yet
//!
//! Packing all three into one word makes the reader's slot flip and its
//! "not currently publishing" check a single linearizable step; with
//! separate atomics there would be a window where the writer commits into
//! the slot a reader is about to pick up.
//!
//! # Real-Time Safety
//!
//! [`RealtimeWriter::write`] touches no atomics at all; dropping its guard
//! publishes with one `fetch_or`, one copy of `T`, and one store, which is
//! wait-free and allocation-free as long as `T::clone` is (keep `T` a plain
//! data struct). [`NonRealtimeReader`] locks a mutex and may spin for the
//! duration of one publish; keep it off the audio thread.
//!
//! # Example
//!
//! ```
//! use rtshare::RealtimeMutatable;
//!
//! let (mut dsp, ui) = RealtimeMutatable::new(0u64).split();
//!
//! {
//!     let mut pos = dsp.write();
//!     *pos += 512;
//! } // published here
//!
//! assert_eq!(*ui.read(), 512);
//! ```

use std::cell::UnsafeCell;
use std::hint;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

/// Slot the realtime side writes into next (readers use the other one).
const INDEX_BIT: u32 = 1 << 0;
/// Set while the realtime side is mid-publish.
const BUSY_BIT: u32 = 1 << 1;
/// Set when a publish landed that no reader has consumed yet.
const NEWDATA_BIT: u32 = 1 << 2;

struct Shared<T> {
    control: AtomicU32,
    data: [UnsafeCell<T>; 2],
    /// Serializes non-realtime readers.
    lock: Mutex<()>,
}

// SAFETY: the realtime thread writes `data[INDEX_BIT]` while readers hold a
// reference into the other slot (T: Sync); slot values are written from the
// realtime thread and dropped wherever the last handle drops (T: Send).
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send + Sync> Sync for Shared<T> {}

/// A value mutated by one realtime thread and read by non-realtime threads.
///
/// Created with [`new`](RealtimeMutatable::new) and then
/// [`split`](RealtimeMutatable::split) into a [`RealtimeWriter`] for the
/// audio thread and a cloneable [`NonRealtimeReader`] for everyone else.
pub struct RealtimeMutatable<T> {
    shared: Shared<T>,
    scratch: T,
}

impl<T: Clone> RealtimeMutatable<T> {
    /// Create with an initial value, visible to readers immediately.
    pub fn new(value: T) -> Self {
        Self {
            shared: Shared {
                control: AtomicU32::new(0),
                data: [UnsafeCell::new(value.clone()), UnsafeCell::new(value.clone())],
                lock: Mutex::new(()),
            },
            scratch: value,
        }
    }

    /// Split into the realtime and non-realtime handles.
    ///
    /// The writer is unique and not cloneable: exactly one thread publishes.
    /// The reader can be cloned freely; readers serialize on an internal
    /// mutex but never wait on the writer.
    pub fn split(self) -> (RealtimeWriter<T>, NonRealtimeReader<T>) {
        let shared = Arc::new(self.shared);
        (
            RealtimeWriter {
                shared: Arc::clone(&shared),
                scratch: self.scratch,
            },
            NonRealtimeReader { shared },
        )
    }
}

impl<T: Clone + Default> Default for RealtimeMutatable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Realtime-side handle owning the private scratch copy of the value.
///
/// Not cloneable; writes take `&mut self` so only one write can be
/// outstanding at a time.
pub struct RealtimeWriter<T: Clone> {
    shared: Arc<Shared<T>>,
    scratch: T,
}

impl<T: Clone> RealtimeWriter<T> {
    /// Mutate the value for the duration of the guard.
    ///
    /// Acquiring costs nothing (the scratch copy is private to this
    /// handle); dropping the guard publishes it to readers with one
    /// `fetch_or`, one copy of `T`, and one release store. Edits persist in
    /// the scratch copy across writes.
    #[inline]
    pub fn write(&mut self) -> RealtimeWriteGuard<'_, T> {
        RealtimeWriteGuard { writer: self }
    }

    /// Replace the value and publish it.
    #[inline]
    pub fn set(&mut self, value: T) {
        *self.write() = value;
    }
}

/// Scoped realtime access to the scratch copy; publishes on drop.
pub struct RealtimeWriteGuard<'a, T: Clone> {
    writer: &'a mut RealtimeWriter<T>,
}

impl<T: Clone> Deref for RealtimeWriteGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.writer.scratch
    }
}

impl<T: Clone> DerefMut for RealtimeWriteGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.writer.scratch
    }
}

impl<T: Clone> Drop for RealtimeWriteGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        let shared = &*self.writer.shared;
        // Mark the publish in progress and learn which slot is ours. While
        // BUSY_BIT is set the reader-side flip cannot succeed.
        let idx = (shared.control.fetch_or(BUSY_BIT, Ordering::Acquire) & INDEX_BIT) as usize;
        // SAFETY: readers only ever hold the slot *not* designated by
        // INDEX_BIT, and the index cannot flip while BUSY_BIT is set.
        unsafe { (*shared.data[idx].get()).clone_from(&self.writer.scratch) };
        // Clears BUSY_BIT, keeps the index, announces fresh data.
        shared
            .control
            .store(idx as u32 | NEWDATA_BIT, Ordering::Release);
    }
}

/// Non-realtime handle: take a consistent snapshot of the latest publish.
///
/// Cloneable; any number of reader threads may hold one.
pub struct NonRealtimeReader<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for NonRealtimeReader<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> NonRealtimeReader<T> {
    /// Acquire the most recently published value for the duration of the
    /// guard.
    ///
    /// Takes the reader lock. If a fresh publish landed, flips the double
    /// buffer over to it first; the flip spins only while a publish is in
    /// flight, which is bounded by one copy of `T`.
    pub fn read(&self) -> NonRealtimeReadGuard<'_, T> {
        let lock = self.shared.lock.lock();
        let mut control = self.shared.control.load(Ordering::Acquire);
        if control & NEWDATA_BIT != 0 {
            loop {
                // The expected value must have BUSY_BIT clear: the flip may
                // not overlap a publish into the slot we are about to leave
                // to the writer.
                let expected = control & !BUSY_BIT;
                let desired = (expected ^ INDEX_BIT) & INDEX_BIT;
                match self.shared.control.compare_exchange_weak(
                    expected,
                    desired,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        control = desired;
                        break;
                    }
                    Err(actual) => {
                        control = actual;
                        hint::spin_loop();
                    }
                }
            }
            trace!("flipped to freshly published slot");
        }
        let slot = ((control & INDEX_BIT) ^ INDEX_BIT) as usize;
        // SAFETY: the realtime side writes only the slot designated by
        // INDEX_BIT, and the index cannot flip again until this guard
        // releases the reader lock.
        let value = unsafe { &*self.shared.data[slot].get() };
        NonRealtimeReadGuard { value, _lock: lock }
    }

    /// Clone the most recently published value out.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.read().clone()
    }
}

/// Scoped non-realtime access to the latest published value.
///
/// Dropping the guard releases the reader lock.
pub struct NonRealtimeReadGuard<'a, T> {
    value: &'a T,
    _lock: MutexGuard<'a, ()>,
}

impl<T> Deref for NonRealtimeReadGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        self.value
    }
}
