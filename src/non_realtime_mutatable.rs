// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A shared value the realtime thread reads and other threads mutate.
//!
//! The classic use is a set of filter coefficients: the audio callback reads
//! them every block, while the UI thread occasionally installs a new set.
//! Realtime reads are wait-free (one atomic exchange to acquire, one atomic
//! store to release); writers pay for everything else: they clone the
//! current value under a mutex, mutate the clone, and publish it with a
//! compare-and-swap that retries only while the realtime side is inside a
//! read.
//!
//! The published value lives in a heap cell tracked by an atomic pointer.
//! A null pointer encodes "the realtime thread currently holds the cell";
//! swapping null in *is* the realtime acquire. This encoding is what makes
//! the fast path a single atomic instruction, so writers spin on it instead
//! of a flag of their own.
//!
//! # Real-Time Safety
//!
//! [`RealtimeReader::read`] and dropping the guard it returns are wait-free
//! and never allocate. Everything on [`NonRealtimeWriter`] locks, allocates,
//! and may spin for the duration of one realtime read; keep it off the
//! audio thread.
//!
//! # Example
//!
//! ```
//! use rtshare::NonRealtimeMutatable;
//!
//! let (mut dsp, ui) = NonRealtimeMutatable::new(440.0f32).split();
//!
//! {
//!     let mut freq = ui.write();
//!     *freq = 880.0;
//! } // published here
//!
//! assert_eq!(*dsp.read(), 880.0);
//! ```

use std::hint;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

/// State only ever touched with the writer mutex held.
struct Slow<T> {
    /// Owning pointer to the published cell. Stays valid while the atomic
    /// pointer is null, which is how writers clone the value out from under
    /// an in-progress realtime read.
    live: *mut T,
}

struct Shared<T> {
    /// Points at the published cell, or null while the realtime thread is
    /// inside an access.
    pointer: AtomicPtr<T>,
    slow: Mutex<Slow<T>>,
}

// SAFETY: the cell's T may be dropped or replaced from any writer thread
// (T: Send) and is read concurrently by the realtime thread and cloning
// writers (T: Sync). The raw pointers only ever refer to the heap cell the
// struct owns.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send + Sync> Sync for Shared<T> {}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        // Guards borrow their handle, so no thread can still be inside an
        // access here. The atomic may be stuck at null if a realtime guard
        // was leaked with mem::forget; `live` owns the cell either way.
        let live = self.slow.get_mut().live;
        // SAFETY: `live` came from Box::into_raw and this struct is its
        // sole owner once no handles remain.
        drop(unsafe { Box::from_raw(live) });
    }
}

/// A value mutated by non-realtime threads and read wait-free by one
/// realtime thread.
///
/// Created with [`new`](NonRealtimeMutatable::new) and then
/// [`split`](NonRealtimeMutatable::split) into a [`RealtimeReader`] for the
/// audio thread and a cloneable [`NonRealtimeWriter`] for everyone else.
pub struct NonRealtimeMutatable<T> {
    shared: Shared<T>,
}

impl<T> NonRealtimeMutatable<T> {
    /// Create with an initial published value.
    pub fn new(value: T) -> Self {
        let live = Box::into_raw(Box::new(value));
        Self {
            shared: Shared {
                pointer: AtomicPtr::new(live),
                slow: Mutex::new(Slow { live }),
            },
        }
    }

    /// Split into the realtime and non-realtime handles.
    ///
    /// The reader is unique and not cloneable: exactly one thread gets
    /// wait-free access. The writer can be cloned freely; writers serialize
    /// on an internal mutex.
    pub fn split(self) -> (RealtimeReader<T>, NonRealtimeWriter<T>) {
        let shared = Arc::new(self.shared);
        (
            RealtimeReader {
                shared: Arc::clone(&shared),
            },
            NonRealtimeWriter { shared },
        )
    }
}

impl<T: Default> Default for NonRealtimeMutatable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Realtime-side handle. Not cloneable; reads take `&mut self` so only one
/// read can be outstanding at a time.
pub struct RealtimeReader<T> {
    shared: Arc<Shared<T>>,
}

impl<T> RealtimeReader<T> {
    /// Acquire the published value for the duration of the guard.
    ///
    /// Wait-free: one atomic exchange here, one atomic store when the guard
    /// drops. The reference is stable even if writers publish in the
    /// meantime; the next `read` observes the latest published value.
    ///
    /// # Panics
    ///
    /// Panics if a previous guard was leaked with `mem::forget`, leaving
    /// the cell marked as held.
    #[inline]
    pub fn read(&mut self) -> RealtimeReadGuard<'_, T> {
        let obj = self.shared.pointer.swap(ptr::null_mut(), Ordering::AcqRel);
        // Never fabricate a reference from the held sentinel.
        assert!(!obj.is_null(), "realtime read while a previous read guard is still outstanding");
        RealtimeReadGuard {
            pointer: &self.shared.pointer,
            obj,
        }
    }
}

/// Scoped realtime access to the published value.
///
/// Dropping the guard releases the cell back to the writers. The guard is
/// not `Send`: it must be released on the thread that acquired it.
pub struct RealtimeReadGuard<'a, T> {
    pointer: &'a AtomicPtr<T>,
    obj: *mut T,
}

impl<T> Deref for RealtimeReadGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: `obj` is the non-null cell swapped out in `read`. While
        // the atomic pointer is null, writers clone from the cell but never
        // mutate or free it.
        unsafe { &*self.obj }
    }
}

impl<T> Drop for RealtimeReadGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        debug_assert!(self.pointer.load(Ordering::Relaxed).is_null());
        self.pointer.store(self.obj, Ordering::Release);
    }
}

/// Non-realtime handle: clone the current value, mutate, publish.
///
/// Cloneable; any number of writer threads may hold one. Writers are
/// serialized by a mutex, and their publish step spins only while the
/// realtime side is inside a read.
pub struct NonRealtimeWriter<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for NonRealtimeWriter<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone> NonRealtimeWriter<T> {
    /// Start an edit of the published value.
    ///
    /// Takes the writer lock and clones the currently-published value into
    /// a staging cell; the guard dereferences to the clone. Dropping the
    /// guard publishes it atomically, on every exit path.
    pub fn write(&self) -> NonRealtimeWriteGuard<'_, T> {
        let slow = self.shared.slow.lock();
        // SAFETY: `live` is valid while we hold the writer lock, even if
        // the realtime side is mid-read; it only ever reads the cell.
        let staged = unsafe { (*slow.live).clone() };
        NonRealtimeWriteGuard {
            pointer: &self.shared.pointer,
            slow,
            staged: ManuallyDrop::new(Box::new(staged)),
        }
    }
}

impl<T> NonRealtimeWriter<T> {
    /// Publish `value`, replacing the current one without cloning it first.
    pub fn replace(&self, value: T) {
        let mut slow = self.shared.slow.lock();
        publish(&self.shared.pointer, &mut slow, Box::new(value));
    }
}

/// Scoped non-realtime access to a staged clone of the value.
///
/// Mutate through the guard; the result is published atomically when the
/// guard drops.
pub struct NonRealtimeWriteGuard<'a, T> {
    pointer: &'a AtomicPtr<T>,
    slow: MutexGuard<'a, Slow<T>>,
    staged: ManuallyDrop<Box<T>>,
}

impl<T> Deref for NonRealtimeWriteGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.staged
    }
}

impl<T> DerefMut for NonRealtimeWriteGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.staged
    }
}

impl<T> Drop for NonRealtimeWriteGuard<'_, T> {
    fn drop(&mut self) {
        // SAFETY: Drop runs once and `staged` is not touched afterwards.
        let staged = unsafe { ManuallyDrop::take(&mut self.staged) };
        publish(self.pointer, &mut self.slow, staged);
    }
}

/// Swap `staged` in as the published cell and free the old one.
///
/// Spins only while the realtime side is inside a read, which is bounded by
/// one callback's critical section.
fn publish<T>(pointer: &AtomicPtr<T>, slow: &mut Slow<T>, staged: Box<T>) {
    let staged = Box::into_raw(staged);
    let old = slow.live;
    // The expected value is the owning pointer: the only other state the
    // atomic can be in is null (realtime side mid-read), since competing
    // writers are excluded by the lock we hold.
    while pointer
        .compare_exchange(old, staged, Ordering::AcqRel, Ordering::Relaxed)
        .is_err()
    {
        hint::spin_loop();
    }
    slow.live = staged;
    trace!("published staged value");
    // SAFETY: the exchange succeeded, so the realtime side was not inside a
    // read and the old cell is unreachable from here on. Freeing it here
    // keeps T's destructor off the realtime thread.
    drop(unsafe { Box::from_raw(old) });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    #[derive(Clone, Copy, Debug, PartialEq)]
    struct Coeffs {
        b0: f32,
        b1: f32,
        b2: f32,
        a1: f32,
        a2: f32,
    }

    impl Coeffs {
        fn splat(v: f32) -> Self {
            Self {
                b0: v,
                b1: v,
                b2: v,
                a1: v,
                a2: v,
            }
        }
    }

    #[test]
    fn test_construct_and_drop() {
        drop(NonRealtimeMutatable::new(Coeffs::splat(1.0)));

        let (rt, ui) = NonRealtimeMutatable::new(String::from("state")).split();
        drop(ui);
        drop(rt);
    }

    #[test]
    fn test_initial_value() {
        let (mut rt, _ui) = NonRealtimeMutatable::new(Coeffs::splat(1.0)).split();
        assert_eq!(*rt.read(), Coeffs::splat(1.0));
    }

    #[test]
    fn test_write_guard_publishes_on_drop() {
        let (mut rt, ui) = NonRealtimeMutatable::new(Coeffs::splat(1.0)).split();

        {
            let mut coeffs = ui.write();
            coeffs.b0 = 0.5;
            coeffs.b1 = 0.5;
        }

        let seen = rt.read();
        assert_eq!(seen.b0, 0.5);
        assert_eq!(seen.b1, 0.5);
        assert_eq!(seen.b2, 1.0);
    }

    #[test]
    fn test_replace() {
        let (mut rt, ui) = NonRealtimeMutatable::new(Coeffs::splat(1.0)).split();
        ui.replace(Coeffs::splat(0.25));
        assert_eq!(*rt.read(), Coeffs::splat(0.25));
    }

    #[test]
    fn test_edits_accumulate_across_writes() {
        let (mut rt, ui) = NonRealtimeMutatable::new(2.0f64).split();
        *ui.write() *= 2.0;
        *ui.write() *= 2.0;
        assert_eq!(*rt.read(), 8.0);
    }

    #[test]
    fn test_cloned_writer_handles_share_the_cell() {
        let (mut rt, ui) = NonRealtimeMutatable::new(1u32).split();
        let ui2 = ui.clone();
        ui2.replace(7);
        assert_eq!(*rt.read(), 7);
        ui.replace(9);
        assert_eq!(*rt.read(), 9);
    }

    #[test]
    fn test_read_is_stable_across_publish() {
        let (mut rt, ui) = NonRealtimeMutatable::new(1u32).split();
        let guard = rt.read();
        ui.replace(2);
        // The outstanding read still sees the value it acquired.
        assert_eq!(*guard, 1);
        drop(guard);
        assert_eq!(*rt.read(), 2);
    }

    #[test]
    fn test_publish_waits_for_realtime_release() {
        let (mut rt, ui) = NonRealtimeMutatable::new(1u32).split();
        let published = Arc::new(AtomicBool::new(false));

        let guard = rt.read();
        let writer = {
            let published = Arc::clone(&published);
            thread::spawn(move || {
                ui.replace(2);
                published.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(
            !published.load(Ordering::SeqCst),
            "publish completed while the realtime side held the cell"
        );

        drop(guard);
        writer.join().unwrap();
        assert!(published.load(Ordering::SeqCst));
        assert_eq!(*rt.read(), 2);
    }

    #[test]
    fn test_concurrent_replace_never_tears() {
        let (mut rt, ui) = NonRealtimeMutatable::new(Coeffs::splat(0.0)).split();
        let done = Arc::new(AtomicBool::new(false));

        let reader = {
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    let c = *rt.read();
                    assert!(
                        c.b0 == c.b1 && c.b1 == c.b2 && c.b2 == c.a1 && c.a1 == c.a2,
                        "torn read: {:?}",
                        c
                    );
                }
            })
        };

        let writers: Vec<_> = (1..=4)
            .map(|w| {
                let ui = ui.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        ui.replace(Coeffs::splat((w * 1000 + i) as f32));
                    }
                })
            })
            .collect();

        for w in writers {
            w.join().unwrap();
        }
        done.store(true, Ordering::Relaxed);
        reader.join().unwrap();
    }

    #[test]
    #[should_panic(expected = "still outstanding")]
    fn test_leaked_guard_panics_on_next_read() {
        let (mut rt, _ui) = NonRealtimeMutatable::new(0u8).split();
        std::mem::forget(rt.read());
        let _ = rt.read();
    }
}
