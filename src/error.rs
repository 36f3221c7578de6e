// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error types shared by the queue primitives.

use std::fmt;
use thiserror::Error;

/// Returned by a push onto a full queue.
///
/// Carries the rejected element back to the caller so nothing is dropped
/// silently; the caller decides whether to retry later or discard it.
#[derive(Error, Clone, Copy, PartialEq, Eq)]
#[error("queue is full")]
pub struct PushError<T>(pub T);

impl<T> PushError<T> {
    /// Recover the element that did not fit.
    pub fn into_inner(self) -> T {
        self.0
    }
}

// Manual impl so the element type does not need to be Debug.
impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PushError(..)")
    }
}
