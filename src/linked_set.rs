//! Public ordered integer set (component C, public surface).
//!
//! `LinkedSet` is a cloneable handle over a `ListCore`, in the same shape as
//! the teacher's `LockFreeStacc<T>`: state lives behind one `Arc`, `Clone`
//! hands out another reference to the same container, and `init`/`destroy`
//! from the language-neutral interface map onto `new`/`Drop` — the last
//! handle to go out of scope drops the `Arc`'s contents, which runs
//! `ListCore`'s `Drop` and, transitively, the hazard domain's `setdown`.

use std::sync::Arc;

use crate::list::{Absent, Duplicate, ListCore};

/// Error returned by [`LinkedSet::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertError {
    Duplicate,
}

/// Error returned by [`LinkedSet::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveError {
    Absent,
}

impl From<Duplicate> for InsertError {
    fn from(_: Duplicate) -> Self {
        InsertError::Duplicate
    }
}

impl From<Absent> for RemoveError {
    fn from(_: Absent) -> Self {
        RemoveError::Absent
    }
}

pub struct LinkedSet {
    inner: Arc<ListCore<i64>>,
}

impl LinkedSet {
    /// `init()`. `max_threads` bounds the distinct `tid` values any caller
    /// may pass to this set's operations.
    pub fn new(max_threads: usize) -> Self {
        Self {
            inner: Arc::new(ListCore::new(max_threads)),
        }
    }

    pub fn insert(&self, tid: usize, key: i64) -> Result<(), InsertError> {
        self.inner.insert(tid, key).map_err(Into::into)
    }

    pub fn remove(&self, tid: usize, key: i64) -> Result<(), RemoveError> {
        self.inner.remove(tid, key).map_err(Into::into)
    }

    pub fn contains(&self, tid: usize, key: i64) -> bool {
        self.inner.contains(tid, key)
    }

    /// Diagnostic-only live node count (§8 invariant 5); not linearizable
    /// with respect to concurrent mutators.
    pub fn live_nodes(&self) -> isize {
        self.inner.domain.live_nodes()
    }
}

impl Clone for LinkedSet {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
