//! Hazard-pointer reclamation registry (component B).
//!
//! One `HazardDomain<N, K>` backs exactly one container. `K` is the number
//! of hazard slots a single thread needs in this domain ("hazard width"):
//! `2` for the linked set and hash set (current node + predecessor), and
//! `2 * MAX_LEVELS` for the skip list (current node + predecessor per
//! level). Generalizing the teacher's single fixed-width hazard array
//! (`stacc_lockfree_hp.rs`'s `hazard_pointers: [AtomicPtr<Node<T>>; MAX_THREADS]`)
//! into a const-generic width is what lets all three containers share one
//! implementation of `scan`/`retire`/`setdown`.
//!
//! Every operation is addressed by an explicit `tid: usize`, supplied by the
//! caller (see the crate root for why thread-identity allocation is treated
//! as an external collaborator). The one safety contract this module relies
//! on, and cannot check: **a given `tid` is only ever used concurrently by
//! the thread that owns it.** That is the same assumption the teacher's
//! `LockFreeStacc::thread_number` makes about its own handle.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicIsize, AtomicPtr, Ordering};

struct ThreadState<N> {
    retired: Vec<*mut N>,
}

impl<N> ThreadState<N> {
    fn new() -> Self {
        Self {
            retired: Vec::new(),
        }
    }
}

pub(crate) struct HazardDomain<N, const K: usize> {
    hazards: Box<[[AtomicPtr<N>; K]]>,
    /* Per-thread retired lists. Only the owning tid's thread ever touches
     * its own slot; other threads only read `hazards` during a scan. See
     * the module doc for the contract this relies on. */
    retired: Box<[UnsafeCell<ThreadState<N>>]>,
    threshold: usize,
    /* Allocations minus frees; diagnostic only (§8 invariant 5). */
    live_nodes: AtomicIsize,
}

/* SAFETY: `hazards` is only ever accessed through `AtomicPtr`. `retired`'s
 * `UnsafeCell`s are each touched by exactly one tid, per the module
 * contract; the domain itself performs no unsynchronized cross-tid access
 * other than the read-only scan over `hazards`. */
unsafe impl<N, const K: usize> Sync for HazardDomain<N, K> {}
unsafe impl<N, const K: usize> Send for HazardDomain<N, K> {}

impl<N, const K: usize> HazardDomain<N, K> {
    pub(crate) fn new(max_threads: usize) -> Self {
        let hazards = (0..max_threads)
            .map(|_| std::array::from_fn(|_| AtomicPtr::new(std::ptr::null_mut())))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let retired = (0..max_threads)
            .map(|_| UnsafeCell::new(ThreadState::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            hazards,
            retired,
            /* R = count_of_hazards + 2; the table is sized eagerly, so
             * count_of_hazards is fixed at max_threads * K up front rather
             * than growing as threads lazily join. */
            threshold: max_threads * K + 2,
            live_nodes: AtomicIsize::new(0),
        }
    }

    pub(crate) fn max_threads(&self) -> usize {
        self.hazards.len()
    }

    /// Publishes `ptr` into hazard slot `idx` of thread `tid`.
    pub(crate) fn publish(&self, tid: usize, idx: usize, ptr: *mut N) {
        self.hazards[tid][idx].store(ptr, Ordering::SeqCst);
    }

    /// Clears hazard slot `idx` of thread `tid`.
    pub(crate) fn clear(&self, tid: usize, idx: usize) {
        self.hazards[tid][idx].store(std::ptr::null_mut(), Ordering::Release);
    }

    /// Clears every hazard slot owned by thread `tid`.
    pub(crate) fn clear_all(&self, tid: usize) {
        for slot in self.hazards[tid].iter() {
            slot.store(std::ptr::null_mut(), Ordering::Release);
        }
    }

    pub(crate) fn note_alloc(&self) {
        self.live_nodes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn live_nodes(&self) -> isize {
        self.live_nodes.load(Ordering::Relaxed)
    }

    /// Appends `ptr` to thread `tid`'s retired list, running `scan` once the
    /// list grows past the threshold.
    ///
    /// # Safety
    /// `ptr` must be a live `Box<N>`-allocated pointer that has just been
    /// physically unlinked from the container (no live reference to it
    /// remains except through hazard pointers), and `tid` must be the
    /// calling thread's own identifier.
    pub(crate) unsafe fn retire(&self, tid: usize, ptr: *mut N) {
        let state = &mut *self.retired[tid].get();
        state.retired.push(ptr);
        if state.retired.len() >= self.threshold {
            self.scan(tid);
        }
    }

    /// Frees every retired node of thread `tid` not currently named by any
    /// thread's hazard pointer.
    ///
    /// # Safety
    /// `tid` must be the calling thread's own identifier.
    pub(crate) unsafe fn scan(&self, tid: usize) {
        let mut protected: Vec<*mut N> = self
            .hazards
            .iter()
            .flat_map(|slots| slots.iter())
            .map(|slot| slot.load(Ordering::SeqCst))
            .filter(|p| !p.is_null())
            .collect();
        protected.sort_unstable();

        let state = &mut *self.retired[tid].get();
        let mut kept = Vec::with_capacity(state.retired.len());
        for ptr in state.retired.drain(..) {
            if protected.binary_search(&ptr).is_ok() {
                kept.push(ptr);
            } else {
                drop(Box::from_raw(ptr));
                self.live_nodes.fetch_sub(1, Ordering::Relaxed);
            }
        }
        state.retired = kept;
    }

    /// Tears the domain down: frees every still-retired node across every
    /// thread. Must run only once nothing else can observe the domain,
    /// mirroring the teacher's `Shared::drop` walking
    /// `boxes_that_are_still_hazard`.
    pub(crate) fn setdown(&mut self) {
        for cell in self.retired.iter_mut() {
            let state = cell.get_mut();
            for ptr in state.retired.drain(..) {
                unsafe { drop(Box::from_raw(ptr)) };
                self.live_nodes.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }
}

impl<N, const K: usize> Drop for HazardDomain<N, K> {
    fn drop(&mut self) {
        self.setdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hazard_protects_retired_node() {
        let domain: HazardDomain<u32, 2> = HazardDomain::new(4);
        let boxed = Box::new(7u32);
        domain.note_alloc();
        let raw = Box::into_raw(boxed);

        domain.publish(1, 0, raw);
        unsafe { domain.retire(0, raw) };
        unsafe { domain.scan(0) };
        assert_eq!(domain.live_nodes(), 1, "protected node must survive scan");

        domain.clear(1, 0);
        unsafe { domain.scan(0) };
        assert_eq!(domain.live_nodes(), 0, "unprotected node must be freed");
    }

    #[test]
    fn threshold_triggers_automatic_scan() {
        let domain: HazardDomain<u32, 2> = HazardDomain::new(2);
        for _ in 0..10 {
            domain.note_alloc();
            let raw = Box::into_raw(Box::new(0u32));
            unsafe { domain.retire(0, raw) };
        }
        assert!(domain.live_nodes() < 10, "scan should have reclaimed unprotected nodes");
    }
}
