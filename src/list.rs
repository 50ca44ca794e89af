//! Harris–Michael lock-free ordered list engine (component C).
//!
//! A single list implementation backs both the standalone ordered set
//! (`linked_set.rs`) and, anchored at a bucket's own sentinel instead of the
//! list head, the hash set's per-bucket scans (`hash_set.rs`). Anchoring
//! `find_from` at an arbitrary live node — rather than always starting from
//! the global head — is what gives the hash set's bucket operations cost
//! proportional to bucket size instead of table size; it mirrors
//! `original_source/src/linked_list.c`'s `ll_find(&bucket->bucket_sentinel, ...)`
//! calling convention.
//!
//! Grounded on `original_source/src/linked_list.c` (`ll_find`, `ll_insert`,
//! `ll_delete`) for the traversal/validation/restart shape, and on
//! `stacc_lockfree_hp.rs` for the raw-pointer/`AtomicPtr`/`Box::into_raw`
//! coding style this crate uses throughout.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::Ordering;

use crate::hazard::HazardDomain;
use crate::tagged::{cas, has_mark, mark, strip};

const HP_CURR: usize = 0;
const HP_PRED: usize = 1;

/// A node's key, with an explicit "negative infinity" variant for the head
/// sentinel so the comparator never needs a magic minimum value.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum NodeKey<K> {
    NegInf,
    Key(K),
}

impl<K: Ord> PartialOrd for NodeKey<K> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord> Ord for NodeKey<K> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        match (self, other) {
            (NodeKey::NegInf, NodeKey::NegInf) => CmpOrdering::Equal,
            (NodeKey::NegInf, _) => CmpOrdering::Less,
            (_, NodeKey::NegInf) => CmpOrdering::Greater,
            (NodeKey::Key(a), NodeKey::Key(b)) => a.cmp(b),
        }
    }
}

pub(crate) struct LLNode<K> {
    pub(crate) key: NodeKey<K>,
    next: std::sync::atomic::AtomicPtr<LLNode<K>>,
}

impl<K> LLNode<K> {
    pub(crate) fn new(key: NodeKey<K>, next: *mut LLNode<K>) -> Self {
        Self {
            key,
            next: std::sync::atomic::AtomicPtr::new(next),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Duplicate;
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Absent;

/// The shared list core. `K` is the key type ordered by `Ord`; `head` is a
/// permanent `NegInf`-keyed sentinel allocated once in `new` and freed only
/// in `Drop`.
pub(crate) struct ListCore<K> {
    pub(crate) head: *mut LLNode<K>,
    pub(crate) domain: HazardDomain<LLNode<K>, 2>,
}

/* SAFETY: every raw pointer this module touches is either the permanent
 * head sentinel or a node reachable only through atomic loads validated
 * against concurrent mutation; cross-thread sharing is the whole point. */
unsafe impl<K: Send> Send for ListCore<K> {}
unsafe impl<K: Send> Sync for ListCore<K> {}

impl<K: Ord + Copy> ListCore<K> {
    pub(crate) fn new(max_threads: usize) -> Self {
        let head = Box::into_raw(Box::new(LLNode::new(
            NodeKey::NegInf,
            std::ptr::null_mut(),
        )));
        Self {
            head,
            domain: HazardDomain::new(max_threads),
        }
    }

    /// Harris–Michael `find`, generalized to start from an arbitrary live
    /// anchor node instead of always the list head. Returns the first pair
    /// `(pred, curr)` such that `pred.key < key <= curr.key`, assisting any
    /// marked nodes it passes by physically unlinking them.
    pub(crate) fn find_from(
        &self,
        anchor: *mut LLNode<K>,
        tid: usize,
        key: NodeKey<K>,
    ) -> (*mut LLNode<K>, *mut LLNode<K>) {
        'restart: loop {
            let mut pred = anchor;
            self.domain.publish(tid, HP_PRED, pred);
            let mut curr = strip(unsafe { (*pred).next.load(Ordering::Acquire) });

            loop {
                self.domain.publish(tid, HP_CURR, curr);
                /* validate pred -> curr is still the unmarked edge we think it is */
                let pred_next = unsafe { (*pred).next.load(Ordering::Acquire) };
                if has_mark(pred_next) || strip(pred_next) != curr {
                    continue 'restart;
                }

                if curr.is_null() {
                    return (pred, curr);
                }

                let next = unsafe { (*curr).next.load(Ordering::Acquire) };
                if has_mark(next) {
                    let stripped_next = strip(next);
                    match cas(unsafe { &(*pred).next }, curr, stripped_next) {
                        Ok(_) => {
                            self.domain.publish(tid, HP_CURR, stripped_next);
                            unsafe { self.domain.retire(tid, curr) };
                            curr = stripped_next;
                            continue;
                        }
                        Err(_) => continue 'restart,
                    }
                }

                if unsafe { (*curr).key } >= key {
                    return (pred, curr);
                }

                pred = curr;
                self.domain.publish(tid, HP_PRED, pred);
                curr = strip(next);
            }
        }
    }

    pub(crate) fn find(&self, tid: usize, key: NodeKey<K>) -> (*mut LLNode<K>, *mut LLNode<K>) {
        self.find_from(self.head, tid, key)
    }

    /// Allocates a new node for `key` and links it in, anchored at `anchor`.
    pub(crate) fn insert_from(
        &self,
        anchor: *mut LLNode<K>,
        tid: usize,
        key: K,
    ) -> Result<*mut LLNode<K>, Duplicate> {
        loop {
            let (pred, curr) = self.find_from(anchor, tid, NodeKey::Key(key));
            if curr_key_eq(curr, key) {
                self.domain.clear_all(tid);
                return Err(Duplicate);
            }
            let node = Box::into_raw(Box::new(LLNode::new(NodeKey::Key(key), curr)));
            match cas(unsafe { &(*pred).next }, curr, node) {
                Ok(_) => {
                    self.domain.note_alloc();
                    self.domain.clear_all(tid);
                    return Ok(node);
                }
                Err(_) => {
                    unsafe { drop(Box::from_raw(node)) };
                }
            }
        }
    }

    pub(crate) fn insert(&self, tid: usize, key: K) -> Result<(), Duplicate> {
        self.insert_from(self.head, tid, key).map(|_| ())
    }

    /// Splices in a caller-supplied node rather than allocating one.
    ///
    /// On a duplicate the candidate node is handed back to the caller
    /// untouched ("the loser frees its own candidate" — this engine never
    /// frees a node it did not allocate itself).
    pub(crate) fn insert_ready_made(
        &self,
        anchor: *mut LLNode<K>,
        tid: usize,
        node: *mut LLNode<K>,
    ) -> Result<(), *mut LLNode<K>> {
        let key = match unsafe { (*node).key } {
            NodeKey::Key(k) => k,
            NodeKey::NegInf => unreachable!("only NegInf head nodes use that key"),
        };
        loop {
            let (pred, curr) = self.find_from(anchor, tid, NodeKey::Key(key));
            if curr_key_eq(curr, key) {
                self.domain.clear_all(tid);
                return Err(node);
            }
            unsafe { (*node).next.store(curr, Ordering::Relaxed) };
            match cas(unsafe { &(*pred).next }, curr, node) {
                Ok(_) => {
                    self.domain.clear_all(tid);
                    return Ok(());
                }
                Err(_) => continue,
            }
        }
    }

    pub(crate) fn remove_from(&self, anchor: *mut LLNode<K>, tid: usize, key: K) -> Result<(), Absent> {
        loop {
            let (pred, curr) = self.find_from(anchor, tid, NodeKey::Key(key));
            if !curr_key_eq(curr, key) {
                self.domain.clear_all(tid);
                return Err(Absent);
            }
            let next = unsafe { (*curr).next.load(Ordering::Acquire) };
            if has_mark(next) {
                continue;
            }
            let marked = mark(next);
            /* the successful mark CAS is the linearization point of removal */
            match cas(unsafe { &(*curr).next }, next, marked) {
                Ok(_) => {
                    /* assist physical unlinking; ignore the result, a concurrent
                     * find will do it if we lose the race */
                    let _ = self.find_from(anchor, tid, NodeKey::Key(key));
                    self.domain.clear_all(tid);
                    return Ok(());
                }
                Err(_) => continue,
            }
        }
    }

    pub(crate) fn remove(&self, tid: usize, key: K) -> Result<(), Absent> {
        self.remove_from(self.head, tid, key)
    }

    pub(crate) fn contains_from(&self, anchor: *mut LLNode<K>, tid: usize, key: K) -> bool {
        let (_, curr) = self.find_from(anchor, tid, NodeKey::Key(key));
        let found = curr_key_eq(curr, key);
        self.domain.clear_all(tid);
        found
    }

    pub(crate) fn contains(&self, tid: usize, key: K) -> bool {
        self.contains_from(self.head, tid, key)
    }
}

fn curr_key_eq<K: Ord>(curr: *mut LLNode<K>, key: K) -> bool {
    !curr.is_null() && unsafe { (*curr).key == NodeKey::Key(key) }
}

impl<K> Drop for ListCore<K> {
    fn drop(&mut self) {
        let mut curr = self.head;
        while !curr.is_null() {
            let boxed = unsafe { Box::from_raw(curr) };
            let next = strip(boxed.next.load(Ordering::Relaxed));
            drop(boxed);
            curr = next;
        }
    }
}
