//! Lock-free skip list over interval keys (component E).
//!
//! Grounded on `original_source/src/skiplist.c`: per-level mark-bit
//! unlinking, reference-counted multi-level node retirement, and the
//! `random_levels`/`high_water` bookkeeping. The hazard-pointer side reuses
//! `hazard.rs`'s `HazardDomain`, instantiated at hazard width
//! `2 * MAX_LEVELS` (two slots per level) instead of the teacher's
//! single-hazard-pair width — see `hazard.rs`'s module doc.

use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::hazard::HazardDomain;
use crate::tagged::{cas, has_mark, mark, strip};

pub const MAX_LEVELS: usize = 20;
const HP_K: usize = 2 * MAX_LEVELS;

/// A closed interval key `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: u64,
    pub end: u64,
}

impl Interval {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyCmp {
    Equal,
    Left,
    Right,
    OverlapError,
}

/// `key_cmp(a, b)`: classifies query interval `b` against the stored
/// interval `a`. `Equal` means `b` is contained in `a`; overlapping but
/// unequal intervals are an application error (`OverlapError`), not a
/// silent match.
pub(crate) fn key_cmp(a: Interval, b: Interval) -> KeyCmp {
    if b.end < a.start {
        KeyCmp::Left
    } else if b.start > a.end {
        KeyCmp::Right
    } else if a.start <= b.start && b.end <= a.end {
        KeyCmp::Equal
    } else {
        KeyCmp::OverlapError
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnlinkPolicy {
    AssistUnlink,
    DontUnlink,
    /// Reserved; no caller needs behavior distinct from `AssistUnlink`.
    ForceUnlink,
}

pub(crate) struct SlNode {
    /// `None` only for the head sentinel.
    key: Option<Interval>,
    next: Box<[AtomicPtr<SlNode>]>,
    refcount: AtomicUsize,
}

impl SlNode {
    fn level(&self) -> usize {
        self.next.len()
    }
}

fn hp_curr(level: usize) -> usize {
    level * 2
}
fn hp_pred(level: usize) -> usize {
    level * 2 + 1
}

struct SkipListInner {
    head: *mut SlNode,
    high_water: AtomicUsize,
    domain: HazardDomain<SlNode, HP_K>,
}

unsafe impl Send for SkipListInner {}
unsafe impl Sync for SkipListInner {}

impl SkipListInner {
    fn new(max_threads: usize) -> Self {
        let next = (0..MAX_LEVELS)
            .map(|_| AtomicPtr::new(std::ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let head = Box::into_raw(Box::new(SlNode {
            key: None,
            next,
            refcount: AtomicUsize::new(MAX_LEVELS),
        }));
        Self {
            head,
            high_water: AtomicUsize::new(1),
            domain: HazardDomain::new(max_threads),
        }
    }

    fn release_level(&self, tid: usize, node: *mut SlNode) {
        let prev = unsafe { (*node).refcount.fetch_sub(1, Ordering::AcqRel) };
        if prev == 1 {
            unsafe { self.domain.retire(tid, node) };
        }
    }

    /// Scans top-down from level `n - 1` to `0`, filling `preds`/`succs`
    /// (each of length `n`) with the predecessor/stop node at every level.
    fn find_preds(
        &self,
        preds: &mut [*mut SlNode],
        succs: &mut [*mut SlNode],
        n: usize,
        key: Interval,
        tid: usize,
        policy: UnlinkPolicy,
    ) {
        'restart: loop {
            let mut pred = self.head;
            for level in (0..n).rev() {
                self.domain.publish(tid, hp_pred(level), pred);
                let mut curr = strip(unsafe { (*pred).next[level].load(Ordering::Acquire) });

                loop {
                    self.domain.publish(tid, hp_curr(level), curr);
                    let pred_next = unsafe { (*pred).next[level].load(Ordering::Acquire) };
                    if has_mark(pred_next) || strip(pred_next) != curr {
                        continue 'restart;
                    }
                    if curr.is_null() {
                        break;
                    }

                    let next = unsafe { (*curr).next[level].load(Ordering::Acquire) };
                    if has_mark(next) {
                        match policy {
                            UnlinkPolicy::DontUnlink => {
                                curr = strip(next);
                                continue;
                            }
                            UnlinkPolicy::AssistUnlink | UnlinkPolicy::ForceUnlink => {
                                match cas(unsafe { &(*pred).next[level] }, curr, strip(next)) {
                                    Ok(_) => {
                                        self.release_level(tid, curr);
                                        curr = strip(next);
                                        continue;
                                    }
                                    Err(_) => continue 'restart,
                                }
                            }
                        }
                    }

                    let stop = match unsafe { (*curr).key } {
                        None => true,
                        Some(k) => !matches!(key_cmp(k, key), KeyCmp::Right),
                    };
                    if stop {
                        break;
                    }

                    pred = curr;
                    self.domain.publish(tid, hp_pred(level), pred);
                    curr = strip(next);
                }

                preds[level] = pred;
                succs[level] = curr;
            }
            return;
        }
    }

    /// Random level per `trailing_zeros` of a random machine word, bumping
    /// `high_water` by exactly one step at a time when the roll exceeds it
    /// (never jumping straight to the rolled value).
    fn random_level(&self) -> usize {
        let word: u64 = rand::random();
        let rolled = (word.trailing_zeros() as usize).max(1).min(MAX_LEVELS);
        loop {
            let hw = self.high_water.load(Ordering::Acquire);
            if rolled <= hw {
                return rolled;
            }
            let _ = self
                .high_water
                .compare_exchange(hw, hw + 1, Ordering::AcqRel, Ordering::Acquire);
        }
    }

    fn link_upper_levels(&self, tid: usize, node: *mut SlNode, level: usize, key: Interval) {
        let mut i = 1;
        while i < level {
            /* If the node has already been marked for removal at the bottom
             * level, there is no point racing to finish linking it at higher
             * levels: `remove` unconditionally marks every level of a node it
             * finds, whether or not that level was ever spliced in, so a
             * level we never link will never be discovered (and so never
             * physically unlinked) by any traversal. Release the refcount
             * share of every remaining, never-to-be-linked level right here
             * instead of leaking it. */
            if has_mark(unsafe { (*node).next[0].load(Ordering::Acquire) }) {
                let remaining = level - i;
                let prev = unsafe { (*node).refcount.fetch_sub(remaining, Ordering::AcqRel) };
                if prev == remaining {
                    unsafe { self.domain.retire(tid, node) };
                }
                return;
            }
            let hw = self.high_water.load(Ordering::Acquire).max(level);
            let mut preds = vec![std::ptr::null_mut(); hw];
            let mut succs = vec![std::ptr::null_mut(); hw];
            loop {
                self.find_preds(&mut preds, &mut succs, hw, key, tid, UnlinkPolicy::AssistUnlink);
                unsafe { (*node).next[i].store(succs[i], Ordering::Release) };
                match cas(unsafe { &(*preds[i]).next[i] }, succs[i], node) {
                    Ok(_) => break,
                    Err(_) => continue,
                }
            }
            i += 1;
        }
    }

    fn insert(&self, tid: usize, key: Interval) -> Result<(), InsertError> {
        loop {
            let hw = self.high_water.load(Ordering::Acquire);
            let mut preds = vec![std::ptr::null_mut(); hw];
            let mut succs = vec![std::ptr::null_mut(); hw];
            self.find_preds(&mut preds, &mut succs, hw, key, tid, UnlinkPolicy::AssistUnlink);

            if let Some(k) = unsafe { succs[0].as_ref().and_then(|n| n.key) } {
                match key_cmp(k, key) {
                    KeyCmp::Equal => {
                        self.domain.clear_all(tid);
                        return Err(InsertError::Duplicate);
                    }
                    KeyCmp::OverlapError => {
                        self.domain.clear_all(tid);
                        return Err(InsertError::Overlap);
                    }
                    KeyCmp::Left | KeyCmp::Right => {}
                }
            }

            let level = self.random_level();
            let next: Vec<AtomicPtr<SlNode>> = (0..level)
                .map(|i| AtomicPtr::new(if i < hw { succs[i] } else { std::ptr::null_mut() }))
                .collect();
            let node = Box::into_raw(Box::new(SlNode {
                key: Some(key),
                next: next.into_boxed_slice(),
                refcount: AtomicUsize::new(level),
            }));

            match cas(unsafe { &(*preds[0]).next[0] }, succs[0], node) {
                Ok(_) => {
                    self.domain.note_alloc();
                    self.link_upper_levels(tid, node, level, key);
                    self.domain.clear_all(tid);
                    return Ok(());
                }
                Err(_) => unsafe { drop(Box::from_raw(node)) },
            }
        }
    }

    fn remove(&self, tid: usize, key: Interval) -> Result<(), RemoveError> {
        let hw = self.high_water.load(Ordering::Acquire);
        let mut preds = vec![std::ptr::null_mut(); hw];
        let mut succs = vec![std::ptr::null_mut(); hw];
        self.find_preds(&mut preds, &mut succs, hw, key, tid, UnlinkPolicy::AssistUnlink);

        let node = succs[0];
        let found = match unsafe { node.as_ref().and_then(|n| n.key) } {
            Some(k) => matches!(key_cmp(k, key), KeyCmp::Equal),
            None => false,
        };
        if !found {
            self.domain.clear_all(tid);
            return Err(RemoveError::Absent);
        }

        let level = unsafe { (*node).level() };
        for i in (1..level).rev() {
            loop {
                let next = unsafe { (*node).next[i].load(Ordering::Acquire) };
                if has_mark(next) {
                    break;
                }
                match cas(unsafe { &(*node).next[i] }, next, mark(next)) {
                    Ok(_) => break,
                    Err(_) => continue,
                }
            }
        }

        loop {
            let next = unsafe { (*node).next[0].load(Ordering::Acquire) };
            if has_mark(next) {
                self.domain.clear_all(tid);
                return Err(RemoveError::Absent);
            }
            /* the mark CAS on level 0 is the linearization point of removal.
             * No final find_preds pass follows: physical unlinking of this
             * node is left for the next traversal that assists it. */
            match cas(unsafe { &(*node).next[0] }, next, mark(next)) {
                Ok(_) => {
                    self.domain.clear_all(tid);
                    return Ok(());
                }
                Err(_) => continue,
            }
        }
    }

    fn lookup(&self, tid: usize, key: Interval, n: usize) -> Option<*mut SlNode> {
        let n = n.min(self.high_water.load(Ordering::Acquire)).max(1);
        let mut preds = vec![std::ptr::null_mut(); n];
        let mut succs = vec![std::ptr::null_mut(); n];
        self.find_preds(&mut preds, &mut succs, n, key, tid, UnlinkPolicy::DontUnlink);
        self.domain.clear_all(tid);
        let node = succs[0];
        match unsafe { node.as_ref().and_then(|x| x.key) } {
            Some(k) if matches!(key_cmp(k, key), KeyCmp::Equal) => Some(node),
            _ => None,
        }
    }

    fn min_key(&self) -> Option<Interval> {
        let mut curr = strip(unsafe { (*self.head).next[0].load(Ordering::Acquire) });
        while !curr.is_null() {
            let next = unsafe { (*curr).next[0].load(Ordering::Acquire) };
            if !has_mark(next) {
                return unsafe { (*curr).key };
            }
            curr = strip(next);
        }
        None
    }

    /// Diagnostic-only, non-linearizable: counts every level-0 node
    /// including logically-removed (marked) ones, exactly as the reference
    /// implementation does.
    fn count(&self) -> usize {
        let mut n = 0usize;
        let mut curr = strip(unsafe { (*self.head).next[0].load(Ordering::Acquire) });
        while !curr.is_null() {
            n += 1;
            curr = strip(unsafe { (*curr).next[0].load(Ordering::Acquire) });
        }
        n
    }
}

impl Drop for SkipListInner {
    fn drop(&mut self) {
        let mut curr = self.head;
        while !curr.is_null() {
            let boxed = unsafe { Box::from_raw(curr) };
            let next = strip(boxed.next[0].load(Ordering::Relaxed));
            drop(boxed);
            curr = next;
        }
    }
}

/// Error returned by [`SkipList::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertError {
    Duplicate,
    Overlap,
}

/// Error returned by [`SkipList::remove`] / [`SkipList::lookup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveError {
    Absent,
}

/// A cloneable handle over a lock-free skip list of interval keys.
pub struct SkipList {
    inner: Arc<SkipListInner>,
}

impl SkipList {
    pub fn new(max_threads: usize) -> Self {
        Self {
            inner: Arc::new(SkipListInner::new(max_threads)),
        }
    }

    pub fn insert(&self, tid: usize, key: Interval) -> Result<(), InsertError> {
        self.inner.insert(tid, key)
    }

    pub fn remove(&self, tid: usize, key: Interval) -> Result<(), RemoveError> {
        self.inner.remove(tid, key)
    }

    /// Looks up `key` scanning at most `n` levels (`n` is clamped to the
    /// list's current `high_water`).
    pub fn lookup(&self, tid: usize, key: Interval, n: usize) -> bool {
        self.inner.lookup(tid, key, n).is_some()
    }

    pub fn min_key(&self) -> Option<Interval> {
        self.inner.min_key()
    }

    /// Diagnostic-only size; see the `count` doc on `SkipListInner`.
    pub fn count(&self) -> usize {
        self.inner.count()
    }
}

impl Clone for SkipList {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_scenario_s4() {
        let list = SkipList::new(4);
        assert_eq!(list.insert(0, Interval::new(10, 20)), Ok(()));
        assert_eq!(
            list.insert(0, Interval::new(15, 18)),
            Err(InsertError::Duplicate)
        );
        assert_eq!(list.insert(0, Interval::new(5, 9)), Ok(()));
        assert_eq!(
            list.insert(0, Interval::new(9, 11)),
            Err(InsertError::Overlap)
        );
    }

    #[test]
    fn round_trip() {
        let list = SkipList::new(4);
        list.insert(0, Interval::new(1, 2)).unwrap();
        assert!(list.lookup(0, Interval::new(1, 2), MAX_LEVELS));
        list.remove(0, Interval::new(1, 2)).unwrap();
        assert!(!list.lookup(0, Interval::new(1, 2), MAX_LEVELS));
        assert_eq!(list.remove(0, Interval::new(1, 2)), Err(RemoveError::Absent));
    }

    #[test]
    fn min_key_skips_removed() {
        let list = SkipList::new(4);
        list.insert(0, Interval::new(10, 20)).unwrap();
        list.insert(0, Interval::new(30, 40)).unwrap();
        assert_eq!(list.min_key(), Some(Interval::new(10, 20)));
        list.remove(0, Interval::new(10, 20)).unwrap();
        assert_eq!(list.min_key(), Some(Interval::new(30, 40)));
    }

    #[test]
    fn concurrent_insert_remove_s5() {
        let list = SkipList::new(8);
        let mut handles = Vec::new();
        for tid in 0..4usize {
            let list = list.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..200u64 {
                    let base = (tid as u64) * 1000 + i * 10;
                    let key = Interval::new(base, base);
                    let _ = list.insert(tid, key);
                    let _ = list.remove(tid, key);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
