//! A small family of lock-free ordered containers sharing one hazard-pointer
//! reclamation substrate:
//!
//! - [`linked_set::LinkedSet`] — an ordered integer set (Harris–Michael list).
//! - [`hash_set::HashSet`] — a split-ordered, resizable hash set built on the
//!   same list engine (Shalev & Shavit).
//! - [`skip_list::SkipList`] — a multi-level skip list keyed by intervals,
//!   with an overlap-sensitive comparator.
//!
//! Every operation takes an explicit `tid: usize` identifying the calling
//! thread. Callers are responsible for handing out distinct, stable ids in
//! `[0, max_threads)` — this crate does not allocate thread identity itself,
//! the same way none of its containers own process startup or logging.
//! There is deliberately no logging in this crate: every lock-free hot path
//! in the corpus these containers were built against avoids it, since a
//! tracing call inside a CAS-retry loop would dominate the very contention
//! it's meant to observe.

mod hazard;
mod list;
mod tagged;

pub mod hash_set;
pub mod linked_set;
pub mod skip_list;

pub use hash_set::HashSet;
pub use linked_set::LinkedSet;
pub use skip_list::SkipList;

/// Default bound on distinct `tid` values a container is prepared to serve,
/// used by the `with_default_threads` constructors. Containers can be built
/// with a different bound via `::new(max_threads)` directly.
pub const DEFAULT_MAX_THREADS: usize = 64;

impl LinkedSet {
    pub fn with_default_threads() -> Self {
        Self::new(DEFAULT_MAX_THREADS)
    }
}

impl hash_set::HashSet {
    pub fn with_default_threads() -> Self {
        Self::new(DEFAULT_MAX_THREADS)
    }
}

impl skip_list::SkipList {
    pub fn with_default_threads() -> Self {
        Self::new(DEFAULT_MAX_THREADS)
    }
}
