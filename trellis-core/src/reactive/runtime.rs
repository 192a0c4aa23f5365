//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects wrapped targets,
//! refs, computeds, and effects. It owns the dependency graph arenas, the
//! ambient tracking context, and the batch queue.
//!
//! # How It Works
//!
//! 1. When a tracked slot is read inside a running subscriber, the runtime
//!    records a link between the slot's dep and the subscriber.
//!
//! 2. When a slot is mutated, the runtime bumps the dep's version and
//!    notifies the linked subscribers through the batch queue.
//!
//! 3. The outermost batch flush re-runs each dirty effect exactly once.
//!
//! # Thread Confinement
//!
//! The whole runtime lives in one `thread_local!` cell. There is no
//! parallelism inside the engine; reentrancy (effects triggering effects,
//! computeds read during other computeds' refresh) is handled with strict
//! save/restore stack discipline on the ambient context. Handle types hold
//! `Rc`s and are therefore not `Send`, which makes the confinement
//! compiler-enforced.
//!
//! # Borrow discipline
//!
//! The runtime cell is never borrowed across user code. Orchestration
//! functions (`run`, `flush`, computed refresh) borrow in phases around the
//! closure invocation. Because a `Value` drop can happen while the runtime
//! is borrowed (replacing a slot inside a write, for example), drop hooks
//! never touch the runtime directly; they enqueue a release record on a
//! separate thread-local queue which the runtime drains on entry.

use std::cell::RefCell;
use std::collections::HashMap;

use indexmap::IndexMap;
use slotmap::{new_key_type, SlotMap};

use super::dep::{Dep, DepKey, Link};
use super::subscriber::{SubFlags, SubKind, SubRecord};

new_key_type! {
    pub(crate) struct DepId;
    pub(crate) struct LinkId;
    pub(crate) struct SubId;
}

/// Deferred cleanup record, enqueued from `Drop` impls.
pub(crate) enum Release {
    /// A raw target died; prune its key-to-dep table.
    Target(u64),
    /// A ref died; prune its dep.
    Dep(DepId),
    /// The last user handle to a subscriber died.
    Subscriber(SubId),
}

/// Per-target dependency table: one dep per observed key.
#[derive(Default)]
pub(crate) struct TargetDeps {
    pub(crate) keys: IndexMap<DepKey, DepId>,
}

pub(crate) struct Runtime {
    pub(crate) deps: SlotMap<DepId, Dep>,
    pub(crate) links: SlotMap<LinkId, Link>,
    pub(crate) subs: SlotMap<SubId, SubRecord>,
    /// Side table: target id to its per-key deps.
    pub(crate) targets: HashMap<u64, TargetDeps>,

    /// The subscriber currently collecting dependencies, if any.
    pub(crate) active_sub: Option<SubId>,
    /// False inside `untracked` scopes.
    pub(crate) should_track: bool,

    /// Reentrant batch depth; only the outermost exit flushes.
    pub(crate) batch_depth: u32,
    /// FIFO queue of notified effects, linked through `next_batch`.
    pub(crate) batch_head: Option<SubId>,
    pub(crate) batch_tail: Option<SubId>,
    /// Computeds notified this batch; their NOTIFIED flag is cleared at
    /// flush (they never run eagerly).
    pub(crate) batched_computeds: Vec<SubId>,

    /// Bumped on every trigger; lets computeds skip re-validation when
    /// nothing anywhere has changed.
    pub(crate) global_version: u64,
}

impl Runtime {
    fn new() -> Self {
        Runtime {
            deps: SlotMap::with_key(),
            links: SlotMap::with_key(),
            subs: SlotMap::with_key(),
            targets: HashMap::new(),
            active_sub: None,
            should_track: true,
            batch_depth: 0,
            batch_head: None,
            batch_tail: None,
            batched_computeds: Vec::new(),
            global_version: 0,
        }
    }

    fn drain_releases(&mut self) {
        let mut deferred = Vec::new();
        loop {
            let batch = RELEASES.with(|q| std::mem::take(&mut *q.borrow_mut()));
            if batch.is_empty() {
                break;
            }
            for release in batch {
                if let Some(retry) = self.release(release) {
                    deferred.push(retry);
                }
            }
        }
        // Releases that hit a subscriber mid-run are retried at a later
        // entry, after its run protocol has finished.
        if !deferred.is_empty() {
            let _ = RELEASES.try_with(|q| q.borrow_mut().extend(deferred));
        }
    }

    fn release(&mut self, release: Release) -> Option<Release> {
        match release {
            Release::Target(id) => {
                if let Some(target) = self.targets.remove(&id) {
                    for (_, dep) in target.keys {
                        self.release_dep(dep);
                    }
                }
                None
            }
            Release::Dep(dep) => {
                self.release_dep(dep);
                None
            }
            Release::Subscriber(sub) => self.release_subscriber(sub),
        }
    }

    /// Free a dep whose owner is gone, or orphan it until its last link is
    /// pruned.
    pub(crate) fn release_dep(&mut self, dep: DepId) {
        if let Some(d) = self.deps.get_mut(dep) {
            if d.sc == 0 {
                self.deps.remove(dep);
            } else {
                d.orphaned = true;
            }
        }
    }

    fn release_subscriber(&mut self, sub: SubId) -> Option<Release> {
        let Some(rec) = self.subs.get_mut(sub) else {
            return None;
        };
        rec.flags.insert(SubFlags::HANDLE_DROPPED);
        let flags = rec.flags;
        if flags.contains(SubFlags::RUNNING) {
            // The last handle died inside the subscriber's own run; the
            // record is still needed until the run protocol finishes.
            return Some(Release::Subscriber(sub));
        }
        let computed_dep = match &rec.kind {
            SubKind::Computed(c) => Some(c.dep),
            SubKind::Effect(_) => None,
        };
        match computed_dep {
            Some(dep) => {
                // Nothing can read this computed anymore; tear it down.
                // Downstream links keep working as plain version checks.
                self.clear_deps(sub);
                if let Some(d) = self.deps.get_mut(dep) {
                    d.computed = None;
                }
                self.release_dep(dep);
                self.subs.remove(sub);
            }
            None => {
                // A live effect keeps running without its handle
                // (registration semantics). Stopped effects are freed once
                // they are also out of the batch queue.
                if !flags.contains(SubFlags::ACTIVE) && !flags.contains(SubFlags::NOTIFIED) {
                    self.subs.remove(sub);
                }
            }
        }
        None
    }
}

thread_local! {
    static RUNTIME: RefCell<Runtime> = RefCell::new(Runtime::new());
    static RELEASES: RefCell<Vec<Release>> = const { RefCell::new(Vec::new()) };
}

/// Enqueue a deferred cleanup record. Safe to call from `Drop` at any
/// point, including while the runtime is borrowed.
pub(crate) fn enqueue_release(release: Release) {
    let _ = RELEASES.try_with(|q| q.borrow_mut().push(release));
}

/// Run `f` with exclusive access to the runtime, draining pending releases
/// first. Never call user code from inside; the borrow must not nest.
pub(crate) fn with<R>(f: impl FnOnce(&mut Runtime) -> R) -> R {
    RUNTIME.with(|cell| {
        let mut rt = cell.borrow_mut();
        rt.drain_releases();
        f(&mut rt)
    })
}

/// Run `f` with dependency tracking disabled.
///
/// Reads inside the closure do not register dependencies on the currently
/// running subscriber. Useful for peeking at reactive state from inside an
/// effect without subscribing to it.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let prev = with(|rt| std::mem::replace(&mut rt.should_track, false));
    struct Restore(bool);
    impl Drop for Restore {
        fn drop(&mut self) {
            with(|rt| rt.should_track = self.0);
        }
    }
    let _restore = Restore(prev);
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untracked_restores_on_exit() {
        assert!(with(|rt| rt.should_track));
        untracked(|| {
            assert!(!with(|rt| rt.should_track));
        });
        assert!(with(|rt| rt.should_track));
    }

    #[test]
    fn untracked_restores_on_panic() {
        let result = std::panic::catch_unwind(|| {
            untracked(|| panic!("boom"));
        });
        assert!(result.is_err());
        assert!(with(|rt| rt.should_track));
    }

    #[test]
    fn unknown_releases_are_ignored() {
        enqueue_release(Release::Target(u64::MAX));
        // Draining an unknown id is a no-op rather than an error.
        with(|_| {});
    }
}
