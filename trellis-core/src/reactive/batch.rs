//! Batching Scheduler
//!
//! Every trigger is issued inside a batch. Batches nest through a depth
//! counter; only the outermost exit flushes, so all triggers raised within
//! one top-level mutation, or within one effect run, coalesce into a single
//! wave in which each dirty subscriber runs at most once.
//!
//! Flush order is FIFO by first-notified order. That ordering is part of
//! the contract and covered by tests.
//!
//! A panic in one queued effect does not starve its siblings: the first
//! panic payload is captured and re-raised only after the whole queue has
//! drained.

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};

use super::runtime::{self, Runtime};
use super::subscriber::{self, SubFlags};

impl Runtime {
    pub(crate) fn start_batch(&mut self) {
        self.batch_depth += 1;
    }

    /// Close one batch level. Returns true when this was the outermost
    /// level and there is queued work; the caller must then invoke
    /// [`flush`] after releasing the runtime borrow.
    #[must_use]
    pub(crate) fn end_batch(&mut self) -> bool {
        debug_assert!(self.batch_depth > 0, "unbalanced batch depth");
        self.batch_depth = self.batch_depth.saturating_sub(1);
        self.batch_depth == 0
            && (self.batch_head.is_some() || !self.batched_computeds.is_empty())
    }
}

/// Wrap a runtime mutation in its own batch and flush when it closed the
/// outermost level. The standard entry point for every trigger site.
pub(crate) fn run_triggers(f: impl FnOnce(&mut Runtime)) {
    let needs_flush = runtime::with(|rt| {
        rt.start_batch();
        f(rt);
        rt.end_batch()
    });
    if needs_flush {
        flush();
    }
}

/// Drain the pending queue: clear notification flags on batched computeds,
/// then deliver one trigger to each queued effect in FIFO order.
pub(crate) fn flush() {
    let mut cursor = runtime::with(|rt| {
        for sub in std::mem::take(&mut rt.batched_computeds) {
            if let Some(rec) = rt.subs.get_mut(sub) {
                rec.flags.remove(SubFlags::NOTIFIED);
            }
        }
        rt.batch_tail = None;
        rt.batch_head.take()
    });
    let mut first_panic: Option<Box<dyn std::any::Any + Send>> = None;
    while let Some(sub) = cursor {
        let (next, runnable) = runtime::with(|rt| {
            let Some(rec) = rt.subs.get_mut(sub) else {
                return (None, false);
            };
            let next = rec.next_batch.take();
            rec.flags.remove(SubFlags::NOTIFIED);
            let flags = rec.flags;
            let runnable = flags.contains(SubFlags::ACTIVE);
            if !runnable && flags.contains(SubFlags::HANDLE_DROPPED) {
                rt.subs.remove(sub);
            }
            (next, runnable)
        });
        if runnable {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| subscriber::trigger_sub(sub))) {
                if first_panic.is_none() {
                    first_panic = Some(payload);
                }
            }
        }
        cursor = next;
    }
    if let Some(payload) = first_panic {
        resume_unwind(payload);
    }
}

/// Group several mutations into one flush.
///
/// Triggers raised inside the closure are queued; queued effects run once,
/// after the closure returns. Batches nest: only the outermost one flushes.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    runtime::with(|rt| rt.start_batch());
    struct Guard;
    impl Drop for Guard {
        fn drop(&mut self) {
            let needs_flush = runtime::with(|rt| rt.end_batch());
            if needs_flush && !std::thread::panicking() {
                flush();
            }
        }
    }
    let _guard = Guard;
    f()
}
