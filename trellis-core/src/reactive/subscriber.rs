//! Subscriber Runtime
//!
//! A subscriber is the unit of observation: a registered computation that
//! owns a dependency list and re-runs when the slots it read change. Both
//! effects and computeds are subscribers; computeds additionally own a dep
//! of their own, which is what lets them sit on both sides of the graph.
//!
//! # The run protocol
//!
//! Running a subscriber follows a strict protocol:
//!
//! 1. Set RUNNING and invoke the cleanup callback, if any.
//! 2. Mark every existing link stale and cache it as its dep's active link.
//! 3. Install the subscriber as the ambient active subscriber and open a
//!    batch, so mutations made inside the body coalesce into one flush.
//! 4. Execute the body. Reads revive stale links or create new ones.
//! 5. On every exit path, including panics: restore the ambient subscriber,
//!    prune links that are still stale, clear RUNNING, close the batch.
//!
//! The epilogue runs from a drop guard, so a panicking body leaves the
//! ambient context exactly as it found it.

use std::cell::RefCell;
use std::rc::Rc;

use bitflags::bitflags;

use super::batch;
use super::computed::{refresh_computed, ComputedRecord};
use super::effect::Job;
use super::runtime::{self, DepId, LinkId, SubId};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct SubFlags: u16 {
        /// Not yet stopped.
        const ACTIVE = 1 << 0;
        /// Currently executing its body.
        const RUNNING = 1 << 1;
        /// Has established a dependency list at least once.
        const TRACKING = 1 << 2;
        /// Already queued in the current batch.
        const NOTIFIED = 1 << 3;
        /// A dependency changed since the last refresh (computeds).
        const DIRTY = 1 << 4;
        /// Self-triggering notifications are delivered instead of ignored.
        const ALLOW_RECURSE = 1 << 5;
        /// Delivery suspended; triggers are recorded, not executed.
        const PAUSED = 1 << 6;
        /// Triggered while paused; replayed once on resume.
        const PENDING = 1 << 7;
        /// No user handle remains; the record may be freed once inert.
        const HANDLE_DROPPED = 1 << 8;
    }
}

pub(crate) struct EffectRecord {
    pub(crate) body: Rc<RefCell<dyn FnMut()>>,
    /// When present, triggering hands a re-run token to this callback
    /// instead of running synchronously.
    pub(crate) scheduler: Option<Rc<dyn Fn(Job)>>,
    /// Invoked before each re-run and on stop.
    pub(crate) cleanup: Option<Rc<RefCell<dyn FnMut()>>>,
    pub(crate) on_stop: Option<Box<dyn FnOnce()>>,
}

pub(crate) enum SubKind {
    Effect(EffectRecord),
    Computed(ComputedRecord),
}

pub(crate) struct SubRecord {
    pub(crate) flags: SubFlags,
    pub(crate) deps_head: Option<LinkId>,
    pub(crate) deps_tail: Option<LinkId>,
    /// Intrusive pointer for the batch queue.
    pub(crate) next_batch: Option<SubId>,
    pub(crate) kind: SubKind,
}

/// Restores the ambient tracking context; used around cleanup callbacks so
/// their reads are not attributed to any subscriber.
struct AmbientGuard {
    prev_sub: Option<SubId>,
    prev_track: bool,
}

impl Drop for AmbientGuard {
    fn drop(&mut self) {
        runtime::with(|rt| {
            rt.active_sub = self.prev_sub;
            rt.should_track = self.prev_track;
        });
    }
}

fn run_cleanup(cleanup: Rc<RefCell<dyn FnMut()>>) {
    let (prev_sub, prev_track) = runtime::with(|rt| {
        (
            rt.active_sub.take(),
            std::mem::replace(&mut rt.should_track, false),
        )
    });
    let _guard = AmbientGuard {
        prev_sub,
        prev_track,
    };
    (&mut *cleanup.borrow_mut())();
}

/// Run epilogue, executed on every exit path of an effect body.
struct RunGuard {
    sub: SubId,
    prev_sub: Option<SubId>,
    prev_track: bool,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let needs_flush = runtime::with(|rt| {
            rt.active_sub = self.prev_sub;
            rt.should_track = self.prev_track;
            rt.cleanup_deps(self.sub);
            if let Some(rec) = rt.subs.get_mut(self.sub) {
                rec.flags.remove(SubFlags::RUNNING);
                rec.flags.insert(SubFlags::TRACKING);
            }
            rt.end_batch()
        });
        // During a panic the queue is left intact; the next batch picks
        // it up instead of running effects mid-unwind.
        if needs_flush && !std::thread::panicking() {
            batch::flush();
        }
    }
}

enum Prep {
    Gone,
    /// Stopped subscribers stay callable as plain functions, untracked.
    Raw(Rc<RefCell<dyn FnMut()>>),
    Go {
        body: Rc<RefCell<dyn FnMut()>>,
        cleanup: Option<Rc<RefCell<dyn FnMut()>>>,
    },
}

/// Execute an effect's body under the run protocol.
pub(crate) fn run_subscriber(sub: SubId) {
    let prep = runtime::with(|rt| {
        let Some(rec) = rt.subs.get_mut(sub) else {
            return Prep::Gone;
        };
        let SubKind::Effect(effect) = &rec.kind else {
            return Prep::Gone;
        };
        let body = effect.body.clone();
        if !rec.flags.contains(SubFlags::ACTIVE) {
            return Prep::Raw(body);
        }
        // Cleanup only applies to re-runs; TRACKING is set after the
        // first completed run.
        let cleanup = if rec.flags.contains(SubFlags::TRACKING) {
            effect.cleanup.clone()
        } else {
            None
        };
        rec.flags.insert(SubFlags::RUNNING);
        Prep::Go { body, cleanup }
    });
    match prep {
        Prep::Gone => {}
        Prep::Raw(body) => (&mut *body.borrow_mut())(),
        Prep::Go { body, cleanup } => {
            if let Some(cleanup) = cleanup {
                run_cleanup(cleanup);
            }
            let (prev_sub, prev_track) = runtime::with(|rt| {
                rt.prepare_deps(sub);
                let prev_sub = rt.active_sub.replace(sub);
                let prev_track = std::mem::replace(&mut rt.should_track, true);
                rt.start_batch();
                (prev_sub, prev_track)
            });
            let _guard = RunGuard {
                sub,
                prev_sub,
                prev_track,
            };
            (&mut *body.borrow_mut())();
        }
    }
}

/// Re-run only when a dependency actually changed.
pub(crate) fn run_if_dirty(sub: SubId) {
    if is_dirty(sub) {
        run_subscriber(sub);
    }
}

enum LinkCheck {
    Dirty,
    Clean(Option<LinkId>),
    Computed {
        owner: SubId,
        dep: DepId,
        seen_version: u64,
        next: Option<LinkId>,
    },
}

/// True when any linked dep's version moved past the version the link last
/// saw. Links to computed outputs refresh the computed first, which pulls
/// dirtiness through computed chains without eager recomputation.
pub(crate) fn is_dirty(sub: SubId) -> bool {
    let mut cursor = runtime::with(|rt| rt.subs.get(sub).and_then(|r| r.deps_head));
    while let Some(l) = cursor {
        let check = runtime::with(|rt| {
            let Some(link) = rt.links.get(l) else {
                return LinkCheck::Dirty;
            };
            if link.sub != sub {
                return LinkCheck::Dirty;
            }
            let Some(dep) = rt.deps.get(link.dep) else {
                return LinkCheck::Dirty;
            };
            if link.version != dep.version {
                return LinkCheck::Dirty;
            }
            match dep.computed {
                Some(owner) => LinkCheck::Computed {
                    owner,
                    dep: link.dep,
                    seen_version: link.version,
                    next: link.next_dep,
                },
                None => LinkCheck::Clean(link.next_dep),
            }
        });
        match check {
            LinkCheck::Dirty => return true,
            LinkCheck::Clean(next) => cursor = next,
            LinkCheck::Computed {
                owner,
                dep,
                seen_version,
                next,
            } => {
                refresh_computed(owner);
                let moved = runtime::with(|rt| {
                    rt.deps
                        .get(dep)
                        .map(|d| d.version != seen_version)
                        .unwrap_or(true)
                });
                if moved {
                    return true;
                }
                cursor = next;
            }
        }
    }
    false
}

/// Deliver one trigger to a subscriber: defer when paused, hand to the
/// scheduler when one is installed, otherwise re-run if dirty.
pub(crate) fn trigger_sub(sub: SubId) {
    enum Action {
        None,
        Scheduled(Rc<dyn Fn(Job)>),
        Run,
    }
    let action = runtime::with(|rt| {
        let Some(rec) = rt.subs.get_mut(sub) else {
            return Action::None;
        };
        if rec.flags.contains(SubFlags::PAUSED) {
            rec.flags.insert(SubFlags::PENDING);
            return Action::None;
        }
        match &rec.kind {
            SubKind::Effect(e) => match &e.scheduler {
                Some(s) => Action::Scheduled(s.clone()),
                None => Action::Run,
            },
            SubKind::Computed(_) => Action::None,
        }
    });
    match action {
        Action::None => {}
        Action::Scheduled(scheduler) => (*scheduler)(Job::new(sub)),
        Action::Run => run_if_dirty(sub),
    }
}

/// Tear down a subscriber: unlink everything, run cleanup and the on-stop
/// hook, clear ACTIVE. Idempotent, and safe to call from inside the
/// subscriber's own run.
pub(crate) fn stop_subscriber(sub: SubId) {
    let hooks = runtime::with(|rt| {
        let Some(rec) = rt.subs.get_mut(sub) else {
            return None;
        };
        if !rec.flags.contains(SubFlags::ACTIVE) {
            return None;
        }
        rec.flags.remove(
            SubFlags::ACTIVE | SubFlags::DIRTY | SubFlags::PAUSED | SubFlags::PENDING,
        );
        let taken = match &mut rec.kind {
            SubKind::Effect(e) => Some((e.cleanup.clone(), e.on_stop.take())),
            SubKind::Computed(_) => Some((None, None)),
        };
        rt.clear_deps(sub);
        taken
    });
    if let Some((cleanup, on_stop)) = hooks {
        tracing::debug!("subscriber stopped");
        if let Some(cleanup) = cleanup {
            run_cleanup(cleanup);
        }
        if let Some(hook) = on_stop {
            hook();
        }
    }
}

pub(crate) fn pause_subscriber(sub: SubId) {
    runtime::with(|rt| {
        if let Some(rec) = rt.subs.get_mut(sub) {
            rec.flags.insert(SubFlags::PAUSED);
        }
    });
}

/// Lift the pause and replay one deferred trigger, if any arrived.
pub(crate) fn resume_subscriber(sub: SubId) {
    let replay = runtime::with(|rt| {
        let Some(rec) = rt.subs.get_mut(sub) else {
            return false;
        };
        if !rec.flags.contains(SubFlags::PAUSED) {
            return false;
        }
        rec.flags.remove(SubFlags::PAUSED);
        if rec.flags.contains(SubFlags::PENDING) {
            rec.flags.remove(SubFlags::PENDING);
            true
        } else {
            false
        }
    });
    if replay {
        trigger_sub(sub);
    }
}
