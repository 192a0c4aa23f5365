//! Effect Implementation
//!
//! An Effect is a side-effecting computation that re-runs whenever the
//! reactive state it read last time changes.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its body immediately to establish
//!    initial dependencies (unless constructed lazy).
//!
//! 2. When any dependency changes, the effect is queued on the current
//!    batch and re-run once at flush, but only if a dependency actually
//!    changed by then (version check).
//!
//! 3. With a scheduler installed, the flush hands the scheduler a [`Job`]
//!    instead of running synchronously; the host decides when to run it.
//!
//! # Lifecycle
//!
//! `stop` removes every dependency link and is terminal; the handle's
//! `run` still invokes the raw body, untracked. `pause` defers delivery
//! of triggers; `resume` replays at most one deferred trigger. Dropping
//! the handle does not stop the effect: a registered effect keeps
//! observing, the way a running subscription should.
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{effect, reactive, Value};
//!
//! let state = reactive(Value::new_object());
//! state.set("count", 0);
//!
//! let handle = effect({
//!     let state = state.clone();
//!     move || println!("count is {:?}", state.get("count"))
//! });
//!
//! state.set("count", 1); // prints: count is Int(1)
//! handle.stop();
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use super::runtime::{self, Release, SubId};
use super::subscriber::{self, EffectRecord, SubFlags, SubKind, SubRecord};

/// Options accepted by [`effect_with`].
#[derive(Default)]
pub struct EffectOptions {
    /// Skip the initial run; dependencies are established on the first
    /// explicit `run`.
    pub lazy: bool,
    /// Deliver notifications raised by the effect's own run instead of
    /// ignoring them.
    pub allow_recurse: bool,
    /// Called at flush instead of running synchronously; receives a token
    /// that re-runs the effect if it is dirty.
    pub scheduler: Option<Box<dyn Fn(Job)>>,
    /// Invoked before each re-run and on stop.
    pub cleanup: Option<Box<dyn FnMut()>>,
    /// Invoked once when the effect is stopped.
    pub on_stop: Option<Box<dyn FnOnce()>>,
}

/// Re-run token handed to a scheduler callback.
#[derive(Clone, Copy)]
pub struct Job {
    sub: SubId,
}

impl Job {
    pub(crate) fn new(sub: SubId) -> Self {
        Job { sub }
    }

    /// Re-run the owning effect if any of its dependencies changed since
    /// the last run. A no-op for stopped effects.
    pub fn run(&self) {
        subscriber::run_if_dirty(self.sub);
    }
}

struct EffectHandle {
    sub: SubId,
}

impl Drop for EffectHandle {
    fn drop(&mut self) {
        runtime::enqueue_release(Release::Subscriber(self.sub));
    }
}

/// Handle to a registered effect.
///
/// Cloning shares the registration. See the module docs for lifecycle.
#[derive(Clone)]
pub struct Effect {
    inner: Rc<EffectHandle>,
}

impl Effect {
    /// Run the body now. Active effects run under full tracking; stopped
    /// effects run the raw body with no tracking at all.
    pub fn run(&self) {
        subscriber::run_subscriber(self.inner.sub);
    }

    /// Remove every dependency link and deactivate. Idempotent; safe to
    /// call from inside the effect's own body.
    pub fn stop(&self) {
        subscriber::stop_subscriber(self.inner.sub);
    }

    /// Suspend delivery of triggers until `resume`.
    pub fn pause(&self) {
        subscriber::pause_subscriber(self.inner.sub);
    }

    /// Lift a pause; if the effect was triggered while paused it is
    /// delivered once now.
    pub fn resume(&self) {
        subscriber::resume_subscriber(self.inner.sub);
    }

    /// True until the effect is stopped.
    pub fn is_active(&self) -> bool {
        runtime::with(|rt| {
            rt.subs
                .get(self.inner.sub)
                .map(|rec| rec.flags.contains(SubFlags::ACTIVE))
                .unwrap_or(false)
        })
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Register a reactive computation and run it once.
pub fn effect(f: impl FnMut() + 'static) -> Effect {
    effect_with(f, EffectOptions::default())
}

/// Register a reactive computation with explicit options.
pub fn effect_with(f: impl FnMut() + 'static, options: EffectOptions) -> Effect {
    let EffectOptions {
        lazy,
        allow_recurse,
        scheduler,
        cleanup,
        on_stop,
    } = options;
    let sub = runtime::with(|rt| {
        let mut flags = SubFlags::ACTIVE;
        if allow_recurse {
            flags |= SubFlags::ALLOW_RECURSE;
        }
        rt.subs.insert(SubRecord {
            flags,
            deps_head: None,
            deps_tail: None,
            next_batch: None,
            kind: SubKind::Effect(EffectRecord {
                body: Rc::new(RefCell::new(f)),
                scheduler: scheduler.map(|s| -> Rc<dyn Fn(Job)> { Rc::from(s) }),
                cleanup: cleanup.map(|c| Rc::new(RefCell::new(c)) as Rc<RefCell<dyn FnMut()>>),
                on_stop,
            }),
        })
    });
    let handle = Effect {
        inner: Rc::new(EffectHandle { sub }),
    };
    if !lazy {
        subscriber::run_subscriber(sub);
    }
    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn effect_runs_on_creation() {
        let runs = Rc::new(Cell::new(0));
        let _effect = effect({
            let runs = runs.clone();
            move || runs.set(runs.get() + 1)
        });
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn lazy_effect_waits_for_first_run() {
        let runs = Rc::new(Cell::new(0));
        let handle = effect_with(
            {
                let runs = runs.clone();
                move || runs.set(runs.get() + 1)
            },
            EffectOptions {
                lazy: true,
                ..Default::default()
            },
        );
        assert_eq!(runs.get(), 0);
        handle.run();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn stopped_effect_still_runs_raw_body() {
        let runs = Rc::new(Cell::new(0));
        let handle = effect({
            let runs = runs.clone();
            move || runs.set(runs.get() + 1)
        });
        assert_eq!(runs.get(), 1);
        handle.stop();
        assert!(!handle.is_active());
        handle.run();
        handle.run();
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn stop_twice_is_a_no_op() {
        let stops = Rc::new(Cell::new(0));
        let handle = effect_with(
            || {},
            EffectOptions {
                on_stop: Some(Box::new({
                    let stops = stops.clone();
                    move || stops.set(stops.get() + 1)
                })),
                ..Default::default()
            },
        );
        handle.stop();
        handle.stop();
        assert_eq!(stops.get(), 1);
    }

    #[test]
    fn self_stop_inside_own_run_is_safe() {
        let handle: Rc<RefCell<Option<Effect>>> = Rc::new(RefCell::new(None));
        let runs = Rc::new(Cell::new(0));
        let created = effect_with(
            {
                let handle = handle.clone();
                let runs = runs.clone();
                move || {
                    runs.set(runs.get() + 1);
                    if let Some(h) = handle.borrow().as_ref() {
                        h.stop();
                    }
                }
            },
            EffectOptions {
                lazy: true,
                ..Default::default()
            },
        );
        *handle.borrow_mut() = Some(created.clone());
        created.run();
        assert_eq!(runs.get(), 1);
        assert!(!created.is_active());
    }
}
