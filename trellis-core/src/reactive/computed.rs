//! Computed (Derived) Values
//!
//! A computed is a cached derived value. It is a subscriber (it reads
//! other deps through its getter) and at the same time the owner of one
//! dep (other subscribers read its output), which is what makes chains of
//! derived values compose.
//!
//! # How Computeds Work
//!
//! 1. Reading `get` tracks the computed's own dep against the ambient
//!    subscriber, refreshes the cache if needed, and returns a clone.
//!
//! 2. Refreshing is pull-based. A mutation never recomputes anything; it
//!    only marks the computed DIRTY and lets the notification ripple to
//!    the computed's subscribers. The next read pays for the recompute,
//!    and only when a version check confirms some input really moved.
//!
//! 3. The computed's dep version is bumped only when the recomputed value
//!    differs (`PartialEq`) from the cache, so downstream subscribers of
//!    an unchanged computed stay clean even when its inputs churned.
//!
//! A panic in the getter still bumps the version before propagating:
//! downstream readers must re-evaluate rather than trust a cache that was
//! produced before the failure.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Error;

use super::runtime::{self, DepId, Release, SubId};
use super::subscriber::{self, SubFlags, SubKind, SubRecord};

pub(crate) struct ComputedRecord {
    /// The dep other subscribers link to when they read this computed.
    pub(crate) dep: DepId,
    /// Type-erased recompute step; returns true when the value changed.
    pub(crate) refresh: Rc<RefCell<dyn FnMut() -> bool>>,
    /// Global version at the last refresh; unchanged means nothing
    /// anywhere was triggered, so the cache is trivially current.
    pub(crate) last_global: Option<u64>,
}

struct ComputedHandle<T> {
    sub: SubId,
    dep: DepId,
    value: Rc<RefCell<Option<T>>>,
    setter: Option<Box<dyn Fn(T)>>,
}

impl<T> Drop for ComputedHandle<T> {
    fn drop(&mut self) {
        runtime::enqueue_release(Release::Subscriber(self.sub));
    }
}

/// A cached derived value.
///
/// Cloning shares the cache and registration. Dropping the last handle
/// tears the registration down.
pub struct Computed<T: Clone + PartialEq + 'static> {
    inner: Rc<ComputedHandle<T>>,
}

impl<T: Clone + PartialEq + 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Computed {
            inner: self.inner.clone(),
        }
    }
}

/// Create a computed from a getter.
pub fn computed<T, F>(mut getter: F) -> Computed<T>
where
    T: Clone + PartialEq + 'static,
    F: FnMut() -> T + 'static,
{
    Computed::with_prev(move |_| getter())
}

impl<T: Clone + PartialEq + 'static> Computed<T> {
    /// Create a computed whose getter receives the previously cached value,
    /// for accumulator-style derivations.
    pub fn with_prev(getter: impl FnMut(Option<&T>) -> T + 'static) -> Self {
        Self::build(getter, None)
    }

    /// Create a writable computed; `set` delegates to `setter`.
    pub fn writable(
        mut getter: impl FnMut() -> T + 'static,
        setter: impl Fn(T) + 'static,
    ) -> Self {
        Self::build(move |_| getter(), Some(Box::new(setter)))
    }

    fn build(
        mut getter: impl FnMut(Option<&T>) -> T + 'static,
        setter: Option<Box<dyn Fn(T)>>,
    ) -> Self {
        let value: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
        let refresh = {
            let value = value.clone();
            move || -> bool {
                // Clone the previous value out so the cell is not borrowed
                // while the getter runs user code.
                let prev = value.borrow().clone();
                let next = getter(prev.as_ref());
                let changed = match &prev {
                    Some(p) => *p != next,
                    None => true,
                };
                *value.borrow_mut() = Some(next);
                changed
            }
        };
        let (sub, dep) = runtime::with(|rt| {
            let dep = rt.deps.insert(super::dep::Dep::new(None));
            let sub = rt.subs.insert(SubRecord {
                flags: SubFlags::ACTIVE | SubFlags::DIRTY,
                deps_head: None,
                deps_tail: None,
                next_batch: None,
                kind: SubKind::Computed(ComputedRecord {
                    dep,
                    refresh: Rc::new(RefCell::new(refresh)),
                    last_global: None,
                }),
            });
            rt.deps[dep].computed = Some(sub);
            (sub, dep)
        });
        Computed {
            inner: Rc::new(ComputedHandle {
                sub,
                dep,
                value,
                setter,
            }),
        }
    }

    /// Current value, recomputing first if any input changed.
    ///
    /// Reading inside a subscriber links that subscriber to this computed's
    /// output, not to the computed's own inputs.
    pub fn get(&self) -> T {
        let link = runtime::with(|rt| rt.track(self.inner.dep));
        refresh_computed(self.inner.sub);
        if let Some(l) = link {
            // The refresh may have bumped our dep; the reader saw the
            // freshly cached value, so its link is current.
            runtime::with(|rt| {
                let version = rt.deps.get(self.inner.dep).map(|d| d.version);
                if let (Some(version), Some(link)) = (version, rt.links.get_mut(l)) {
                    link.version = version;
                }
            });
        }
        self.inner
            .value
            .borrow()
            .clone()
            .expect("computed read during its own evaluation")
    }

    /// Write through the setter; warns and does nothing when the computed
    /// is not writable.
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            tracing::warn!(error = %err, "computed write ignored");
        }
    }

    /// Write through the setter, or report why the write is impossible.
    pub fn try_set(&self, value: T) -> Result<(), Error> {
        match &self.inner.setter {
            Some(setter) => {
                setter(value);
                Ok(())
            }
            None => Err(Error::NoSetter),
        }
    }
}

impl<T: Clone + PartialEq + std::fmt::Debug + 'static> std::fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

enum Gate {
    Skip,
    Check {
        dep: DepId,
        has_history: bool,
        has_deps: bool,
    },
}

/// Version bump and link maintenance on every exit path of the getter,
/// including panics (a failed recompute counts as a change, and the
/// computed stays dirty so the next read retries).
struct RefreshGuard {
    sub: SubId,
    dep: DepId,
    prev_sub: Option<SubId>,
    prev_track: bool,
    changed: bool,
    completed: bool,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        runtime::with(|rt| {
            rt.active_sub = self.prev_sub;
            rt.should_track = self.prev_track;
            rt.cleanup_deps(self.sub);
            if let Some(rec) = rt.subs.get_mut(self.sub) {
                rec.flags.remove(SubFlags::RUNNING);
                rec.flags.insert(SubFlags::TRACKING);
                if !self.completed {
                    rec.flags.insert(SubFlags::DIRTY);
                    if let SubKind::Computed(c) = &mut rec.kind {
                        c.last_global = None;
                    }
                }
            }
            if let Some(dep) = rt.deps.get_mut(self.dep) {
                if self.changed || dep.version == 0 {
                    dep.version = dep.version.wrapping_add(1);
                }
            }
        });
    }
}

/// Bring a computed's cache up to date if any of its inputs changed.
pub(crate) fn refresh_computed(sub: SubId) {
    let gate = runtime::with(|rt| {
        let global = rt.global_version;
        let (dep, has_deps) = {
            let Some(rec) = rt.subs.get_mut(sub) else {
                return Gate::Skip;
            };
            let flags = rec.flags;
            if flags.contains(SubFlags::RUNNING) {
                return Gate::Skip;
            }
            if flags.contains(SubFlags::TRACKING) && !flags.contains(SubFlags::DIRTY) {
                return Gate::Skip;
            }
            rec.flags.remove(SubFlags::DIRTY);
            let has_deps = rec.deps_head.is_some();
            let SubKind::Computed(c) = &mut rec.kind else {
                return Gate::Skip;
            };
            if c.last_global == Some(global) {
                return Gate::Skip;
            }
            c.last_global = Some(global);
            (c.dep, has_deps)
        };
        let has_history = rt.deps.get(dep).map(|d| d.version > 0).unwrap_or(false);
        Gate::Check {
            dep,
            has_history,
            has_deps,
        }
    });
    let Gate::Check {
        dep,
        has_history,
        has_deps,
    } = gate
    else {
        return;
    };
    // With history and an intact dep list, a full version walk can prove
    // the cache current without recomputing.
    if has_history && has_deps && !subscriber::is_dirty(sub) {
        return;
    }
    let Some((refresh, prev_sub, prev_track)) = runtime::with(|rt| {
        let Some(rec) = rt.subs.get_mut(sub) else {
            return None;
        };
        rec.flags.insert(SubFlags::RUNNING);
        let SubKind::Computed(c) = &rec.kind else {
            return None;
        };
        let refresh = c.refresh.clone();
        rt.prepare_deps(sub);
        let prev_sub = rt.active_sub.replace(sub);
        let prev_track = std::mem::replace(&mut rt.should_track, true);
        Some((refresh, prev_sub, prev_track))
    }) else {
        return;
    };
    let mut guard = RefreshGuard {
        sub,
        dep,
        prev_sub,
        prev_track,
        changed: true,
        completed: false,
    };
    let changed = (&mut *refresh.borrow_mut())();
    guard.changed = changed;
    guard.completed = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::effect;
    use crate::reactive::refs::Ref;
    use crate::value::Value;
    use std::cell::Cell;

    #[test]
    fn computes_lazily_and_caches() {
        let calls = Rc::new(Cell::new(0));
        let c = computed({
            let calls = calls.clone();
            move || {
                calls.set(calls.get() + 1);
                42
            }
        });
        assert_eq!(calls.get(), 0);
        assert_eq!(c.get(), 42);
        assert_eq!(c.get(), 42);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn recomputes_only_when_inputs_change_and_only_on_read() {
        let source = Ref::new(Value::from(2));
        let calls = Rc::new(Cell::new(0));
        let doubled = computed({
            let source = source.clone();
            let calls = calls.clone();
            move || {
                calls.set(calls.get() + 1);
                source.get().as_int().unwrap_or(0) * 2
            }
        });
        assert_eq!(doubled.get(), 4);
        assert_eq!(calls.get(), 1);

        // The mutation alone does not recompute.
        source.set(Value::from(5));
        assert_eq!(calls.get(), 1);

        assert_eq!(doubled.get(), 10);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn effect_behind_unchanged_computed_stays_clean() {
        let source = Ref::new(Value::from(1));
        let positive = computed({
            let source = source.clone();
            move || source.get().as_int().unwrap_or(0) > 0
        });
        let runs = Rc::new(Cell::new(0));
        let _e = effect({
            let positive = positive.clone();
            let runs = runs.clone();
            move || {
                positive.get();
                runs.set(runs.get() + 1);
            }
        });
        assert_eq!(runs.get(), 1);

        // Input changes, derived output does not.
        source.set(Value::from(2));
        assert_eq!(runs.get(), 1);

        source.set(Value::from(-1));
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn chains_of_computeds_propagate() {
        let source = Ref::new(Value::from(5));
        let doubled = computed({
            let source = source.clone();
            move || source.get().as_int().unwrap_or(0) * 2
        });
        let plus_ten = computed({
            let doubled = doubled.clone();
            move || doubled.get() + 10
        });
        assert_eq!(plus_ten.get(), 20);

        source.set(Value::from(10));
        assert_eq!(plus_ten.get(), 30);
    }

    #[test]
    fn with_prev_receives_the_cached_value() {
        let source = Ref::new(Value::from(1));
        let running_max = Computed::with_prev({
            let source = source.clone();
            move |prev: Option<&i64>| {
                let current = source.get().as_int().unwrap_or(0);
                prev.copied().unwrap_or(i64::MIN).max(current)
            }
        });
        assert_eq!(running_max.get(), 1);
        source.set(Value::from(9));
        assert_eq!(running_max.get(), 9);
        source.set(Value::from(3));
        assert_eq!(running_max.get(), 9);
    }

    #[test]
    fn writable_computed_delegates_to_setter() {
        let celsius = Ref::new(Value::from(0));
        let fahrenheit = Computed::writable(
            {
                let celsius = celsius.clone();
                move || celsius.get().as_int().unwrap_or(0) * 9 / 5 + 32
            },
            {
                let celsius = celsius.clone();
                move |f: i64| celsius.set(Value::from((f - 32) * 5 / 9))
            },
        );
        assert_eq!(fahrenheit.get(), 32);
        fahrenheit.set(212);
        assert_eq!(celsius.get(), Value::from(100));
        assert_eq!(fahrenheit.get(), 212);
    }

    #[test]
    fn setterless_computed_rejects_writes() {
        let c = computed(|| 1);
        assert_eq!(c.try_set(2), Err(Error::NoSetter));
        // The forgiving method only warns.
        c.set(2);
        assert_eq!(c.get(), 1);
    }

    #[test]
    fn panicking_getter_marks_downstream_and_retries() {
        let source = Ref::new(Value::from(0));
        let attempts = Rc::new(Cell::new(0));
        let c = computed({
            let source = source.clone();
            let attempts = attempts.clone();
            move || {
                let v = source.get().as_int().unwrap_or(0);
                attempts.set(attempts.get() + 1);
                if attempts.get() == 1 {
                    panic!("first attempt fails");
                }
                v
            }
        });
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| c.get()));
        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);

        // The failure did not poison the computed; the next read retries.
        assert_eq!(c.get(), 0);
        assert_eq!(attempts.get(), 2);
    }
}
