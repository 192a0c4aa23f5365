//! Watch
//!
//! Observe a derived source and invoke a callback with the new and previous
//! values when it changes. A thin layer over [`effect`]: the source runs
//! tracked, the callback runs untracked, and the callback only fires when
//! the produced value is observably different.

use super::effect::{effect, Effect};
use super::runtime::untracked;

/// Options accepted by [`watch`].
#[derive(Default, Clone, Copy)]
pub struct WatchOptions {
    /// Fire the callback with the initial value at registration.
    pub immediate: bool,
}

/// Re-evaluate `source` whenever its dependencies change and hand
/// `(new, old)` to `callback` when the result differs. The previous value
/// is `None` on the immediate first call.
///
/// Returns the underlying effect handle; `stop` ends the watch.
pub fn watch<T, S, C>(mut source: S, mut callback: C, options: WatchOptions) -> Effect
where
    T: Clone + PartialEq + 'static,
    S: FnMut() -> T + 'static,
    C: FnMut(&T, Option<&T>) + 'static,
{
    let mut previous: Option<T> = None;
    let mut first = true;
    effect(move || {
        let next = source();
        let changed = match &previous {
            Some(prev) => *prev != next,
            None => true,
        };
        if changed {
            if !first || options.immediate {
                let prev = previous.take();
                untracked(|| callback(&next, prev.as_ref()));
            }
            previous = Some(next);
        }
        first = false;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::refs::Ref;
    use crate::value::Value;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn fires_with_new_and_old_on_change_only() {
        let r = Ref::new(Value::from(1));
        let calls: Rc<RefCell<Vec<(i64, Option<i64>)>>> = Rc::new(RefCell::new(Vec::new()));
        let _w = watch(
            {
                let r = r.clone();
                move || r.get().as_int().unwrap_or(0)
            },
            {
                let calls = calls.clone();
                move |new: &i64, old: Option<&i64>| {
                    calls.borrow_mut().push((*new, old.copied()));
                }
            },
            WatchOptions::default(),
        );
        // No immediate call by default.
        assert!(calls.borrow().is_empty());

        r.set(Value::from(2));
        assert_eq!(calls.borrow().as_slice(), &[(2, Some(1))]);

        // Re-setting the same value does not fire.
        r.set(Value::from(2));
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn immediate_fires_at_registration_without_previous() {
        let r = Ref::new(Value::from(7));
        let calls: Rc<RefCell<Vec<(i64, Option<i64>)>>> = Rc::new(RefCell::new(Vec::new()));
        let _w = watch(
            {
                let r = r.clone();
                move || r.get().as_int().unwrap_or(0)
            },
            {
                let calls = calls.clone();
                move |new: &i64, old: Option<&i64>| {
                    calls.borrow_mut().push((*new, old.copied()));
                }
            },
            WatchOptions { immediate: true },
        );
        assert_eq!(calls.borrow().as_slice(), &[(7, None)]);
    }

    #[test]
    fn callback_reads_are_not_tracked() {
        let watched = Ref::new(Value::from(0));
        let peeked = Ref::new(Value::from(100));
        let fired = Rc::new(RefCell::new(0));
        let _w = watch(
            {
                let watched = watched.clone();
                move || watched.get().as_int().unwrap_or(0)
            },
            {
                let peeked = peeked.clone();
                let fired = fired.clone();
                move |_new: &i64, _old: Option<&i64>| {
                    peeked.get();
                    *fired.borrow_mut() += 1;
                }
            },
            WatchOptions::default(),
        );
        watched.set(Value::from(1));
        assert_eq!(*fired.borrow(), 1);

        // Mutating the value read only by the callback must not re-fire.
        peeked.set(Value::from(101));
        assert_eq!(*fired.borrow(), 1);
    }

    #[test]
    fn stop_ends_the_watch() {
        let r = Ref::new(Value::from(0));
        let fired = Rc::new(RefCell::new(0));
        let w = watch(
            {
                let r = r.clone();
                move || r.get().as_int().unwrap_or(0)
            },
            {
                let fired = fired.clone();
                move |_: &i64, _: Option<&i64>| *fired.borrow_mut() += 1
            },
            WatchOptions::default(),
        );
        r.set(Value::from(1));
        assert_eq!(*fired.borrow(), 1);
        w.stop();
        r.set(Value::from(2));
        assert_eq!(*fired.borrow(), 1);
    }
}
