//! Reference Cells
//!
//! A `Ref` is a single boxed mutable value with its own dep. It is the
//! reactive container for primitives, and the unwrap target the wrapper
//! layer reaches for when an object field stores a ref.
//!
//! # How Refs Work
//!
//! 1. `get` tracks the ref's dep against the ambient subscriber and
//!    returns a clone of the stored value.
//!
//! 2. `set` compares old and new by identity and only on a real change
//!    stores and triggers. Deep refs (the default) route object values
//!    through the wrapper factory first, so assigning a plain object into
//!    a ref makes it reactive automatically. `Ref::shallow` skips that.
//!
//! 3. Inside a wrapped object, a ref-valued field auto-unwraps on read and
//!    writes through the ref on assignment, preserving ref identity.
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{effect, Ref, Value};
//!
//! let count = Ref::new(Value::from(0));
//! let c = count.clone();
//! effect(move || println!("count = {:?}", c.get()));
//!
//! count.set(Value::from(1)); // prints: count = Int(1)
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::value::Value;

use super::batch;
use super::dep::Dep;
use super::runtime::{self, DepId, Release};
use super::wrap;

pub(crate) struct RefSlot {
    dep: DepId,
    shallow: bool,
    value: RefCell<Value>,
}

impl Drop for RefSlot {
    fn drop(&mut self) {
        runtime::enqueue_release(Release::Dep(self.dep));
    }
}

/// A boxed reactive value. Cloning shares the cell; equality is identity.
#[derive(Clone)]
pub struct Ref {
    inner: Rc<RefSlot>,
}

impl Ref {
    /// A deep ref: object values are wrapped reactive on the way in.
    pub fn new(initial: Value) -> Ref {
        Self::build(initial, false)
    }

    /// A shallow ref: the value is stored as given; only the `value` slot
    /// itself is observable.
    pub fn shallow(initial: Value) -> Ref {
        Self::build(initial, true)
    }

    fn build(initial: Value, shallow: bool) -> Ref {
        let dep = runtime::with(|rt| rt.deps.insert(Dep::new(None)));
        let stored = if shallow {
            initial
        } else {
            wrap::reactive(initial)
        };
        Ref {
            inner: Rc::new(RefSlot {
                dep,
                shallow,
                value: RefCell::new(stored),
            }),
        }
    }

    /// Read the value, registering the ambient subscriber.
    pub fn get(&self) -> Value {
        runtime::with(|rt| {
            rt.track(self.inner.dep);
        });
        self.inner.value.borrow().clone()
    }

    /// Read the value without tracking.
    pub fn peek(&self) -> Value {
        self.inner.value.borrow().clone()
    }

    /// Store a new value; subscribers are notified only when the raw forms
    /// differ by identity.
    pub fn set(&self, value: Value) {
        // Readonly and shallow wrappers are stored as given; rewrapping
        // them would either lose the readonly view or deep-wrap something
        // the caller chose to keep shallow.
        let direct =
            self.inner.shallow || wrap::is_shallow(&value) || wrap::is_readonly(&value);
        let incoming = if direct {
            value
        } else {
            wrap::to_raw(value)
        };
        let unchanged = {
            let current = self.inner.value.borrow();
            let current_cmp = if direct {
                current.clone()
            } else {
                wrap::to_raw(current.clone())
            };
            incoming.same(&current_cmp)
        };
        if unchanged {
            return;
        }
        let stored = if direct {
            incoming
        } else {
            wrap::reactive(incoming)
        };
        *self.inner.value.borrow_mut() = stored;
        let dep = self.inner.dep;
        batch::run_triggers(|rt| rt.trigger_dep(dep));
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Ref) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Ref {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Ref {}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref({:?})", self.inner.value.borrow())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::effect;
    use std::cell::Cell;

    #[test]
    fn get_and_set() {
        let r = Ref::new(Value::from(0));
        assert_eq!(r.get(), Value::from(0));
        r.set(Value::from(42));
        assert_eq!(r.get(), Value::from(42));
    }

    #[test]
    fn set_notifies_subscribers() {
        let r = Ref::new(Value::from(0));
        let seen = Rc::new(Cell::new(-1));
        let _e = effect({
            let r = r.clone();
            let seen = seen.clone();
            move || seen.set(r.get().as_int().unwrap_or(-1))
        });
        assert_eq!(seen.get(), 0);
        r.set(Value::from(7));
        assert_eq!(seen.get(), 7);
    }

    #[test]
    fn same_value_does_not_notify() {
        let r = Ref::new(Value::from(5));
        let runs = Rc::new(Cell::new(0));
        let _e = effect({
            let r = r.clone();
            let runs = runs.clone();
            move || {
                r.get();
                runs.set(runs.get() + 1);
            }
        });
        assert_eq!(runs.get(), 1);
        r.set(Value::from(5));
        assert_eq!(runs.get(), 1);
        r.set(Value::from(6));
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn deep_ref_wraps_objects() {
        let r = Ref::new(Value::new_object());
        assert!(wrap::is_reactive(&r.get()));

        let shallow = Ref::shallow(Value::new_object());
        assert!(!wrap::is_reactive(&shallow.get()));
    }

    #[test]
    fn assigning_same_object_in_different_wrapping_is_not_a_change() {
        let o = crate::value::Obj::new_object();
        let r = Ref::new(Value::Obj(o.clone()));
        let runs = Rc::new(Cell::new(0));
        let _e = effect({
            let r = r.clone();
            let runs = runs.clone();
            move || {
                r.get();
                runs.set(runs.get() + 1);
            }
        });
        assert_eq!(runs.get(), 1);
        // The stored value is the wrapped form of the same target.
        r.set(Value::Obj(o));
        assert_eq!(runs.get(), 1);
    }
}
