//! Reactive Wrapper Factory
//!
//! Wrapping a raw target produces a `Wrapped` handle whose accessors route
//! every read through `track` and every write through `trigger`. Four
//! variants share one read path: {mutable, readonly} x {deep, shallow}.
//!
//! # Guard order
//!
//! Each constructor applies the same early-return guards: primitives and
//! refs pass through unchanged; `mark_raw` targets pass through; an
//! existing wrapper passes through its own constructor (idempotency); a
//! readonly wrapper passes through the mutable constructor unchanged
//! (readonly dominates).
//!
//! # Identity
//!
//! A wrapper is a value handle {raw target, flags}; wrapping the same
//! target with the same flags yields equal handles sharing one target, so
//! identity stability holds by construction, and `to_raw` recovers the
//! underlying target in one step.
//!
//! Readonly wrapping over an already reactive wrapper keeps read tracking
//! (the data underneath can still change); readonly over a raw target does
//! not track at all, since nothing can mutate through any view of it that
//! would notify.

use std::fmt;

use crate::value::{Obj, Value};

/// A reactive or readonly view over a raw target.
///
/// Obtained from [`reactive`], [`readonly`] and their shallow variants;
/// accessors live on [`Value`](crate::value::Value).
#[derive(Clone)]
pub struct Wrapped {
    pub(crate) raw: Obj,
    pub(crate) readonly: bool,
    pub(crate) shallow: bool,
    /// Reads register dependencies. False only for readonly views of raw
    /// targets.
    pub(crate) tracked: bool,
}

impl Wrapped {
    /// The raw target underneath this view.
    pub fn raw(&self) -> &Obj {
        &self.raw
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn is_shallow(&self) -> bool {
        self.shallow
    }
}

impl PartialEq for Wrapped {
    fn eq(&self, other: &Self) -> bool {
        self.raw.ptr_eq(&other.raw)
            && self.readonly == other.readonly
            && self.shallow == other.shallow
            && self.tracked == other.tracked
    }
}

impl Eq for Wrapped {}

impl fmt::Debug for Wrapped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match (self.readonly, self.shallow) {
            (false, false) => "reactive",
            (false, true) => "shallow_reactive",
            (true, false) => "readonly",
            (true, true) => "shallow_readonly",
        };
        write!(f, "{mode}({:?})", self.raw)
    }
}

fn wrap(value: Value, readonly: bool, shallow: bool) -> Value {
    match value {
        Value::Obj(raw) => {
            if raw.skip_wrapping() {
                return Value::Obj(raw);
            }
            Value::Wrapped(Wrapped {
                raw,
                readonly,
                shallow,
                tracked: !readonly,
            })
        }
        Value::Wrapped(existing) => {
            if readonly && !existing.readonly {
                // A readonly view over reactive data still tracks reads.
                Value::Wrapped(Wrapped {
                    raw: existing.raw,
                    readonly: true,
                    shallow,
                    tracked: existing.tracked,
                })
            } else {
                Value::Wrapped(existing)
            }
        }
        other => other,
    }
}

/// Deep mutable wrapper. Reads track, writes trigger, object-valued reads
/// are wrapped lazily.
pub fn reactive(value: Value) -> Value {
    wrap(value, false, false)
}

/// Deep readonly wrapper. Writes are rejected; reads track only when the
/// underlying data is itself reactive.
pub fn readonly(value: Value) -> Value {
    wrap(value, true, false)
}

/// Mutable wrapper without recursive wrapping below the top level.
pub fn shallow_reactive(value: Value) -> Value {
    wrap(value, false, true)
}

/// Readonly wrapper without recursive wrapping below the top level.
pub fn shallow_readonly(value: Value) -> Value {
    wrap(value, true, true)
}

/// True for mutable wrappers and for readonly views over reactive data.
pub fn is_reactive(value: &Value) -> bool {
    matches!(value, Value::Wrapped(w) if w.tracked)
}

pub fn is_readonly(value: &Value) -> bool {
    matches!(value, Value::Wrapped(w) if w.readonly)
}

pub fn is_shallow(value: &Value) -> bool {
    matches!(value, Value::Wrapped(w) if w.shallow)
}

/// True for any wrapper, reactive or readonly.
pub fn is_proxy(value: &Value) -> bool {
    matches!(value, Value::Wrapped(_))
}

pub fn is_ref(value: &Value) -> bool {
    matches!(value, Value::Ref(_))
}

/// Recover the raw target under any wrapping.
pub fn to_raw(value: Value) -> Value {
    match value {
        Value::Wrapped(w) => Value::Obj(w.raw),
        other => other,
    }
}

/// Exempt a target from wrapping: `reactive` and `readonly` return it
/// unchanged from now on. Accepts the raw handle or an existing wrapper.
pub fn mark_raw(value: &Value) {
    match value {
        Value::Obj(o) => o.set_skip_wrapping(),
        Value::Wrapped(w) => w.raw.set_skip_wrapping(),
        _ => {}
    }
}
