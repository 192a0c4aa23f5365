//! Dynamic Value Model
//!
//! Rust has no proxy-trap facility, so transparent interception is realized
//! as an indirection layer: reactive data lives in a small dynamic value
//! model, and every read or write goes through engine methods instead of
//! direct field access.
//!
//! # Concepts
//!
//! ## Value
//!
//! A `Value` is either a primitive (`Null`, `Bool`, `Int`, `Float`, `Str`)
//! or a handle: a raw target (`Obj`), a reactive wrapper over a raw target
//! (`Wrapped`), or a reference cell (`Ref`). Primitives are compared by
//! content, handles by identity, mirroring `Object.is` semantics.
//!
//! ## Raw targets
//!
//! An `Obj` is a shared handle to one raw target: a plain object (ordered
//! string-keyed map), an array, a map, or a set. Raw targets are inert;
//! reading or mutating them through `Obj` never tracks or triggers. The
//! reactive behavior comes from wrapping them with
//! [`reactive`](crate::reactive::reactive) and friends.
//!
//! # Identity and reclamation
//!
//! Every raw target carries a unique id. The engine keeps its dependency
//! bookkeeping in a side table keyed by that id, so wrapping never mutates
//! the target itself, and dropping the last handle to a target enqueues a
//! release record that lets the engine prune the bookkeeping.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::{IndexMap, IndexSet};

use crate::reactive::refs::Ref;
use crate::reactive::runtime::{self, Release};
use crate::reactive::wrap::Wrapped;

mod json;

/// Counter for generating unique target IDs.
static TARGET_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_target_id() -> u64 {
    TARGET_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Property key: a name or an integer index.
///
/// Objects and maps accept both forms; array access expects a non-negative
/// integer key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Str(Rc<str>),
    Int(i64),
}

impl Key {
    /// The key as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::Str(s) => Some(s),
            Key::Int(_) => None,
        }
    }

    /// The key as an array index, if it is a non-negative integer.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Key::Int(i) if *i >= 0 => Some(*i as usize),
            _ => None,
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Str(s) => write!(f, "{s:?}"),
            Key::Int(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(Rc::from(s))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(Rc::from(s.as_str()))
    }
}

impl From<i32> for Key {
    fn from(i: i32) -> Self {
        Key::Int(i as i64)
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

impl From<usize> for Key {
    fn from(i: usize) -> Self {
        Key::Int(i as i64)
    }
}

/// Body of a raw target.
pub(crate) enum Body {
    Object(IndexMap<Key, Value>),
    Array(Vec<Value>),
    Map(IndexMap<Key, Value>),
    Set(IndexSet<Key>),
}

impl Body {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Body::Object(_) => "object",
            Body::Array(_) => "array",
            Body::Map(_) => "map",
            Body::Set(_) => "set",
        }
    }
}

pub(crate) struct RawTarget {
    id: u64,
    skip: Cell<bool>,
    pub(crate) body: RefCell<Body>,
}

impl Drop for RawTarget {
    fn drop(&mut self) {
        runtime::enqueue_release(Release::Target(self.id));
    }
}

/// Shared handle to a raw (unwrapped) target.
///
/// Cloning shares the underlying storage; equality is identity.
#[derive(Clone)]
pub struct Obj {
    pub(crate) inner: Rc<RawTarget>,
}

impl Obj {
    pub(crate) fn from_body(body: Body) -> Self {
        Obj {
            inner: Rc::new(RawTarget {
                id: next_target_id(),
                skip: Cell::new(false),
                body: RefCell::new(body),
            }),
        }
    }

    /// A new empty plain object.
    pub fn new_object() -> Self {
        Self::from_body(Body::Object(IndexMap::new()))
    }

    /// A new empty array.
    pub fn new_array() -> Self {
        Self::from_body(Body::Array(Vec::new()))
    }

    /// A new empty map.
    pub fn new_map() -> Self {
        Self::from_body(Body::Map(IndexMap::new()))
    }

    /// A new empty set.
    pub fn new_set() -> Self {
        Self::from_body(Body::Set(IndexSet::new()))
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    pub(crate) fn body(&self) -> &RefCell<Body> {
        &self.inner.body
    }

    /// The structural kind of this target: `"object"`, `"array"`, `"map"`
    /// or `"set"`.
    pub fn kind(&self) -> &'static str {
        self.inner.body.borrow().kind()
    }

    pub(crate) fn skip_wrapping(&self) -> bool {
        self.inner.skip.get()
    }

    pub(crate) fn set_skip_wrapping(&self) {
        self.inner.skip.set(true);
    }

    /// Identity comparison: true when both handles share one target.
    pub fn ptr_eq(&self, other: &Obj) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Obj {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Obj {}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Obj({}#{})", self.kind(), self.id())
    }
}

/// A dynamic value.
///
/// See the module docs for the model. `Clone` is cheap: handle variants
/// share their storage.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    /// Raw target handle. Reads and writes through it are untracked.
    Obj(Obj),
    /// Reactive (or readonly) wrapper over a raw target.
    Wrapped(Wrapped),
    /// Reference cell.
    Ref(Ref),
}

impl Value {
    /// A new empty plain object, as a value.
    pub fn new_object() -> Value {
        Value::Obj(Obj::new_object())
    }

    /// A new empty array, as a value.
    pub fn new_array() -> Value {
        Value::Obj(Obj::new_array())
    }

    /// A new empty map, as a value.
    pub fn new_map() -> Value {
        Value::Obj(Obj::new_map())
    }

    /// A new empty set, as a value.
    pub fn new_set() -> Value {
        Value::Obj(Obj::new_set())
    }

    /// Identity comparison with `Object.is` semantics: primitives by
    /// content (floats by bit pattern, so NaN equals NaN and +0.0 and -0.0
    /// differ), handles by identity.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Obj(a), Value::Obj(b)) => a.ptr_eq(b),
            (Value::Wrapped(a), Value::Wrapped(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => a == b,
            _ => false,
        }
    }

    /// The kind of this value, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Obj(o) => o.kind(),
            Value::Wrapped(w) => w.raw().kind(),
            Value::Ref(_) => "ref",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_obj(&self) -> Option<&Obj> {
        match self {
            Value::Obj(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_wrapped(&self) -> Option<&Wrapped> {
        match self {
            Value::Wrapped(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_ref_value(&self) -> Option<&Ref> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Obj(o) => write!(f, "{o:?}"),
            Value::Wrapped(w) => write!(f, "{w:?}"),
            Value::Ref(r) => write!(f, "{r:?}"),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s.as_str()))
    }
}

impl From<Obj> for Value {
    fn from(o: Obj) -> Self {
        Value::Obj(o)
    }
}

impl From<Wrapped> for Value {
    fn from(w: Wrapped) -> Self {
        Value::Wrapped(w)
    }
}

impl From<Ref> for Value {
    fn from(r: Ref) -> Self {
        Value::Ref(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_ids_are_unique() {
        let a = Obj::new_object();
        let b = Obj::new_object();
        let c = Obj::new_array();

        assert_ne!(a.id(), b.id());
        assert_ne!(b.id(), c.id());
    }

    #[test]
    fn identity_semantics() {
        let o = Obj::new_object();
        assert_eq!(Value::Obj(o.clone()), Value::Obj(o.clone()));
        assert_ne!(Value::Obj(o), Value::Obj(Obj::new_object()));

        // Primitives compare by content.
        assert_eq!(Value::from("abc"), Value::from("abc"));
        assert_eq!(Value::from(1), Value::from(1));
        assert_ne!(Value::from(1), Value::from(1.0));

        // Object.is float behavior.
        assert_eq!(Value::from(f64::NAN), Value::from(f64::NAN));
        assert_ne!(Value::from(0.0), Value::from(-0.0));
    }

    #[test]
    fn kind_names() {
        assert_eq!(Value::new_object().kind(), "object");
        assert_eq!(Value::new_array().kind(), "array");
        assert_eq!(Value::new_map().kind(), "map");
        assert_eq!(Value::new_set().kind(), "set");
        assert_eq!(Value::Null.kind(), "null");
        assert_eq!(Value::from(1).kind(), "int");
    }

    #[test]
    fn key_conversions() {
        assert_eq!(Key::from("a").as_str(), Some("a"));
        assert_eq!(Key::from(3usize).as_index(), Some(3));
        assert_eq!(Key::from(-1i64).as_index(), None);
        assert_eq!(Key::from("a").as_index(), None);
    }
}
