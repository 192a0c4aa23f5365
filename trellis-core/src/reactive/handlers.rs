//! Property Access Handlers
//!
//! The accessor surface of wrapped targets: the dynamic operations on
//! [`Value`] dispatch to these handlers when the value is a wrapper, and to
//! plain untracked storage access when it is a raw handle. Primitives
//! accept none of the operations and report a kind mismatch.
//!
//! Read path, shared by all wrapper variants: read the slot, register the
//! dependency (unless the view is untracked), auto-unwrap ref-valued slots
//! (except array elements), and lazily wrap object-valued results with the
//! view's own flags. Write path: reject readonly, unwrap the incoming
//! value to raw form (deep views), write through a ref-valued slot when
//! one is there, and trigger the dep set the operation semantics call for.
//!
//! Array mutators operate on the raw storage directly, so none of their
//! internal bookkeeping reads are ever tracked, and they trigger the
//! precise dep set themselves. Identity-sensitive searches compare both
//! as-given and through raw unwrapping, so wrapped and raw forms of one
//! target find each other.

use crate::error::Error;
use crate::value::{Body, Key, Obj, Value};

use super::batch;
use super::dep::{DepKey, TargetOp};
use super::runtime;
use super::wrap::{to_raw, Wrapped};

fn key_value(key: Key) -> Value {
    match key {
        Key::Str(s) => Value::Str(s),
        Key::Int(i) => Value::Int(i),
    }
}

enum Post {
    None,
    RefWrite(crate::reactive::refs::Ref, Value),
    Op(TargetOp),
}

enum Snapshot {
    Array(Vec<Value>),
    Object(Vec<(Key, Value)>),
    Map(Vec<(Key, Value)>),
    Set(Vec<Key>),
}

impl Wrapped {
    fn track_key(&self, key: DepKey) {
        if !self.tracked {
            return;
        }
        let id = self.raw.id();
        runtime::with(|rt| rt.track_target(id, key));
    }

    fn fire(&self, op: TargetOp) {
        let id = self.raw.id();
        batch::run_triggers(|rt| rt.trigger_op(id, op));
    }

    fn store_form(&self, value: Value) -> Value {
        if self.shallow {
            value
        } else {
            to_raw(value)
        }
    }

    fn read_value(&self, value: Value, array_index: bool) -> Value {
        if let Value::Ref(r) = &value {
            if !array_index {
                return r.get();
            }
        }
        if self.shallow {
            return value;
        }
        match value {
            Value::Obj(o) => {
                if o.skip_wrapping() {
                    return Value::Obj(o);
                }
                Value::Wrapped(Wrapped {
                    raw: o,
                    readonly: self.readonly,
                    shallow: false,
                    tracked: self.tracked,
                })
            }
            other => other,
        }
    }

    fn is_map_target(&self) -> bool {
        matches!(&*self.raw.body().borrow(), Body::Map(_))
    }

    pub(crate) fn get_key(&self, key: &Key) -> Value {
        let (value, array_index) = {
            let body = self.raw.body().borrow();
            match &*body {
                Body::Object(m) | Body::Map(m) => {
                    (m.get(key).cloned().unwrap_or(Value::Null), false)
                }
                Body::Array(items) => match key.as_index() {
                    Some(i) => (items.get(i).cloned().unwrap_or(Value::Null), true),
                    None => (Value::Null, true),
                },
                Body::Set(_) => (Value::Null, false),
            }
        };
        self.track_key(DepKey::Prop(key.clone()));
        self.read_value(value, array_index)
    }

    pub(crate) fn set_key(&self, key: Key, value: Value) -> Result<(), Error> {
        if self.readonly {
            return Err(Error::ReadonlyWrite);
        }
        let map_target = self.is_map_target();
        let post = {
            let mut body = self.raw.body().borrow_mut();
            match &mut *body {
                Body::Object(m) | Body::Map(m) => {
                    let existing = m.get(&key).cloned();
                    match existing {
                        // An assigned plain value writes through a
                        // ref-valued slot, keeping the ref's identity.
                        Some(Value::Ref(r)) if !matches!(value, Value::Ref(_)) => {
                            Post::RefWrite(r, value)
                        }
                        Some(old) => {
                            let stored = self.store_form(value);
                            let old_cmp = if self.shallow { old } else { to_raw(old) };
                            if stored.same(&old_cmp) {
                                Post::None
                            } else {
                                m.insert(key.clone(), stored);
                                Post::Op(TargetOp::Set { key, map_target })
                            }
                        }
                        None => {
                            let stored = self.store_form(value);
                            m.insert(key.clone(), stored);
                            Post::Op(TargetOp::Add {
                                key,
                                array_index: false,
                                map_target,
                            })
                        }
                    }
                }
                Body::Array(items) => {
                    let Some(i) = key.as_index() else {
                        return Err(Error::WrongKind {
                            op: "set with a non-index key",
                            kind: "array",
                        });
                    };
                    let stored = self.store_form(value);
                    if i < items.len() {
                        let old = items[i].clone();
                        let old_cmp = if self.shallow { old } else { to_raw(old) };
                        if stored.same(&old_cmp) {
                            Post::None
                        } else {
                            items[i] = stored;
                            Post::Op(TargetOp::Set {
                                key: Key::Int(i as i64),
                                map_target: false,
                            })
                        }
                    } else {
                        if i > items.len() {
                            items.resize(i, Value::Null);
                        }
                        items.push(stored);
                        Post::Op(TargetOp::Add {
                            key: Key::Int(i as i64),
                            array_index: true,
                            map_target: false,
                        })
                    }
                }
                Body::Set(_) => {
                    return Err(Error::WrongKind {
                        op: "set",
                        kind: "set",
                    });
                }
            }
        };
        match post {
            Post::None => Ok(()),
            Post::RefWrite(r, value) => {
                r.set(value);
                Ok(())
            }
            Post::Op(op) => {
                self.fire(op);
                Ok(())
            }
        }
    }

    pub(crate) fn has_key(&self, key: &Key) -> bool {
        self.track_key(DepKey::Prop(key.clone()));
        let body = self.raw.body().borrow();
        match &*body {
            Body::Object(m) | Body::Map(m) => m.contains_key(key),
            Body::Set(s) => s.contains(key),
            Body::Array(items) => key.as_index().map(|i| i < items.len()).unwrap_or(false),
        }
    }

    pub(crate) fn delete_key(&self, key: &Key) -> Result<bool, Error> {
        if self.readonly {
            return Err(Error::ReadonlyWrite);
        }
        let map_target = self.is_map_target();
        let op = {
            let mut body = self.raw.body().borrow_mut();
            match &mut *body {
                Body::Object(m) | Body::Map(m) => {
                    m.shift_remove(key).map(|_| TargetOp::Delete {
                        key: key.clone(),
                        array_index: false,
                        map_target,
                    })
                }
                Body::Set(s) => s.shift_remove(key).then(|| TargetOp::Delete {
                    key: key.clone(),
                    array_index: false,
                    map_target: false,
                }),
                Body::Array(items) => match key.as_index() {
                    // Deleting an array slot empties it without resizing.
                    Some(i) if i < items.len() => {
                        items[i] = Value::Null;
                        Some(TargetOp::Delete {
                            key: Key::Int(i as i64),
                            array_index: true,
                            map_target: false,
                        })
                    }
                    _ => None,
                },
            }
        };
        match op {
            Some(op) => {
                self.fire(op);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub(crate) fn len_op(&self) -> usize {
        let (len, dep_key) = {
            let body = self.raw.body().borrow();
            match &*body {
                Body::Array(items) => (items.len(), DepKey::Length),
                Body::Object(m) | Body::Map(m) => (m.len(), DepKey::Iterate),
                Body::Set(s) => (s.len(), DepKey::Iterate),
            }
        };
        self.track_key(dep_key);
        len
    }

    pub(crate) fn keys_op(&self) -> Vec<Key> {
        let (keys, dep_key) = {
            let body = self.raw.body().borrow();
            match &*body {
                Body::Array(items) => (
                    (0..items.len()).map(|i| Key::Int(i as i64)).collect(),
                    DepKey::Length,
                ),
                Body::Object(m) => (m.keys().cloned().collect(), DepKey::Iterate),
                Body::Map(m) => (m.keys().cloned().collect(), DepKey::MapKeyIterate),
                Body::Set(s) => (s.iter().cloned().collect(), DepKey::Iterate),
            }
        };
        self.track_key(dep_key);
        keys
    }

    fn snapshot(&self) -> Snapshot {
        let body = self.raw.body().borrow();
        match &*body {
            Body::Array(items) => Snapshot::Array(items.clone()),
            Body::Object(m) => {
                Snapshot::Object(m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            }
            Body::Map(m) => Snapshot::Map(m.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            Body::Set(s) => Snapshot::Set(s.iter().cloned().collect()),
        }
    }

    pub(crate) fn values_op(&self) -> Vec<Value> {
        match self.snapshot() {
            Snapshot::Array(items) => {
                self.track_key(DepKey::ArrayIterate);
                self.track_key(DepKey::Length);
                items
                    .into_iter()
                    .map(|v| self.read_value(v, true))
                    .collect()
            }
            Snapshot::Object(entries) => {
                // Object iteration reads every property, so it depends on
                // each of them as well as on the key set.
                self.track_key(DepKey::Iterate);
                entries
                    .into_iter()
                    .map(|(k, v)| {
                        self.track_key(DepKey::Prop(k));
                        self.read_value(v, false)
                    })
                    .collect()
            }
            Snapshot::Map(entries) => {
                self.track_key(DepKey::Iterate);
                entries
                    .into_iter()
                    .map(|(_, v)| self.read_value(v, false))
                    .collect()
            }
            Snapshot::Set(keys) => {
                self.track_key(DepKey::Iterate);
                keys.into_iter().map(key_value).collect()
            }
        }
    }

    pub(crate) fn entries_op(&self) -> Vec<(Key, Value)> {
        match self.snapshot() {
            Snapshot::Array(items) => {
                self.track_key(DepKey::ArrayIterate);
                self.track_key(DepKey::Length);
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| (Key::Int(i as i64), self.read_value(v, true)))
                    .collect()
            }
            Snapshot::Object(entries) => {
                self.track_key(DepKey::Iterate);
                entries
                    .into_iter()
                    .map(|(k, v)| {
                        self.track_key(DepKey::Prop(k.clone()));
                        (k, self.read_value(v, false))
                    })
                    .collect()
            }
            Snapshot::Map(entries) => {
                self.track_key(DepKey::Iterate);
                entries
                    .into_iter()
                    .map(|(k, v)| (k, self.read_value(v, false)))
                    .collect()
            }
            Snapshot::Set(keys) => {
                self.track_key(DepKey::Iterate);
                keys.into_iter().map(|k| (k.clone(), key_value(k))).collect()
            }
        }
    }

    pub(crate) fn clear_op(&self) -> Result<(), Error> {
        if self.readonly {
            return Err(Error::ReadonlyWrite);
        }
        let cleared = {
            let mut body = self.raw.body().borrow_mut();
            match &mut *body {
                Body::Map(m) => {
                    let had = !m.is_empty();
                    m.clear();
                    had
                }
                Body::Set(s) => {
                    let had = !s.is_empty();
                    s.clear();
                    had
                }
                other => {
                    return Err(Error::WrongKind {
                        op: "clear",
                        kind: other.kind(),
                    });
                }
            }
        };
        if cleared {
            self.fire(TargetOp::Clear);
        }
        Ok(())
    }

    pub(crate) fn add_key(&self, key: Key) -> Result<(), Error> {
        if self.readonly {
            return Err(Error::ReadonlyWrite);
        }
        let added = {
            let mut body = self.raw.body().borrow_mut();
            match &mut *body {
                Body::Set(s) => s.insert(key.clone()),
                other => {
                    return Err(Error::WrongKind {
                        op: "add",
                        kind: other.kind(),
                    });
                }
            }
        };
        if added {
            self.fire(TargetOp::Add {
                key,
                array_index: false,
                map_target: false,
            });
        }
        Ok(())
    }

    fn with_array<R>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut Vec<Value>) -> R,
    ) -> Result<R, Error> {
        if self.readonly {
            return Err(Error::ReadonlyWrite);
        }
        let mut body = self.raw.body().borrow_mut();
        match &mut *body {
            Body::Array(items) => Ok(f(items)),
            other => Err(Error::WrongKind {
                op,
                kind: other.kind(),
            }),
        }
    }

    pub(crate) fn push_op(&self, value: Value) -> Result<usize, Error> {
        let stored = self.store_form(value);
        let (index, len) = self.with_array("push", |items| {
            items.push(stored);
            (items.len() - 1, items.len())
        })?;
        self.fire(TargetOp::Add {
            key: Key::Int(index as i64),
            array_index: true,
            map_target: false,
        });
        Ok(len)
    }

    pub(crate) fn pop_op(&self) -> Result<Value, Error> {
        let (removed, start) = self.with_array("pop", |items| {
            let removed = items.pop();
            (removed, items.len())
        })?;
        match removed {
            Some(v) => {
                self.fire(TargetOp::Splice { start });
                Ok(self.read_value(v, true))
            }
            None => Ok(Value::Null),
        }
    }

    pub(crate) fn shift_op(&self) -> Result<Value, Error> {
        let removed = self.with_array("shift", |items| {
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        })?;
        match removed {
            Some(v) => {
                self.fire(TargetOp::Splice { start: 0 });
                Ok(self.read_value(v, true))
            }
            None => Ok(Value::Null),
        }
    }

    pub(crate) fn unshift_op(&self, value: Value) -> Result<usize, Error> {
        let stored = self.store_form(value);
        let len = self.with_array("unshift", |items| {
            items.insert(0, stored);
            items.len()
        })?;
        self.fire(TargetOp::Splice { start: 0 });
        Ok(len)
    }

    pub(crate) fn splice_op(
        &self,
        start: usize,
        delete_count: usize,
        new_items: Vec<Value>,
    ) -> Result<Vec<Value>, Error> {
        let stored: Vec<Value> = new_items.into_iter().map(|v| self.store_form(v)).collect();
        let inserted = stored.len();
        let (removed, start) = self.with_array("splice", |items| {
            let start = start.min(items.len());
            let end = (start + delete_count).min(items.len());
            let removed: Vec<Value> = items.splice(start..end, stored).collect();
            (removed, start)
        })?;
        if !removed.is_empty() || inserted > 0 {
            self.fire(TargetOp::Splice { start });
        }
        Ok(removed
            .into_iter()
            .map(|v| self.read_value(v, true))
            .collect())
    }

    pub(crate) fn set_len_op(&self, new_len: usize) -> Result<(), Error> {
        enum Change {
            Shrink,
            Grow,
            NoChange,
        }
        let change = self.with_array("set_len", |items| {
            if new_len < items.len() {
                items.truncate(new_len);
                Change::Shrink
            } else if new_len > items.len() {
                items.resize(new_len, Value::Null);
                Change::Grow
            } else {
                Change::NoChange
            }
        })?;
        match change {
            Change::Shrink => self.fire(TargetOp::LengthShrink { new_len }),
            Change::Grow => self.fire(TargetOp::LengthGrow),
            Change::NoChange => {}
        }
        Ok(())
    }

    pub(crate) fn search_op(&self, needle: &Value, from_end: bool) -> Option<usize> {
        self.track_key(DepKey::ArrayIterate);
        self.track_key(DepKey::Length);
        let body = self.raw.body().borrow();
        let Body::Array(items) = &*body else {
            return None;
        };
        // Elements are stored raw; a caller may search with either form.
        let raw_needle = to_raw(needle.clone());
        let matches = |item: &Value| item.same(needle) || to_raw(item.clone()).same(&raw_needle);
        if from_end {
            items.iter().rposition(matches)
        } else {
            items.iter().position(matches)
        }
    }
}

// ---------------------------------------------------------------------------
// Raw (untracked) storage access
// ---------------------------------------------------------------------------

fn raw_get(o: &Obj, key: &Key) -> Value {
    let body = o.body().borrow();
    match &*body {
        Body::Object(m) | Body::Map(m) => m.get(key).cloned().unwrap_or(Value::Null),
        Body::Array(items) => key
            .as_index()
            .and_then(|i| items.get(i).cloned())
            .unwrap_or(Value::Null),
        Body::Set(_) => Value::Null,
    }
}

fn raw_set(o: &Obj, key: Key, value: Value) -> Result<(), Error> {
    let mut body = o.body().borrow_mut();
    match &mut *body {
        Body::Object(m) | Body::Map(m) => {
            m.insert(key, value);
            Ok(())
        }
        Body::Array(items) => {
            let Some(i) = key.as_index() else {
                return Err(Error::WrongKind {
                    op: "set with a non-index key",
                    kind: "array",
                });
            };
            if i >= items.len() {
                items.resize(i + 1, Value::Null);
            }
            items[i] = value;
            Ok(())
        }
        Body::Set(_) => Err(Error::WrongKind {
            op: "set",
            kind: "set",
        }),
    }
}

fn raw_has(o: &Obj, key: &Key) -> bool {
    let body = o.body().borrow();
    match &*body {
        Body::Object(m) | Body::Map(m) => m.contains_key(key),
        Body::Set(s) => s.contains(key),
        Body::Array(items) => key.as_index().map(|i| i < items.len()).unwrap_or(false),
    }
}

fn raw_delete(o: &Obj, key: &Key) -> bool {
    let mut body = o.body().borrow_mut();
    match &mut *body {
        Body::Object(m) | Body::Map(m) => m.shift_remove(key).is_some(),
        Body::Set(s) => s.shift_remove(key),
        Body::Array(items) => match key.as_index() {
            Some(i) if i < items.len() => {
                items[i] = Value::Null;
                true
            }
            _ => false,
        },
    }
}

fn raw_len(o: &Obj) -> usize {
    let body = o.body().borrow();
    match &*body {
        Body::Object(m) | Body::Map(m) => m.len(),
        Body::Array(items) => items.len(),
        Body::Set(s) => s.len(),
    }
}

fn raw_keys(o: &Obj) -> Vec<Key> {
    let body = o.body().borrow();
    match &*body {
        Body::Object(m) | Body::Map(m) => m.keys().cloned().collect(),
        Body::Array(items) => (0..items.len()).map(|i| Key::Int(i as i64)).collect(),
        Body::Set(s) => s.iter().cloned().collect(),
    }
}

fn raw_values(o: &Obj) -> Vec<Value> {
    let body = o.body().borrow();
    match &*body {
        Body::Object(m) | Body::Map(m) => m.values().cloned().collect(),
        Body::Array(items) => items.clone(),
        Body::Set(s) => s.iter().cloned().map(key_value).collect(),
    }
}

fn raw_entries(o: &Obj) -> Vec<(Key, Value)> {
    let body = o.body().borrow();
    match &*body {
        Body::Object(m) | Body::Map(m) => {
            m.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        }
        Body::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (Key::Int(i as i64), v.clone()))
            .collect(),
        Body::Set(s) => s.iter().map(|k| (k.clone(), key_value(k.clone()))).collect(),
    }
}

// ---------------------------------------------------------------------------
// Dynamic operations on Value
// ---------------------------------------------------------------------------

fn wrong_kind(op: &'static str, value: &Value) -> Error {
    Error::WrongKind {
        op,
        kind: value.kind(),
    }
}

fn warn_ignored(err: &Error) {
    tracing::warn!(error = %err, "operation ignored");
}

impl Value {
    /// Read a slot. On a wrapper this tracks the dependency, auto-unwraps
    /// ref-valued slots (except array elements), and lazily wraps
    /// object-valued results. Missing slots read as `Null`.
    pub fn get(&self, key: impl Into<Key>) -> Value {
        let key = key.into();
        match self {
            Value::Wrapped(w) => w.get_key(&key),
            Value::Obj(o) => raw_get(o, &key),
            other => {
                warn_ignored(&wrong_kind("get", other));
                Value::Null
            }
        }
    }

    /// Write a slot; violations (readonly view, kind mismatch) warn and
    /// leave the data untouched.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) {
        if let Err(err) = self.try_set(key, value) {
            warn_ignored(&err);
        }
    }

    /// Write a slot, surfacing violations as errors.
    pub fn try_set(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<(), Error> {
        let key = key.into();
        let value = value.into();
        match self {
            Value::Wrapped(w) => w.set_key(key, value),
            Value::Obj(o) => raw_set(o, key, value),
            other => Err(wrong_kind("set", other)),
        }
    }

    /// Membership test; tracked on wrappers.
    pub fn has(&self, key: impl Into<Key>) -> bool {
        let key = key.into();
        match self {
            Value::Wrapped(w) => w.has_key(&key),
            Value::Obj(o) => raw_has(o, &key),
            _ => false,
        }
    }

    /// Remove a slot; true when something was removed.
    pub fn delete(&self, key: impl Into<Key>) -> bool {
        let key = key.into();
        match self {
            Value::Wrapped(w) => match w.delete_key(&key) {
                Ok(removed) => removed,
                Err(err) => {
                    warn_ignored(&err);
                    false
                }
            },
            Value::Obj(o) => raw_delete(o, &key),
            _ => false,
        }
    }

    /// Element count: array length, or entry count for objects, maps and
    /// sets. Tracked on wrappers.
    pub fn len(&self) -> usize {
        match self {
            Value::Wrapped(w) => w.len_op(),
            Value::Obj(o) => raw_len(o),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Key enumeration. Tracked on wrappers.
    pub fn keys(&self) -> Vec<Key> {
        match self {
            Value::Wrapped(w) => w.keys_op(),
            Value::Obj(o) => raw_keys(o),
            _ => Vec::new(),
        }
    }

    /// Value iteration. Tracked on wrappers; results are wrapped lazily.
    pub fn values(&self) -> Vec<Value> {
        match self {
            Value::Wrapped(w) => w.values_op(),
            Value::Obj(o) => raw_values(o),
            _ => Vec::new(),
        }
    }

    /// Entry iteration. Tracked on wrappers; results are wrapped lazily.
    pub fn entries(&self) -> Vec<(Key, Value)> {
        match self {
            Value::Wrapped(w) => w.entries_op(),
            Value::Obj(o) => raw_entries(o),
            _ => Vec::new(),
        }
    }

    /// Remove every entry of a map or set, invalidating all of its deps.
    pub fn clear(&self) {
        match self {
            Value::Wrapped(w) => {
                if let Err(err) = w.clear_op() {
                    warn_ignored(&err);
                }
            }
            Value::Obj(o) => {
                let mut body = o.body().borrow_mut();
                match &mut *body {
                    Body::Map(m) => m.clear(),
                    Body::Set(s) => s.clear(),
                    other => warn_ignored(&Error::WrongKind {
                        op: "clear",
                        kind: other.kind(),
                    }),
                }
            }
            other => warn_ignored(&wrong_kind("clear", other)),
        }
    }

    /// Insert an element into a set.
    pub fn add(&self, key: impl Into<Key>) {
        let key = key.into();
        match self {
            Value::Wrapped(w) => {
                if let Err(err) = w.add_key(key) {
                    warn_ignored(&err);
                }
            }
            Value::Obj(o) => {
                let mut body = o.body().borrow_mut();
                match &mut *body {
                    Body::Set(s) => {
                        s.insert(key);
                    }
                    other => warn_ignored(&Error::WrongKind {
                        op: "add",
                        kind: other.kind(),
                    }),
                }
            }
            other => warn_ignored(&wrong_kind("add", other)),
        }
    }

    /// Append to an array.
    pub fn push(&self, value: impl Into<Value>) {
        let value = value.into();
        match self {
            Value::Wrapped(w) => {
                if let Err(err) = w.push_op(value) {
                    warn_ignored(&err);
                }
            }
            Value::Obj(o) => {
                if let Err(err) = raw_set(o, Key::Int(raw_len(o) as i64), value) {
                    warn_ignored(&err);
                }
            }
            other => warn_ignored(&wrong_kind("push", other)),
        }
    }

    /// Remove and return the last array element, `Null` when empty.
    pub fn pop(&self) -> Value {
        match self {
            Value::Wrapped(w) => match w.pop_op() {
                Ok(v) => v,
                Err(err) => {
                    warn_ignored(&err);
                    Value::Null
                }
            },
            Value::Obj(o) => {
                let mut body = o.body().borrow_mut();
                match &mut *body {
                    Body::Array(items) => items.pop().unwrap_or(Value::Null),
                    other => {
                        warn_ignored(&Error::WrongKind {
                            op: "pop",
                            kind: other.kind(),
                        });
                        Value::Null
                    }
                }
            }
            other => {
                warn_ignored(&wrong_kind("pop", other));
                Value::Null
            }
        }
    }

    /// Remove and return the first array element, `Null` when empty.
    pub fn shift(&self) -> Value {
        match self {
            Value::Wrapped(w) => match w.shift_op() {
                Ok(v) => v,
                Err(err) => {
                    warn_ignored(&err);
                    Value::Null
                }
            },
            Value::Obj(o) => {
                let mut body = o.body().borrow_mut();
                match &mut *body {
                    Body::Array(items) => {
                        if items.is_empty() {
                            Value::Null
                        } else {
                            items.remove(0)
                        }
                    }
                    other => {
                        warn_ignored(&Error::WrongKind {
                            op: "shift",
                            kind: other.kind(),
                        });
                        Value::Null
                    }
                }
            }
            other => {
                warn_ignored(&wrong_kind("shift", other));
                Value::Null
            }
        }
    }

    /// Prepend to an array.
    pub fn unshift(&self, value: impl Into<Value>) {
        let value = value.into();
        match self {
            Value::Wrapped(w) => {
                if let Err(err) = w.unshift_op(value) {
                    warn_ignored(&err);
                }
            }
            Value::Obj(o) => {
                let mut body = o.body().borrow_mut();
                match &mut *body {
                    Body::Array(items) => items.insert(0, value),
                    other => warn_ignored(&Error::WrongKind {
                        op: "unshift",
                        kind: other.kind(),
                    }),
                }
            }
            other => warn_ignored(&wrong_kind("unshift", other)),
        }
    }

    /// Replace `delete_count` elements starting at `start` with `items`,
    /// returning the removed elements.
    pub fn splice(&self, start: usize, delete_count: usize, items: Vec<Value>) -> Vec<Value> {
        match self {
            Value::Wrapped(w) => match w.splice_op(start, delete_count, items) {
                Ok(removed) => removed,
                Err(err) => {
                    warn_ignored(&err);
                    Vec::new()
                }
            },
            Value::Obj(o) => {
                let mut body = o.body().borrow_mut();
                match &mut *body {
                    Body::Array(existing) => {
                        let start = start.min(existing.len());
                        let end = (start + delete_count).min(existing.len());
                        existing.splice(start..end, items).collect()
                    }
                    other => {
                        warn_ignored(&Error::WrongKind {
                            op: "splice",
                            kind: other.kind(),
                        });
                        Vec::new()
                    }
                }
            }
            other => {
                warn_ignored(&wrong_kind("splice", other));
                Vec::new()
            }
        }
    }

    /// Resize an array. Shrinking invalidates the truncated slots as well
    /// as every length-dependent read.
    pub fn set_len(&self, new_len: usize) {
        match self {
            Value::Wrapped(w) => {
                if let Err(err) = w.set_len_op(new_len) {
                    warn_ignored(&err);
                }
            }
            Value::Obj(o) => {
                let mut body = o.body().borrow_mut();
                match &mut *body {
                    Body::Array(items) => items.resize(new_len, Value::Null),
                    other => warn_ignored(&Error::WrongKind {
                        op: "set_len",
                        kind: other.kind(),
                    }),
                }
            }
            other => warn_ignored(&wrong_kind("set_len", other)),
        }
    }

    /// First index holding `needle`, comparing both wrapped and raw forms.
    pub fn index_of(&self, needle: &Value) -> Option<usize> {
        match self {
            Value::Wrapped(w) => w.search_op(needle, false),
            Value::Obj(o) => raw_search(o, needle, false),
            _ => None,
        }
    }

    /// Last index holding `needle`, comparing both wrapped and raw forms.
    pub fn last_index_of(&self, needle: &Value) -> Option<usize> {
        match self {
            Value::Wrapped(w) => w.search_op(needle, true),
            Value::Obj(o) => raw_search(o, needle, true),
            _ => None,
        }
    }

    /// Array membership, comparing both wrapped and raw forms.
    pub fn contains(&self, needle: &Value) -> bool {
        self.index_of(needle).is_some()
    }
}

fn raw_search(o: &Obj, needle: &Value, from_end: bool) -> Option<usize> {
    let body = o.body().borrow();
    let Body::Array(items) = &*body else {
        return None;
    };
    let raw_needle = to_raw(needle.clone());
    let matches = |item: &Value| item.same(needle) || to_raw(item.clone()).same(&raw_needle);
    if from_end {
        items.iter().rposition(matches)
    } else {
        items.iter().position(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::effect;
    use crate::reactive::refs::Ref;
    use crate::reactive::wrap::{is_reactive, is_readonly, reactive, readonly, shallow_reactive};
    use std::cell::Cell;
    use std::rc::Rc;

    fn obj(pairs: &[(&str, i64)]) -> Value {
        let o = Value::new_object();
        for (k, v) in pairs {
            o.set(*k, *v);
        }
        o
    }

    #[test]
    fn reads_and_writes_round_trip() {
        let state = reactive(obj(&[("a", 1)]));
        assert_eq!(state.get("a"), Value::from(1));
        state.set("a", 2);
        assert_eq!(state.get("a"), Value::from(2));
        assert_eq!(state.get("missing"), Value::Null);
    }

    #[test]
    fn nested_objects_wrap_lazily() {
        let inner = Value::new_object();
        inner.set("x", 1);
        let outer = Value::new_object();
        outer.set("inner", inner);

        let state = reactive(outer);
        let nested = state.get("inner");
        assert!(is_reactive(&nested));

        let ro = readonly(crate::reactive::wrap::to_raw(state));
        let nested_ro = ro.get("inner");
        assert!(is_readonly(&nested_ro));
    }

    #[test]
    fn shallow_wrapper_does_not_wrap_children() {
        let inner = Value::new_object();
        let outer = Value::new_object();
        outer.set("inner", inner);
        let state = shallow_reactive(outer);
        assert!(!is_reactive(&state.get("inner")));
    }

    #[test]
    fn readonly_write_is_rejected_without_panicking() {
        let ro = readonly(obj(&[("a", 1)]));
        ro.set("a", 2);
        assert_eq!(ro.get("a"), Value::from(1));
        assert_eq!(ro.try_set("a", 2), Err(Error::ReadonlyWrite));
    }

    #[test]
    fn add_triggers_key_iteration_but_set_does_not() {
        let state = reactive(obj(&[("a", 1)]));
        let key_runs = Rc::new(Cell::new(0));
        let _keys = effect({
            let state = state.clone();
            let key_runs = key_runs.clone();
            move || {
                state.keys();
                key_runs.set(key_runs.get() + 1);
            }
        });
        assert_eq!(key_runs.get(), 1);

        state.set("a", 2);
        assert_eq!(key_runs.get(), 1);

        state.set("b", 3);
        assert_eq!(key_runs.get(), 2);

        state.delete("b");
        assert_eq!(key_runs.get(), 3);
    }

    #[test]
    fn array_push_and_truncation_invalidate_length_readers() {
        let arr = reactive(Value::new_array());
        arr.push(1);
        arr.push(2);

        let lens = Rc::new(Cell::new(0usize));
        let runs = Rc::new(Cell::new(0));
        let _e = effect({
            let arr = arr.clone();
            let lens = lens.clone();
            let runs = runs.clone();
            move || {
                lens.set(arr.len());
                runs.set(runs.get() + 1);
            }
        });
        assert_eq!((runs.get(), lens.get()), (1, 2));

        arr.push(3);
        assert_eq!((runs.get(), lens.get()), (2, 3));

        arr.set_len(1);
        assert_eq!((runs.get(), lens.get()), (3, 1));
    }

    #[test]
    fn searches_match_wrapped_and_raw_forms() {
        let element = Obj::new_object();
        let arr = reactive(Value::new_array());
        arr.push(Value::Obj(element.clone()));

        // Searching with the raw handle finds the raw element.
        assert_eq!(arr.index_of(&Value::Obj(element.clone())), Some(0));
        // Searching with the wrapped form finds it as well.
        let wrapped = arr.get(0);
        assert!(is_reactive(&wrapped));
        assert_eq!(arr.index_of(&wrapped), Some(0));
        assert!(arr.contains(&wrapped));
    }

    #[test]
    fn ref_fields_unwrap_and_write_through() {
        let r = Ref::new(Value::from(1));
        let o = Value::new_object();
        o.set("field", Value::Ref(r.clone()));

        let state = reactive(o.clone());
        assert_eq!(state.get("field"), Value::from(1));

        // Plain assignment goes through the ref.
        state.set("field", 5);
        assert_eq!(r.get(), Value::from(5));
        assert!(matches!(o.get("field"), Value::Ref(_)));

        // Array elements do not unwrap.
        let arr = reactive(Value::new_array());
        arr.push(Value::Ref(r.clone()));
        assert!(matches!(arr.get(0), Value::Ref(_)));
    }

    #[test]
    fn map_entries_and_keys_track_different_deps() {
        let map = reactive(Value::new_map());
        map.set("k", 1);

        let entry_runs = Rc::new(Cell::new(0));
        let key_runs = Rc::new(Cell::new(0));
        let _entries = effect({
            let map = map.clone();
            let entry_runs = entry_runs.clone();
            move || {
                map.entries();
                entry_runs.set(entry_runs.get() + 1);
            }
        });
        let _keys = effect({
            let map = map.clone();
            let key_runs = key_runs.clone();
            move || {
                map.keys();
                key_runs.set(key_runs.get() + 1);
            }
        });
        assert_eq!((entry_runs.get(), key_runs.get()), (1, 1));

        // Overwriting a value re-runs entry observers, not key observers.
        map.set("k", 2);
        assert_eq!((entry_runs.get(), key_runs.get()), (2, 1));

        // A new key re-runs both.
        map.set("k2", 1);
        assert_eq!((entry_runs.get(), key_runs.get()), (3, 2));
    }

    #[test]
    fn set_membership_and_clear() {
        let set = reactive(Value::new_set());
        let size_runs = Rc::new(Cell::new(0));
        let _e = effect({
            let set = set.clone();
            let size_runs = size_runs.clone();
            move || {
                set.len();
                size_runs.set(size_runs.get() + 1);
            }
        });
        assert_eq!(size_runs.get(), 1);

        set.add("a");
        assert_eq!(size_runs.get(), 2);
        assert!(set.has("a"));

        // Re-adding an existing element is not a change.
        set.add("a");
        assert_eq!(size_runs.get(), 2);

        set.clear();
        assert_eq!(size_runs.get(), 3);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn raw_handle_access_is_untracked() {
        let o = obj(&[("a", 1)]);
        let runs = Rc::new(Cell::new(0));
        let _e = effect({
            let o = o.clone();
            let runs = runs.clone();
            move || {
                o.get("a");
                runs.set(runs.get() + 1);
            }
        });
        assert_eq!(runs.get(), 1);
        o.set("a", 2);
        assert_eq!(runs.get(), 1);
    }
}
