//! JSON interop for the value model.
//!
//! Conversions are structural: building from JSON produces raw targets,
//! serializing reads through wrappers and refs to the underlying data.
//! Cyclic structures serialize the repeated node as null rather than
//! recursing forever.

use std::collections::HashSet;
use std::rc::Rc;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use super::{Body, Key, Obj, Value};

impl Value {
    /// Build a raw value tree from JSON. Objects become plain objects,
    /// arrays become arrays; numbers map to `Int` when they are integral.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(Rc::from(s.as_str())),
            serde_json::Value::Array(items) => {
                let arr = Obj::new_array();
                {
                    let mut body = arr.body().borrow_mut();
                    if let Body::Array(out) = &mut *body {
                        out.extend(items.into_iter().map(Value::from_json));
                    }
                }
                Value::Obj(arr)
            }
            serde_json::Value::Object(entries) => {
                let obj = Obj::new_object();
                {
                    let mut body = obj.body().borrow_mut();
                    if let Body::Object(out) = &mut *body {
                        for (k, v) in entries {
                            out.insert(Key::from(k), Value::from_json(v));
                        }
                    }
                }
                Value::Obj(obj)
            }
        }
    }

    /// Snapshot as JSON, reading through wrappers and refs without
    /// tracking. Map keys serialize as strings; sets as arrays.
    pub fn to_json(&self) -> serde_json::Value {
        let mut seen = HashSet::new();
        self.to_json_inner(&mut seen)
    }

    fn to_json_inner(&self, seen: &mut HashSet<u64>) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(x) => serde_json::Number::from_f64(*x)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::Ref(r) => r.peek().to_json_inner(seen),
            Value::Wrapped(w) => target_to_json(w.raw(), seen),
            Value::Obj(o) => target_to_json(o, seen),
        }
    }
}

fn key_string(key: &Key) -> String {
    match key {
        Key::Str(s) => s.to_string(),
        Key::Int(i) => i.to_string(),
    }
}

fn target_to_json(target: &Obj, seen: &mut HashSet<u64>) -> serde_json::Value {
    if !seen.insert(target.id()) {
        tracing::warn!(kind = target.kind(), "cycle detected while serializing");
        return serde_json::Value::Null;
    }
    let body = target.body().borrow();
    let result = match &*body {
        Body::Object(m) | Body::Map(m) => {
            let mut out = serde_json::Map::with_capacity(m.len());
            for (k, v) in m {
                out.insert(key_string(k), v.to_json_inner(seen));
            }
            serde_json::Value::Object(out)
        }
        Body::Array(items) => {
            serde_json::Value::Array(items.iter().map(|v| v.to_json_inner(seen)).collect())
        }
        Body::Set(s) => serde_json::Value::Array(
            s.iter()
                .map(|k| match k {
                    Key::Str(st) => serde_json::Value::String(st.to_string()),
                    Key::Int(i) => serde_json::Value::from(*i),
                })
                .collect(),
        ),
    };
    drop(body);
    seen.remove(&target.id());
    result
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(json)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from_json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_round_trip() {
        let value = Value::from_json(json!({
            "a": 1,
            "b": [1, 2.5, "three", null, true],
            "c": { "nested": "yes" },
        }));
        assert_eq!(value.kind(), "object");
        assert_eq!(value.get("a"), Value::from(1));
        assert_eq!(value.get("b").len(), 5);
        assert_eq!(
            value.to_json(),
            json!({
                "a": 1,
                "b": [1, 2.5, "three", null, true],
                "c": { "nested": "yes" },
            })
        );
    }

    #[test]
    fn serializes_through_wrappers_and_refs() {
        let state = crate::reactive::reactive(Value::from_json(json!({ "n": 1 })));
        state.set("r", Value::Ref(crate::reactive::Ref::new(Value::from(9))));
        assert_eq!(state.to_json(), json!({ "n": 1, "r": 9 }));
    }

    #[test]
    fn cycles_serialize_as_null() {
        let outer = Value::new_object();
        outer.set("self", outer.clone());
        let json = outer.to_json();
        assert_eq!(json, json!({ "self": null }));
    }

    #[test]
    fn serde_impls_delegate_to_json() {
        let value = Value::from_json(json!([1, 2, 3]));
        let text = serde_json::to_string(&value).unwrap();
        assert_eq!(text, "[1,2,3]");
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back.get(1), Value::from(2));
    }
}
