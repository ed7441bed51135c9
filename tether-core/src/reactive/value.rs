//! Property Values
//!
//! Tracked objects hold [`Value`]s. Values compare with identity/primitive
//! equality (the same rule as JavaScript's `Object.is`): primitives compare
//! by value, `NaN` equals itself, `+0.0` and `-0.0` differ, and objects and
//! methods compare by identity.

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use serde_json::json;

use crate::error::Result;
use super::object::ObjectRef;

/// Default depth used when a value is serialized without an explicit limit.
pub const DEFAULT_SNAPSHOT_DEPTH: usize = 8;

/// A callable property.
///
/// When invoked through [`ObjectRef::call`], the receiver is always the
/// unwrapped object, so method bodies mutate real state and never re-enter
/// tracking.
#[derive(Clone)]
pub struct Method(Arc<dyn Fn(&ObjectRef, &[Value]) -> Result<Value> + Send + Sync>);

impl Method {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ObjectRef, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn invoke(&self, receiver: &ObjectRef, args: &[Value]) -> Result<Value> {
        (self.0)(receiver, args)
    }

    pub fn ptr_eq(&self, other: &Method) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Method(..)")
    }
}

/// A property value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Object(ObjectRef),
    Method(Method),
}

impl Value {
    /// Identity/primitive equality.
    pub fn same(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => {
                a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan())
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Method(a), Value::Method(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
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
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Return the tracked form of this value. Non-objects pass through.
    pub fn wrap(self) -> Value {
        match self {
            Value::Object(o) => Value::Object(o.wrap()),
            other => other,
        }
    }

    /// Return the untracked form of this value. Non-objects pass through.
    pub fn unwrap_tracked(self) -> Value {
        match self {
            Value::Object(o) => Value::Object(o.unwrap()),
            other => other,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Object(o) if o.is_array() => "array",
            Value::Object(_) => "object",
            Value::Method(_) => "method",
        }
    }

    /// Convert to JSON, snapshotting objects up to `depth` levels deep.
    /// Objects past the limit are written as `{"$ref": id}`.
    pub fn to_json(&self, depth: usize) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null | Value::Method(_) => serde_json::Value::Null,
            Value::Bool(b) => json!(b),
            Value::Int(i) => json!(i),
            Value::Float(f) => json!(f),
            Value::Str(s) => json!(&**s),
            Value::Object(o) if depth == 0 => json!({ "$ref": o.id().raw() }),
            Value::Object(o) => o.snapshot(depth),
        }
    }

    /// Build a value from JSON. Objects and arrays become fresh, untracked
    /// objects.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(Arc::from(s.as_str())),
            serde_json::Value::Array(items) => {
                Value::Object(ObjectRef::array(items.iter().map(Value::from_json)))
            }
            serde_json::Value::Object(_) => Value::Object(ObjectRef::from_json(json)),
        }
    }
}

/// Stable key for a tuple of arguments: JSON with objects encoded by
/// identity, so two different objects never share a key.
pub fn cache_key(args: &[Value]) -> String {
    let encoded: Vec<serde_json::Value> = args.iter().map(|arg| arg.to_json(0)).collect();
    serde_json::Value::Array(encoded).to_string()
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        Value::same(self, other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("Undefined"),
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Object(o) => write!(f, "{o:?}"),
            Value::Method(m) => write!(f, "{m:?}"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json(DEFAULT_SNAPSHOT_DEPTH).serialize(serializer)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<ObjectRef> for Value {
    fn from(o: ObjectRef) -> Self {
        Value::Object(o)
    }
}

impl From<Method> for Value {
    fn from(m: Method) -> Self {
        Value::Method(m)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_follows_object_is() {
        assert!(Value::same(&Value::Float(f64::NAN), &Value::Float(f64::NAN)));
        assert!(!Value::same(&Value::Float(0.0), &Value::Float(-0.0)));
        assert!(Value::same(&"a".into(), &"a".into()));
        assert!(!Value::same(&Value::Null, &Value::Undefined));
        assert!(!Value::same(&Value::Int(1), &Value::Float(1.0)));
    }

    #[test]
    fn objects_compare_by_identity() {
        let a = ObjectRef::new();
        let b = ObjectRef::new();
        assert!(Value::same(&a.clone().into(), &a.wrap().into()));
        assert!(!Value::same(&a.into(), &b.into()));
    }

    #[test]
    fn cache_key_separates_distinct_objects() {
        let a = ObjectRef::new();
        let b = ObjectRef::new();
        assert_eq!(cache_key(&[1.into(), "x".into()]), r#"[1,"x"]"#);
        assert_ne!(
            cache_key(&[a.clone().into()]),
            cache_key(&[b.into()])
        );
        assert_eq!(cache_key(&[a.clone().into()]), cache_key(&[a.wrap().into()]));
    }

    #[test]
    fn json_round_trip_builds_objects() {
        let value = Value::from_json(&json!({ "name": "tether", "tags": [1, 2] }));
        let object = value.as_object().expect("object");
        assert_eq!(object.get_untracked("name"), Value::from("tether"));

        let tags = object.get_untracked("tags");
        let tags = tags.as_object().expect("array");
        assert!(tags.is_array());
        assert_eq!(tags.len(), 2);
        assert_eq!(value.to_json(4), json!({ "name": "tether", "tags": [1, 2] }));
    }
}
