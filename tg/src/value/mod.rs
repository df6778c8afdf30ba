//! Dynamic values passed into and returned from grouped tasks
//!
//! Values are cheap to clone: containers are shared handles, so a `List`
//! registered with two tasks is the same list. Freezing a value makes it and
//! every value it owns permanently immutable, which is what allows arguments to
//! be captured at registration and read later from any worker.

mod callable;
mod container;
mod error;

use std::fmt;

use serde::ser::{Error as _, Serialize, SerializeMap, SerializeSeq, Serializer};

pub use callable::{Args, Callable, Function, Thread};
pub use container::{Dict, List, Tuple};
pub use error::{CallError, ValueError};

/// Irreversible transition to an immutable state
pub trait Freeze {
    /// Make this value and every value it owns permanently immutable
    fn freeze(&self);

    /// Check if further mutation is rejected
    fn is_frozen(&self) -> bool;
}

/// A dynamically typed value
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(List),
    Dict(Dict),
    Tuple(Tuple),
    Function(Function),
}

impl Value {
    /// Name of the value's type as shown in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Tuple(_) => "tuple",
            Value::Function(_) => "function",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Dict(d) => !d.is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Function(_) => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }
}

impl Freeze for Value {
    fn freeze(&self) {
        match self {
            Value::List(l) => l.freeze(),
            Value::Dict(d) => d.freeze(),
            Value::Tuple(t) => t.freeze(),
            _ => {}
        }
    }

    fn is_frozen(&self) -> bool {
        match self {
            Value::List(l) => l.is_frozen(),
            Value::Dict(d) => d.is_frozen(),
            Value::Tuple(t) => t.is_frozen(),
            _ => true,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::String(s) => write!(f, "{:?}", s),
            Value::List(l) => write!(f, "{}", l),
            Value::Dict(d) => write!(f, "{}", d),
            Value::Tuple(t) => write!(f, "{}", t),
            Value::Function(func) => write!(f, "<function {}>", func.name()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::None => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::String(s) => serializer.serialize_str(s),
            Value::List(l) => {
                let Some(_visit) = l.visit() else {
                    return Err(S::Error::custom("cannot serialize a list that contains itself"));
                };
                serialize_seq(serializer, &l.to_vec())
            }
            Value::Tuple(t) => serialize_seq(serializer, &t.iter().cloned().collect::<Vec<_>>()),
            Value::Dict(d) => {
                let Some(_visit) = d.visit() else {
                    return Err(S::Error::custom("cannot serialize a dict that contains itself"));
                };
                let entries = d.entries();
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in &entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            Value::Function(func) => serializer.collect_str(&format_args!("<function {}>", func.name())),
        }
    }
}

fn serialize_seq<S: Serializer>(serializer: S, items: &[Value]) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(items.len()))?;
    for item in items {
        seq.serialize_element(item)?;
    }
    seq.end()
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<List> for Value {
    fn from(l: List) -> Self {
        Value::List(l)
    }
}

impl From<Dict> for Value {
    fn from(d: Dict) -> Self {
        Value::Dict(d)
    }
}

impl From<Tuple> for Value {
    fn from(t: Tuple) -> Self {
        Value::Tuple(t)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_containing_value_displays_and_fails_to_serialize() {
        let list = List::default();
        list.push(list.clone()).unwrap();
        let value = Value::from(list);

        assert_eq!(value.to_string(), "[[...]]");
        assert_eq!(format!("{:?}", value), "List([List([...])])");
        let err = serde_json::to_string(&value).unwrap_err();
        assert!(err.to_string().contains("contains itself"));
    }

    #[test]
    fn test_scalars_are_always_frozen() {
        assert!(Value::from(3).is_frozen());
        assert!(Value::from("x").is_frozen());
        assert!(Value::None.is_frozen());
    }

    #[test]
    fn test_value_freeze_reaches_list() {
        let list = List::default();
        let value = Value::from(list.clone());
        assert!(!value.is_frozen());
        value.freeze();
        assert!(list.is_frozen());
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Value::None.type_name(), "NoneType");
        assert_eq!(Value::from(1).type_name(), "int");
        assert_eq!(Value::from(List::default()).type_name(), "list");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::None.is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(Value::from("a").is_truthy());
        assert!(!Value::from(List::default()).is_truthy());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::from(1.5).to_string(), "1.5");
        assert_eq!(Value::from("hi").to_string(), "\"hi\"");
        assert_eq!(Value::Bool(false).to_string(), "False");
    }

    #[test]
    fn test_serialize_json() {
        let dict = Dict::new();
        dict.insert("items", List::new(vec![Value::from(1), Value::None])).unwrap();
        let json = serde_json::to_value(Value::from(dict)).unwrap();
        assert_eq!(json, serde_json::json!({"items": [1, null]}));
    }

    #[test]
    fn test_structural_equality() {
        let a = List::new(vec![Value::from(1)]);
        let b = List::new(vec![Value::from(1)]);
        assert_eq!(Value::from(a), Value::from(b));
        assert_ne!(Value::from(1), Value::from(1.0));
    }
}
