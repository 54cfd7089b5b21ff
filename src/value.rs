use core::fmt;
use std::collections::{BTreeMap, HashMap};
use std::num::TryFromIntError;

use serde::{Deserialize, Serialize};

/// A value stored in a defaults namespace.
///
/// Serializes to plain JSON, so a namespace holding `a = 1` is persisted as
/// `{"a":1}`. Integers deserialize as [`Value::Int`] before [`Value::Float`]
/// is tried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Downcast to `T`, or `None` if the stored type is different.
    pub fn get<T: FromValue>(&self) -> Option<T> {
        T::from_value(self)
    }

    /// False if this value or anything nested in it is a NaN or infinite
    /// float. JSON has no encoding for those.
    pub fn is_finite(&self) -> bool {
        match self {
            Value::Float(x) => x.is_finite(),
            Value::List(items) => items.iter().all(Value::is_finite),
            Value::Map(map) => map.values().all(Value::is_finite),
            Value::Bool(_) | Value::Int(_) | Value::Str(_) => true,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(_) | Value::Map(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                write!(f, "{json}")
            }
        }
    }
}

/// Safe downcast from a stored [`Value`].
///
/// Returning `None` is how a type mismatch degrades to the caller's
/// fallback; implementations must never panic.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Str(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float(x) => Some(*x as f32),
            _ => None,
        }
    }
}

macro_rules! int_from_value {
    ($($t:ty),*) => {
        $(
            impl FromValue for $t {
                fn from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::Int(i) => <$t>::try_from(*i).ok(),
                        _ => None,
                    }
                }
            }
        )*
    };
}

int_from_value!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::List(items) => items.iter().map(T::from_value).collect(),
            _ => None,
        }
    }
}

impl<T: FromValue> FromValue for BTreeMap<String, T> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Map(map) => map
                .iter()
                .map(|(k, v)| T::from_value(v).map(|v| (k.clone(), v)))
                .collect(),
            _ => None,
        }
    }
}

impl<T: FromValue> FromValue for HashMap<String, T> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Map(map) => map
                .iter()
                .map(|(k, v)| T::from_value(v).map(|v| (k.clone(), v)))
                .collect(),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

macro_rules! int_into_value {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(i: $t) -> Self {
                    Value::Int(i64::from(i))
                }
            }
        )*
    };
}

int_into_value!(i8, i16, i32, i64, u8, u16, u32);

macro_rules! int_try_into_value {
    ($($t:ty),*) => {
        $(
            impl TryFrom<$t> for Value {
                type Error = TryFromIntError;

                fn try_from(i: $t) -> Result<Self, Self::Error> {
                    Ok(Value::Int(i64::try_from(i)?))
                }
            }
        )*
    };
}

// Wider than i64 on some or all targets.
int_try_into_value!(u64, usize, isize);

impl From<f32> for Value {
    fn from(x: f32) -> Self {
        Value::Float(f64::from(x))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<BTreeMap<String, T>> for Value {
    fn from(map: BTreeMap<String, T>) -> Self {
        Value::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Into<Value>> From<HashMap<String, T>> for Value {
    fn from(map: HashMap<String, T>) -> Self {
        Value::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_downcast() {
        assert_eq!(Value::from(true).get::<bool>(), Some(true));
        assert_eq!(Value::from(42).get::<i64>(), Some(42));
        assert_eq!(Value::from(2.5).get::<f64>(), Some(2.5));
        assert_eq!(Value::from("hi").get::<String>(), Some("hi".to_string()));
    }

    #[test]
    fn test_type_mismatch_is_none() {
        assert_eq!(Value::from("1").get::<i64>(), None);
        assert_eq!(Value::from(1).get::<bool>(), None);
        assert_eq!(Value::from(1).get::<f64>(), None);
        assert_eq!(Value::from(1.0).get::<i64>(), None);
        assert_eq!(Value::from(true).get::<String>(), None);
    }

    #[test]
    fn test_int_out_of_range_is_none() {
        assert_eq!(Value::Int(300).get::<u8>(), None);
        assert_eq!(Value::Int(-1).get::<u32>(), None);
        assert_eq!(Value::Int(255).get::<u8>(), Some(255));
    }

    #[test]
    fn test_list_with_mixed_types_is_none() {
        let list = Value::List(vec![Value::Int(1), Value::Str("two".into())]);
        assert_eq!(list.get::<Vec<i64>>(), None);
        assert_eq!(Value::from(vec![1, 2, 3]).get::<Vec<i32>>(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_map_downcast() {
        let map: HashMap<String, i64> = HashMap::from([("a".to_string(), 1), ("b".to_string(), 2)]);
        let value = Value::from(map.clone());
        assert_eq!(value.get::<HashMap<String, i64>>(), Some(map));
        assert_eq!(value.get::<BTreeMap<String, String>>(), None);
    }

    #[test]
    fn test_serializes_as_plain_json() {
        let map = BTreeMap::from([("a".to_string(), Value::Int(1))]);
        assert_eq!(serde_json::to_string(&map).unwrap(), r#"{"a":1}"#);

        let parsed: BTreeMap<String, Value> =
            serde_json::from_str(r#"{"i":3,"f":1.5,"s":"x","b":false,"l":[1,"y"],"m":{"k":true}}"#)
                .unwrap();
        assert_eq!(parsed["i"], Value::Int(3));
        assert_eq!(parsed["f"], Value::Float(1.5));
        assert_eq!(parsed["s"], Value::Str("x".into()));
        assert_eq!(parsed["b"], Value::Bool(false));
        assert_eq!(
            parsed["l"],
            Value::List(vec![Value::Int(1), Value::Str("y".into())])
        );
        assert_eq!(parsed["m"].get::<BTreeMap<String, bool>>().unwrap()["k"], true);
    }

    #[test]
    fn test_wide_ints_convert_when_in_range() {
        assert_eq!(Value::try_from(7u64).unwrap(), Value::Int(7));
        assert_eq!(Value::try_from(3usize).unwrap(), Value::Int(3));
        assert_eq!(Value::try_from(-3isize).unwrap(), Value::Int(-3));
        assert!(Value::try_from(u64::MAX).is_err());
    }

    #[test]
    fn test_is_finite_checks_nested_floats() {
        assert!(Value::from(1.5).is_finite());
        assert!(!Value::from(f64::NAN).is_finite());
        assert!(!Value::from(vec![1.0, f64::INFINITY]).is_finite());
        let map = BTreeMap::from([("x".to_string(), f64::NEG_INFINITY)]);
        assert!(!Value::from(map).is_finite());
        assert!(Value::from(vec!["a", "b"]).is_finite());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::from("plain").to_string(), "plain");
        assert_eq!(Value::from(7).to_string(), "7");
        assert_eq!(Value::from(vec!["a", "b"]).to_string(), r#"["a","b"]"#);
    }
}
