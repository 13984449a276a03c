//! Runtime values that templates operate on.
//!
//! A [`Value`] is what `.` and `$vars` hold during execution and what the
//! literal encoder receives at the end of every emitting pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BoxError;
use crate::literal::format_float;

/// Part of an SQL query that is written to the output verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawSql(pub String);

impl RawSql {
    pub fn new(sql: impl Into<String>) -> Self {
        Self(sql.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RawSql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RawSql {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RawSql {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A name that is rendered as a quoted SQL identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(pub String);

impl Identifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Identifier {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A wrapper that supplies its underlying value on demand, e.g. a nullable
/// column type. The encoder resolves it once before choosing a literal form.
pub trait Valuer: fmt::Debug + Send + Sync {
    fn value(&self) -> Result<Value, BoxError>;
}

/// Dynamic value type for template data.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    String(String),
    Time(DateTime<FixedOffset>),
    Raw(RawSql),
    Identifier(Identifier),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Valuer(Arc<dyn Valuer>),
}

impl Value {
    /// Wrap a [`Valuer`] implementation.
    pub fn valuer(v: impl Valuer + 'static) -> Self {
        Value::Valuer(Arc::new(v))
    }

    /// Convert any serializable data into a template value.
    ///
    /// Objects become maps, arrays become lists, and numbers become `Int`
    /// when they fit in an `i64`.
    pub fn from_serialize<T: Serialize + ?Sized>(data: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(data).map(Value::from)
    }

    /// Descriptive name of this value's kind, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bytes(_) => "bytes",
            Value::String(_) => "string",
            Value::Time(_) => "time",
            Value::Raw(_) => "raw sql",
            Value::Identifier(_) => "identifier",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Valuer(_) => "valuer",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truthiness as used by `if`, `with`, `and`, `or` and `not`.
    pub fn is_true(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Bytes(b) => !b.is_empty(),
            Value::String(s) => !s.is_empty(),
            Value::Raw(s) => !s.0.is_empty(),
            Value::Identifier(s) => !s.0.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Time(_) | Value::Valuer(_) => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Raw(a), Value::Raw(b)) => a == b,
            (Value::Identifier(a), Value::Identifier(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Valuer(a), Value::Valuer(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Formats like Go's `%v` verb.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("<nil>"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => f.write_str(&format_float(*x)),
            Value::Bytes(bytes) => {
                f.write_str("[")?;
                for (i, b) in bytes.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", b)?;
                }
                f.write_str("]")
            }
            Value::String(s) => f.write_str(s),
            Value::Time(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S%.f %:z")),
            Value::Raw(s) => f.write_str(s.as_str()),
            Value::Identifier(s) => f.write_str(s.as_str()),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", v)?;
                }
                f.write_str("]")
            }
            Value::Map(map) => {
                f.write_str("map[")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}:{}", k, v)?;
                }
                f.write_str("]")
            }
            Value::Valuer(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Int(i64::from(v))
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<isize> for Value {
    fn from(v: isize) -> Self {
        Value::Int(v as i64)
    }
}

/// Widened through the shortest decimal form of the `f32`, so `0.1f32`
/// becomes `0.1` rather than `0.10000000149011612`.
impl From<f32> for Value {
    fn from(v: f32) -> Self {
        if !v.is_finite() {
            return Value::Float(f64::from(v));
        }
        Value::Float(v.to_string().parse().unwrap_or(f64::from(v)))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::Time(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Time(v.fixed_offset())
    }
}

impl From<RawSql> for Value {
    fn from(v: RawSql) -> Self {
        Value::Raw(v)
    }
}

impl From<Identifier> for Value {
    fn from(v: Identifier) -> Self {
        Value::Identifier(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// JSON integers outside the `i64` range become [`Value::Float`] and keep
/// only `f64` precision.
impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Filter {
        table: &'static str,
        limit: u64,
        tags: Vec<&'static str>,
        score: f64,
    }

    #[test]
    fn test_json_integer_beyond_i64() {
        let v = Value::from(serde_json::json!(u64::MAX));
        assert_eq!(v, Value::Float(u64::MAX as f64));
        assert_eq!(Value::from(serde_json::json!(i64::MIN)), Value::Int(i64::MIN));
    }

    #[test]
    fn test_value_from() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(42i32), Value::Int(42));
        assert_eq!(Value::from(7u8), Value::Int(7));
        assert_eq!(Value::from(2.5f64), Value::Float(2.5));
        assert_eq!(Value::from(0.1f32), Value::Float(0.1));
        assert_eq!(Value::from(f32::NEG_INFINITY), Value::Float(f64::NEG_INFINITY));
        assert_eq!(Value::from("hello"), Value::String("hello".to_string()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::String("x".to_string()));
        assert_eq!(Value::from(None::<Vec<u8>>), Value::Null);
    }

    #[test]
    fn test_from_serialize() {
        let value = Value::from_serialize(&Filter {
            table: "users",
            limit: 10,
            tags: vec!["a", "b"],
            score: 0.5,
        })
        .unwrap();

        let Value::Map(map) = value else {
            panic!("expected map");
        };
        assert_eq!(map["table"], Value::from("users"));
        assert_eq!(map["limit"], Value::Int(10));
        assert_eq!(map["tags"], Value::List(vec!["a".into(), "b".into()]));
        assert_eq!(map["score"], Value::Float(0.5));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_true());
        assert!(!Value::Int(0).is_true());
        assert!(!Value::from("").is_true());
        assert!(!Value::List(vec![]).is_true());
        assert!(Value::Int(-1).is_true());
        assert!(Value::from("0").is_true());
    }

    #[test]
    fn test_display_like_go() {
        assert_eq!(Value::Null.to_string(), "<nil>");
        assert_eq!(Value::Bytes(b"ab".to_vec()).to_string(), "[97 98]");
        assert_eq!(Value::Float(1e6).to_string(), "1e+06");
        assert_eq!(
            Value::List(vec![Value::Int(1), "x".into()]).to_string(),
            "[1 x]"
        );
        let map: BTreeMap<String, Value> = [("k".to_string(), Value::Bool(false))].into();
        assert_eq!(Value::Map(map).to_string(), "map[k:false]");
    }
}
