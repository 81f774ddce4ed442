use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::QueryChain;

/// Host-side static type attached to AST nodes and row readers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Object,
    Bool,
    Int32,
    Int64,
    Double,
    Decimal,
    String,
    DateTime,
    /// Duration in milliseconds
    TimeSpan,
    Nullable(Box<ValueType>),
    /// A mapped entity type, by entity name
    Entity(String),
    /// An anonymous or unmapped record type (closures, projections)
    Record(String),
    /// A lazily evaluated sequence (query source, entity set)
    Sequence(Box<ValueType>),
    Array(Box<ValueType>),
}

impl ValueType {
    pub fn nullable(inner: ValueType) -> Self {
        match inner {
            ValueType::Nullable(_) => inner,
            other => ValueType::Nullable(Box::new(other)),
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, ValueType::Nullable(_))
    }

    /// Strips one level of nullability.
    pub fn underlying(&self) -> &ValueType {
        match self {
            ValueType::Nullable(inner) => inner,
            other => other,
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self.underlying(),
            ValueType::Bool
                | ValueType::Int32
                | ValueType::Int64
                | ValueType::Double
                | ValueType::Decimal
                | ValueType::String
                | ValueType::DateTime
                | ValueType::TimeSpan
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self.underlying(),
            ValueType::Int32 | ValueType::Int64 | ValueType::Double | ValueType::Decimal
        )
    }

    pub fn is_integral(&self) -> bool {
        matches!(self.underlying(), ValueType::Int32 | ValueType::Int64)
    }

    pub fn is_string(&self) -> bool {
        matches!(self.underlying(), ValueType::String)
    }

    pub fn is_date_time(&self) -> bool {
        matches!(self.underlying(), ValueType::DateTime)
    }

    pub fn is_time_span(&self) -> bool {
        matches!(self.underlying(), ValueType::TimeSpan)
    }

    pub fn entity_name(&self) -> Option<&str> {
        match self.underlying() {
            ValueType::Entity(name) => Some(name),
            _ => None,
        }
    }

    /// Element type of a sequence or array.
    pub fn element(&self) -> Option<&ValueType> {
        match self.underlying() {
            ValueType::Sequence(inner) | ValueType::Array(inner) => Some(inner),
            _ => None,
        }
    }

    /// True when `self` and `other` only differ by nullability.
    pub fn same_underlying(&self, other: &ValueType) -> bool {
        self.underlying() == other.underlying()
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Nullable(inner) => write!(f, "{}?", inner),
            ValueType::Entity(name) | ValueType::Record(name) => write!(f, "{}", name),
            ValueType::Sequence(inner) => write!(f, "Sequence<{}>", inner),
            ValueType::Array(inner) => write!(f, "{}[]", inner),
            other => write!(f, "{:?}", other),
        }
    }
}

/// A named-field record: captured closure objects, materialized entities and
/// anonymous projections all share this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub type_name: String,
    pub fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new(type_name: impl Into<String>) -> Self {
        Record {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.push((name.into(), value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }
}

/// Runtime values: constants in the AST, parameter values and materialized
/// row results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(NaiveDateTime),
    /// Milliseconds
    TimeSpan(i64),
    Array(Vec<Value>),
    Record(Record),
    /// The queryable table of an entity type
    Table(String),
    /// A complete query held as a value (second operand of set operations,
    /// sub-query sources for `Contains`)
    Query(Box<QueryChain>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Object,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int64,
            Value::Float(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::DateTime(_) => ValueType::DateTime,
            Value::TimeSpan(_) => ValueType::TimeSpan,
            Value::Array(items) => ValueType::Array(Box::new(
                items
                    .first()
                    .map(Value::value_type)
                    .unwrap_or(ValueType::Object),
            )),
            Value::Record(record) => ValueType::Record(record.type_name.clone()),
            Value::Table(entity) => {
                ValueType::Sequence(Box::new(ValueType::Entity(entity.clone())))
            }
            Value::Query(_) => ValueType::Sequence(Box::new(ValueType::Object)),
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

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::TimeSpan(ms) => Some(*ms),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::TimeSpan(ms) => Some(*ms as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Host-side `ToString()` rendering of a primitive value.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => if *b { "True" } else { "False" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            Value::TimeSpan(ms) => ms.to_string(),
            Value::Array(_) | Value::Record(_) | Value::Table(_) | Value::Query(_) => {
                format!("{}", self.value_type())
            }
        }
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
    fn from(f: f64) -> Self {
        Value::Float(f)
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

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(r)
    }
}
