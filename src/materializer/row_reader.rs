//! Type-indexed accessors pulling one typed value out of a result row.

use std::collections::HashMap;

use chrono::NaiveDateTime;

use super::errors::{EvalError, EvalResult};
use super::RowReadingContext;
use crate::query_expr::{Value, ValueType};

/// Result row as exposed by the execution layer.
pub trait RowCursor {
    fn field_count(&self) -> usize;
    fn is_null(&self, index: usize) -> EvalResult<bool>;
    fn get_bool(&self, index: usize) -> EvalResult<bool>;
    fn get_i32(&self, index: usize) -> EvalResult<i32>;
    fn get_i64(&self, index: usize) -> EvalResult<i64>;
    fn get_f64(&self, index: usize) -> EvalResult<f64>;
    fn get_string(&self, index: usize) -> EvalResult<String>;
    fn get_datetime(&self, index: usize) -> EvalResult<NaiveDateTime>;
    /// Duration in milliseconds
    fn get_timespan_ms(&self, index: usize) -> EvalResult<i64>;
}

pub type RowReaderFn = fn(&dyn RowCursor, usize, &RowReadingContext) -> EvalResult<Value>;

lazy_static::lazy_static! {
    static ref ROW_READERS: HashMap<ValueType, RowReaderFn> = {
        let mut m: HashMap<ValueType, RowReaderFn> = HashMap::new();
        m.insert(ValueType::Bool, |row, i, _| Ok(Value::Bool(row.get_bool(i)?)));
        m.insert(ValueType::Int32, |row, i, _| Ok(Value::Int(row.get_i32(i)? as i64)));
        m.insert(ValueType::Int64, |row, i, _| Ok(Value::Int(row.get_i64(i)?)));
        m.insert(ValueType::Double, |row, i, _| Ok(Value::Float(row.get_f64(i)?)));
        m.insert(ValueType::Decimal, |row, i, _| Ok(Value::Float(row.get_f64(i)?)));
        m.insert(ValueType::String, |row, i, ctx| {
            let s = row.get_string(i)?;
            Ok(Value::String(if ctx.trim_strings {
                s.trim_end().to_string()
            } else {
                s
            }))
        });
        m.insert(ValueType::DateTime, |row, i, _| Ok(Value::DateTime(row.get_datetime(i)?)));
        m.insert(ValueType::TimeSpan, |row, i, _| Ok(Value::TimeSpan(row.get_timespan_ms(i)?)));
        m
    };
}

pub fn has_row_reader(ty: &ValueType) -> bool {
    ROW_READERS.contains_key(ty.underlying())
}

/// Reads column `index` as `ty`. Nullable types and strings yield
/// `Value::Null` for SQL NULL; other types fail.
pub fn read_value(
    row: &dyn RowCursor,
    index: usize,
    ty: &ValueType,
    ctx: &RowReadingContext,
) -> EvalResult<Value> {
    let reader = ROW_READERS
        .get(ty.underlying())
        .ok_or_else(|| EvalError::NoRowReader(ty.to_string()))?;
    if row.is_null(index)? {
        return if ty.is_nullable() || ty.is_string() {
            Ok(Value::Null)
        } else {
            Err(EvalError::UnexpectedNull {
                index,
                ty: ty.to_string(),
            })
        };
    }
    reader(row, index, ctx)
}

/// In-memory row of [`Value`]s.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRow(pub Vec<Value>);

impl ValueRow {
    fn field(&self, index: usize) -> EvalResult<&Value> {
        self.0.get(index).ok_or_else(|| EvalError::RowRead {
            index,
            message: format!("row has {} fields", self.0.len()),
        })
    }

    fn wrong(&self, index: usize, wanted: &str) -> EvalError {
        EvalError::RowRead {
            index,
            message: format!("expected {}, found {:?}", wanted, self.0.get(index)),
        }
    }
}

impl RowCursor for ValueRow {
    fn field_count(&self) -> usize {
        self.0.len()
    }

    fn is_null(&self, index: usize) -> EvalResult<bool> {
        Ok(self.field(index)?.is_null())
    }

    fn get_bool(&self, index: usize) -> EvalResult<bool> {
        match self.field(index)? {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            _ => Err(self.wrong(index, "bool")),
        }
    }

    fn get_i32(&self, index: usize) -> EvalResult<i32> {
        let wide = self.get_i64(index)?;
        i32::try_from(wide).map_err(|_| self.wrong(index, "int32"))
    }

    fn get_i64(&self, index: usize) -> EvalResult<i64> {
        match self.field(index)? {
            Value::Int(i) => Ok(*i),
            _ => Err(self.wrong(index, "integer")),
        }
    }

    fn get_f64(&self, index: usize) -> EvalResult<f64> {
        self.field(index)?
            .as_f64()
            .ok_or_else(|| self.wrong(index, "number"))
    }

    fn get_string(&self, index: usize) -> EvalResult<String> {
        match self.field(index)? {
            Value::String(s) => Ok(s.clone()),
            _ => Err(self.wrong(index, "string")),
        }
    }

    fn get_datetime(&self, index: usize) -> EvalResult<NaiveDateTime> {
        match self.field(index)? {
            Value::DateTime(dt) => Ok(*dt),
            _ => Err(self.wrong(index, "datetime")),
        }
    }

    fn get_timespan_ms(&self, index: usize) -> EvalResult<i64> {
        match self.field(index)? {
            Value::TimeSpan(ms) | Value::Int(ms) => Ok(*ms),
            _ => Err(self.wrong(index, "timespan")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nullable_reader() {
        let row = ValueRow(vec![Value::Null, Value::Int(7)]);
        let ctx = RowReadingContext::default();
        let nullable = ValueType::nullable(ValueType::Int32);
        assert_eq!(read_value(&row, 0, &nullable, &ctx), Ok(Value::Null));
        assert_eq!(read_value(&row, 1, &nullable, &ctx), Ok(Value::Int(7)));
        assert!(matches!(
            read_value(&row, 0, &ValueType::Int32, &ctx),
            Err(EvalError::UnexpectedNull { index: 0, .. })
        ));
    }

    #[test]
    fn test_trim_strings_option() {
        let row = ValueRow(vec![Value::String("abc  ".into())]);
        let ctx = RowReadingContext { trim_strings: true };
        assert_eq!(
            read_value(&row, 0, &ValueType::String, &ctx),
            Ok(Value::String("abc".into()))
        );
    }

    #[test]
    fn test_entities_are_not_row_readable() {
        assert!(!has_row_reader(&ValueType::Entity("Person".into())));
        assert!(has_row_reader(&ValueType::nullable(ValueType::DateTime)));
    }
}
