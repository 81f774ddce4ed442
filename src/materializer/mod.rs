//! Compiled row materializers.
//!
//! The cutter leaves a host-side expression over `RowValue` leaves for each
//! query. [`Materializer::compile`] turns it into a closure once; the
//! execution layer then calls [`Materializer::materialize`] per row.

use std::fmt;

pub mod errors;
pub mod host_eval;
pub mod row_reader;

pub use errors::{EvalError, EvalResult};
pub use host_eval::{compile, evaluate, Compiled, EvalEnv};
pub use row_reader::{RowCursor, ValueRow};

use crate::query_expr::{QueryExpr, Value, ValueType};
use crate::query_planner::query_graph::QueryGraph;

/// Options applied while reading values out of rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowReadingContext {
    /// Strip trailing blanks from string columns (fixed-width CHAR padding)
    pub trim_strings: bool,
}

#[derive(Clone)]
pub struct Materializer {
    reader: Compiled,
    row_type: ValueType,
    /// Expression the closure was compiled from, kept for diagnostics
    source: QueryExpr,
}

impl fmt::Debug for Materializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Materializer")
            .field("row_type", &self.row_type)
            .field("source", &self.source)
            .finish()
    }
}

impl Materializer {
    /// `graph` resolves parameters referenced by the reader.
    pub fn compile(
        reader: &QueryExpr,
        row_type: ValueType,
        graph: Option<&QueryGraph>,
    ) -> EvalResult<Self> {
        log::trace!("Compiling materializer for {}", row_type);
        Ok(Materializer {
            reader: compile(reader, graph)?,
            row_type,
            source: reader.clone(),
        })
    }

    pub fn row_type(&self) -> &ValueType {
        &self.row_type
    }

    pub fn source(&self) -> &QueryExpr {
        &self.source
    }

    pub fn materialize(&self, row: &dyn RowCursor, ctx: &RowReadingContext) -> EvalResult<Value> {
        (self.reader)(&EvalEnv {
            row: Some(row),
            reading: ctx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_expr::RowValue;

    #[test]
    fn test_materialize_scalar_row() {
        let reader = QueryExpr::RowValue(RowValue {
            index: 0,
            ty: ValueType::Int64,
        });
        let m = Materializer::compile(&reader, ValueType::Int64, None).unwrap();
        let row = ValueRow(vec![Value::Int(3)]);
        assert_eq!(
            m.materialize(&row, &RowReadingContext::default()),
            Ok(Value::Int(3))
        );
        assert_eq!(m.row_type(), &ValueType::Int64);
    }
}
