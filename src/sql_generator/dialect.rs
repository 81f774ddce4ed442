//! Vendor dialects.
//!
//! A dialect supplies the vendor-specific fragments (parameter markers,
//! literals, casts, join keywords, limit/offset wrapping, function
//! overrides). Everything else is rendered by the shared code in
//! [`super::to_sql`] and [`super::to_sql_query`].

use std::fmt;
use std::sync::Arc;

use super::errors::{SqlGenerationError, SqlResult};
use crate::query_expr::{SpecialOp, Value, ValueType};
use crate::query_planner::query_graph::{JoinKind, SetOperator};

pub trait SqlDialect: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Statement marker for the parameter called `alias`.
    fn parameter_name(&self, alias: &str) -> String {
        format!("@{}", alias)
    }

    fn string_indexes_start_at_one(&self) -> bool {
        true
    }

    fn statement_separator(&self) -> &'static str {
        " "
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value {
            "1"
        } else {
            "0"
        }
    }

    fn date_time_literal(&self, text: &str) -> String {
        format!("'{}'", text)
    }

    fn literal(&self, value: &Value) -> SqlResult<String> {
        Ok(match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => self.bool_literal(*b).to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) if !f.is_finite() => {
                return Err(SqlGenerationError::UnsupportedLiteral(f.to_string()))
            }
            Value::Float(f) => f.to_string(),
            Value::TimeSpan(ms) => ms.to_string(),
            Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            Value::DateTime(dt) => {
                self.date_time_literal(&dt.format("%Y-%m-%d %H:%M:%S").to_string())
            }
            Value::Array(items) => {
                let items = items
                    .iter()
                    .map(|item| self.literal(item))
                    .collect::<SqlResult<Vec<_>>>()?;
                format!("({})", items.join(", "))
            }
            Value::Record(_) | Value::Table(_) | Value::Query(_) => {
                return Err(SqlGenerationError::UnsupportedLiteral(
                    value.value_type().to_string(),
                ))
            }
        })
    }

    fn type_name(&self, ty: &ValueType) -> Option<&'static str> {
        Some(match ty.underlying() {
            ValueType::Bool => "BOOLEAN",
            ValueType::Int32 => "INTEGER",
            ValueType::Int64 | ValueType::TimeSpan => "BIGINT",
            ValueType::Double => "DOUBLE PRECISION",
            ValueType::Decimal => "DECIMAL",
            ValueType::String => "VARCHAR(4000)",
            ValueType::DateTime => "TIMESTAMP",
            _ => return None,
        })
    }

    fn cast(&self, operand: &str, ty: &ValueType) -> SqlResult<String> {
        let target = self
            .type_name(ty)
            .ok_or_else(|| SqlGenerationError::NoSqlType(ty.to_string()))?;
        Ok(format!("CAST({} AS {})", operand, target))
    }

    fn join_keyword(&self, kind: JoinKind) -> &'static str {
        if kind.contains(JoinKind::FULL_OUTER) {
            "FULL OUTER JOIN"
        } else if kind.contains(JoinKind::LEFT_OUTER) {
            "LEFT OUTER JOIN"
        } else if kind.contains(JoinKind::RIGHT_OUTER) {
            "RIGHT OUTER JOIN"
        } else {
            "INNER JOIN"
        }
    }

    fn set_operator(&self, op: SetOperator) -> &'static str {
        match op {
            SetOperator::Union => "UNION",
            SetOperator::UnionAll => "UNION ALL",
            SetOperator::Intersect => "INTERSECT",
            SetOperator::Except => "EXCEPT",
        }
    }

    fn concat(&self, parts: &[String]) -> String {
        parts.join(" || ")
    }

    fn modulo(&self, left: &str, right: &str) -> String {
        format!("{} % {}", left, right)
    }

    /// Vendor template replacing the registry entry for `op`, if any.
    fn function_template(&self, _op: SpecialOp, _arity: usize) -> Option<&'static str> {
        None
    }

    fn table_alias(&self, table: &str, alias: &str) -> String {
        format!("{} AS {}", table, alias)
    }

    /// Table selected from when a query has none.
    fn dual_table(&self) -> Option<&'static str> {
        None
    }

    /// Applies limit/offset to a finished statement.
    fn limit_clause(
        &self,
        sql: String,
        limit: Option<&str>,
        offset: Option<&str>,
        _offset_and_limit: Option<&str>,
    ) -> String {
        match (limit, offset) {
            (Some(l), Some(o)) => format!("{} LIMIT {} OFFSET {}", sql, l, o),
            (Some(l), None) => format!("{} LIMIT {}", sql, l),
            (None, Some(o)) => format!("{} OFFSET {}", sql, o),
            (None, None) => sql,
        }
    }
}

/// ANSI-leaning dialect with `@name` parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericDialect;

impl SqlDialect for GenericDialect {
    fn name(&self) -> &'static str {
        "generic"
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn parameter_name(&self, alias: &str) -> String {
        format!(":{}", alias)
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value {
            "TRUE"
        } else {
            "FALSE"
        }
    }

    fn date_time_literal(&self, text: &str) -> String {
        format!("TIMESTAMP '{}'", text)
    }

    fn type_name(&self, ty: &ValueType) -> Option<&'static str> {
        Some(match ty.underlying() {
            ValueType::Double => "DOUBLE PRECISION",
            ValueType::Decimal => "NUMERIC",
            ValueType::String => "TEXT",
            ValueType::Bool => "BOOLEAN",
            ValueType::Int32 => "INTEGER",
            ValueType::Int64 | ValueType::TimeSpan => "BIGINT",
            ValueType::DateTime => "TIMESTAMP",
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OracleDialect;

impl SqlDialect for OracleDialect {
    fn name(&self) -> &'static str {
        "oracle"
    }

    fn parameter_name(&self, alias: &str) -> String {
        format!(":{}", alias)
    }

    fn date_time_literal(&self, text: &str) -> String {
        format!("TO_DATE('{}', 'YYYY-MM-DD HH24:MI:SS')", text)
    }

    fn type_name(&self, ty: &ValueType) -> Option<&'static str> {
        Some(match ty.underlying() {
            ValueType::Bool => "NUMBER(1)",
            ValueType::Int32 => "NUMBER(10)",
            ValueType::Int64 | ValueType::TimeSpan => "NUMBER(19)",
            ValueType::Double => "BINARY_DOUBLE",
            ValueType::Decimal => "NUMBER",
            ValueType::String => "VARCHAR2(4000)",
            ValueType::DateTime => "DATE",
            _ => return None,
        })
    }

    fn set_operator(&self, op: SetOperator) -> &'static str {
        match op {
            SetOperator::Except => "MINUS",
            SetOperator::Union => "UNION",
            SetOperator::UnionAll => "UNION ALL",
            SetOperator::Intersect => "INTERSECT",
        }
    }

    fn modulo(&self, left: &str, right: &str) -> String {
        format!("MOD({}, {})", left, right)
    }

    fn function_template(&self, op: SpecialOp, arity: usize) -> Option<&'static str> {
        Some(match (op, arity) {
            (SpecialOp::StringLength, 1) => "LENGTH({0})",
            (SpecialOp::Substring, 2) => "SUBSTR({0}, {1})",
            (SpecialOp::Substring, 3) => "SUBSTR({0}, {1}, {2})",
            (SpecialOp::IndexOf, 2) => "(INSTR({0}, {1}) - 1)",
            (SpecialOp::IndexOf, 3) => "(INSTR({0}, {1}, {2}) - 1)",
            (SpecialOp::Remove, 2) => "SUBSTR({0}, 1, {1} - 1)",
            (SpecialOp::Remove, 3) => "(SUBSTR({0}, 1, {1} - 1) || SUBSTR({0}, {1} + {2}))",
            (SpecialOp::StringInsert, 3) => "(SUBSTR({0}, 1, {1} - 1) || {2} || SUBSTR({0}, {1}))",
            (SpecialOp::Now, 0) => "SYSDATE",
            (SpecialOp::Date, 1) => "TRUNC({0})",
            (SpecialOp::Millisecond, 1) => "0",
            (SpecialOp::DateDiffInMilliseconds, 2) => "(({0} - {1}) * 86400000)",
            _ => return None,
        })
    }

    fn table_alias(&self, table: &str, alias: &str) -> String {
        format!("{} {}", table, alias)
    }

    fn dual_table(&self) -> Option<&'static str> {
        Some("DUAL")
    }

    fn limit_clause(
        &self,
        sql: String,
        limit: Option<&str>,
        offset: Option<&str>,
        offset_and_limit: Option<&str>,
    ) -> String {
        match (limit, offset) {
            (None, None) => sql,
            (Some(l), None) => format!("SELECT * FROM ({}) WHERE ROWNUM <= {}", sql, l),
            (_, Some(o)) => {
                let upper = match (offset_and_limit, limit) {
                    (Some(both), _) => format!(" WHERE ROWNUM <= {}", both),
                    (None, Some(l)) => format!(" WHERE ROWNUM <= {} + {}", o, l),
                    (None, None) => String::new(),
                };
                format!(
                    "SELECT * FROM (SELECT q_.*, ROWNUM AS rn_ FROM ({}) q_{}) WHERE rn_ > {}",
                    sql, upper, o
                )
            }
        }
    }
}

/// Dialect registered under `name` (case-insensitive).
pub fn dialect_by_name(name: &str) -> SqlResult<Arc<dyn SqlDialect>> {
    match name.to_ascii_lowercase().as_str() {
        "generic" | "ansi" => Ok(Arc::new(GenericDialect)),
        "postgres" | "postgresql" => Ok(Arc::new(PostgresDialect)),
        "oracle" => Ok(Arc::new(OracleDialect)),
        other => Err(SqlGenerationError::UnknownDialect(other.to_string())),
    }
}
