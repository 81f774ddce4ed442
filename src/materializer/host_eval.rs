//! Host-side evaluation.
//!
//! [`compile`] walks an expression once and produces a closure tree. The same
//! machinery evaluates materializers (with a row), parameter value suppliers
//! and constant folding (without one).

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};

use super::errors::{EvalError, EvalResult};
use super::row_reader::{has_row_reader, read_value, RowCursor};
use super::RowReadingContext;
use crate::query_expr::{
    BinaryOp, MethodOwner, QueryExpr, Record, SpecialOp, UnaryOp, Value, ValueType,
};
use crate::query_planner::query_graph::QueryGraph;

pub type Compiled = Arc<dyn Fn(&EvalEnv) -> EvalResult<Value> + Send + Sync>;

pub struct EvalEnv<'a> {
    pub row: Option<&'a dyn RowCursor>,
    pub reading: &'a RowReadingContext,
}

/// Evaluates an expression that needs no row.
pub fn evaluate(expr: &QueryExpr, graph: Option<&QueryGraph>) -> EvalResult<Value> {
    let compiled = compile(expr, graph)?;
    let reading = RowReadingContext::default();
    compiled(&EvalEnv {
        row: None,
        reading: &reading,
    })
}

/// `graph` resolves `InputParameter` nodes to their value expressions.
pub fn compile(expr: &QueryExpr, graph: Option<&QueryGraph>) -> EvalResult<Compiled> {
    Ok(match expr {
        QueryExpr::Constant(value) => {
            let value = value.clone();
            Arc::new(move |_| Ok(value.clone()))
        }
        QueryExpr::RowValue(rv) => {
            if !has_row_reader(&rv.ty) {
                return Err(EvalError::NoRowReader(rv.ty.to_string()));
            }
            let (index, ty) = (rv.index, rv.ty.clone());
            Arc::new(move |env| {
                let row = env.row.ok_or(EvalError::NoCurrentRow)?;
                read_value(row, index, &ty, env.reading)
            })
        }
        QueryExpr::InputParameter(id) => {
            let graph = graph.ok_or_else(|| {
                EvalError::NotHostEvaluable(format!("parameter {} without graph", id.0))
            })?;
            compile(&graph.parameter(*id).value, Some(graph))?
        }
        QueryExpr::StartIndexOffset(offset) => compile(&offset.operand, graph)?,
        QueryExpr::Binary(b) => {
            let (left, right, op) = (compile(&b.left, graph)?, compile(&b.right, graph)?, b.op);
            match op {
                BinaryOp::AndAlso => Arc::new(move |env| {
                    if !as_bool("AndAlso", left(env)?)? {
                        return Ok(Value::Bool(false));
                    }
                    Ok(Value::Bool(as_bool("AndAlso", right(env)?)?))
                }),
                BinaryOp::OrElse => Arc::new(move |env| {
                    if as_bool("OrElse", left(env)?)? {
                        return Ok(Value::Bool(true));
                    }
                    Ok(Value::Bool(as_bool("OrElse", right(env)?)?))
                }),
                BinaryOp::Coalesce => Arc::new(move |env| match left(env)? {
                    Value::Null => right(env),
                    other => Ok(other),
                }),
                _ => Arc::new(move |env| eval_binary(op, left(env)?, right(env)?)),
            }
        }
        QueryExpr::Unary(u) => {
            let (operand, op, ty) = (compile(&u.operand, graph)?, u.op, u.ty.clone());
            Arc::new(move |env| eval_unary(op, operand(env)?, &ty))
        }
        QueryExpr::Conditional(c) => {
            let test = compile(&c.test, graph)?;
            let if_true = compile(&c.if_true, graph)?;
            let if_false = compile(&c.if_false, graph)?;
            Arc::new(move |env| {
                if as_bool("Conditional", test(env)?)? {
                    if_true(env)
                } else {
                    if_false(env)
                }
            })
        }
        QueryExpr::Special(s) => {
            if s.op.is_aggregate() || s.op == SpecialOp::Like {
                return Err(EvalError::NotHostEvaluable(format!("{:?}", s.op)));
            }
            let operands = compile_all(&s.operands, graph)?;
            let op = s.op;
            Arc::new(move |env| {
                let values = operands
                    .iter()
                    .map(|operand| operand(env))
                    .collect::<EvalResult<Vec<_>>>()?;
                eval_special(op, &values)
            })
        }
        QueryExpr::New(n) => {
            let type_name = match &n.ty {
                ValueType::Entity(name) | ValueType::Record(name) => name.clone(),
                other => other.to_string(),
            };
            let names: Vec<String> = n.members.iter().map(|m| m.name.clone()).collect();
            let values = n
                .members
                .iter()
                .map(|m| compile(&m.value, graph))
                .collect::<EvalResult<Vec<_>>>()?;
            Arc::new(move |env| {
                let mut record = Record::new(type_name.clone());
                for (name, value) in names.iter().zip(values.iter()) {
                    record.fields.push((name.clone(), value(env)?));
                }
                Ok(Value::Record(record))
            })
        }
        QueryExpr::Member(m) => match &m.object {
            Some(object) => {
                let object = compile(object, graph)?;
                let name = m.name.clone();
                Arc::new(move |env| member_value(object(env)?, &name))
            }
            None if m.owner == Some(ValueType::DateTime) && m.name == "Now" => {
                Arc::new(|_| Ok(Value::DateTime(chrono::Local::now().naive_local())))
            }
            None => return Err(EvalError::NotHostEvaluable(format!("static {}", m.name))),
        },
        QueryExpr::Call(c) => {
            let target = c.object.as_deref().or(c.arguments.first()).ok_or_else(|| {
                EvalError::NotHostEvaluable(format!("{} without operand", c.name))
            })?;
            let target = compile(target, graph)?;
            match (&c.owner, c.name.as_str()) {
                (MethodOwner::Type(_), "Parse") => {
                    let ty = c.ty.clone();
                    Arc::new(move |env| parse_value(&target(env)?, &ty))
                }
                (_, "ToString") => {
                    Arc::new(move |env| Ok(Value::String(target(env)?.to_display_string())))
                }
                (owner, name) => {
                    return Err(EvalError::NotHostEvaluable(format!("{:?}.{}", owner, name)))
                }
            }
        }
        QueryExpr::Parameter(_)
        | QueryExpr::Lambda(_)
        | QueryExpr::Quote(_)
        | QueryExpr::Invoke(_)
        | QueryExpr::Table(_)
        | QueryExpr::Column(_)
        | QueryExpr::SubSelect(_)
        | QueryExpr::Group(_)
        | QueryExpr::MetaTable(_)
        | QueryExpr::EntitySet(_) => {
            return Err(EvalError::NotHostEvaluable(node_name(expr).to_string()))
        }
    })
}

fn compile_all(exprs: &[QueryExpr], graph: Option<&QueryGraph>) -> EvalResult<Vec<Compiled>> {
    exprs.iter().map(|e| compile(e, graph)).collect()
}

fn node_name(expr: &QueryExpr) -> &'static str {
    match expr {
        QueryExpr::Parameter(_) => "unbound parameter",
        QueryExpr::Lambda(_) => "lambda",
        QueryExpr::Quote(_) => "quote",
        QueryExpr::Invoke(_) => "invocation",
        QueryExpr::Table(_) => "table",
        QueryExpr::Column(_) => "column",
        QueryExpr::SubSelect(_) => "sub-select",
        QueryExpr::Group(_) => "group",
        QueryExpr::MetaTable(_) => "table tuple",
        QueryExpr::EntitySet(_) => "entity set",
        _ => "expression",
    }
}

fn as_bool(operation: &str, value: Value) -> EvalResult<bool> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(EvalError::mismatch(operation, other)),
    }
}

fn member_value(object: Value, name: &str) -> EvalResult<Value> {
    match (object, name) {
        (Value::Record(record), _) => {
            record
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::MissingMember {
                    record: record.type_name.clone(),
                    member: name.to_string(),
                })
        }
        (Value::String(s), "Length") => Ok(Value::Int(s.chars().count() as i64)),
        (Value::Null, _) => Ok(Value::Null),
        (other, _) => Err(EvalError::MissingMember {
            record: other.value_type().to_string(),
            member: name.to_string(),
        }),
    }
}

pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
        (a, b) => a == b,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
        (Value::TimeSpan(a), Value::TimeSpan(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

fn eval_binary(op: BinaryOp, left: Value, right: Value) -> EvalResult<Value> {
    use BinaryOp::*;

    match op {
        Equal => return Ok(Value::Bool(values_equal(&left, &right))),
        NotEqual => return Ok(Value::Bool(!values_equal(&left, &right))),
        GreaterThan | GreaterThanOrEqual | LessThan | LessThanOrEqual => {
            let Some(ordering) = compare(&left, &right) else {
                // comparisons with null are false
                return Ok(Value::Bool(false));
            };
            return Ok(Value::Bool(match op {
                GreaterThan => ordering == Ordering::Greater,
                GreaterThanOrEqual => ordering != Ordering::Less,
                LessThan => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            }));
        }
        AndAlso => return Ok(Value::Bool(as_bool("AndAlso", left)? && as_bool("AndAlso", right)?)),
        OrElse => return Ok(Value::Bool(as_bool("OrElse", left)? || as_bool("OrElse", right)?)),
        Coalesce => return Ok(if left.is_null() { right } else { left }),
        _ => {}
    }

    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    match (op, &left, &right) {
        (Add, Value::String(a), b) => return Ok(Value::String(format!("{}{}", a, b.to_display_string()))),
        (Add, a, Value::String(b)) => return Ok(Value::String(format!("{}{}", a.to_display_string(), b))),
        (Add, Value::DateTime(d), Value::TimeSpan(ms)) => {
            return Ok(Value::DateTime(*d + Duration::milliseconds(*ms)))
        }
        (Subtract, Value::DateTime(a), Value::DateTime(b)) => {
            return Ok(Value::TimeSpan((*a - *b).num_milliseconds()))
        }
        (Subtract, Value::DateTime(d), Value::TimeSpan(ms)) => {
            return Ok(Value::DateTime(*d - Duration::milliseconds(*ms)))
        }
        (Add, Value::TimeSpan(a), Value::TimeSpan(b)) => return Ok(Value::TimeSpan(a + b)),
        (Subtract, Value::TimeSpan(a), Value::TimeSpan(b)) => return Ok(Value::TimeSpan(a - b)),
        (And | Or | ExclusiveOr, Value::Bool(a), Value::Bool(b)) => {
            return Ok(Value::Bool(match op {
                And => *a & *b,
                Or => *a | *b,
                _ => *a ^ *b,
            }))
        }
        (Power, a, b) => {
            let (a, b) = (
                a.as_f64().ok_or_else(|| EvalError::mismatch("Power", a))?,
                b.as_f64().ok_or_else(|| EvalError::mismatch("Power", b))?,
            );
            return Ok(Value::Float(a.powf(b)));
        }
        _ => {}
    }

    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            Ok(Value::Int(match op {
                Add => a.wrapping_add(b),
                Subtract => a.wrapping_sub(b),
                Multiply => a.wrapping_mul(b),
                Divide => a.checked_div(b).ok_or(EvalError::DivideByZero)?,
                Modulo => a.checked_rem(b).ok_or(EvalError::DivideByZero)?,
                And => a & b,
                Or => a | b,
                ExclusiveOr => a ^ b,
                LeftShift => a.wrapping_shl(b as u32),
                RightShift => a.wrapping_shr(b as u32),
                _ => return Err(EvalError::mismatch(&format!("{:?}", op), (&left, &right))),
            }))
        }
        (a, b) => {
            let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
                return Err(EvalError::mismatch(&format!("{:?}", op), (a, b)));
            };
            Ok(Value::Float(match op {
                Add => x + y,
                Subtract => x - y,
                Multiply => x * y,
                Divide => x / y,
                Modulo => x % y,
                _ => return Err(EvalError::mismatch(&format!("{:?}", op), (a, b))),
            }))
        }
    }
}

fn eval_unary(op: UnaryOp, value: Value, ty: &ValueType) -> EvalResult<Value> {
    match (op, value) {
        (_, Value::Null) if op != UnaryOp::Not => Ok(Value::Null),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Not, Value::Int(i)) => Ok(Value::Int(!i)),
        (UnaryOp::Negate, Value::Int(i)) => Ok(Value::Int(i.wrapping_neg())),
        (UnaryOp::Negate, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Negate, Value::TimeSpan(ms)) => Ok(Value::TimeSpan(ms.wrapping_neg())),
        (UnaryOp::UnaryPlus, v) => Ok(v),
        (UnaryOp::Convert, v) => convert_value(v, ty),
        (op, v) => Err(EvalError::mismatch(&format!("{:?}", op), v)),
    }
}

/// Explicit conversion, truncating toward zero like a numeric cast.
pub fn convert_value(value: Value, ty: &ValueType) -> EvalResult<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match ty.underlying() {
        ValueType::Int32 | ValueType::Int64 => match value {
            Value::Int(_) => Ok(value),
            Value::Float(f) => Ok(Value::Int(f.trunc() as i64)),
            Value::Bool(b) => Ok(Value::Int(b as i64)),
            Value::TimeSpan(ms) => Ok(Value::Int(ms)),
            Value::String(_) => parse_value(&value, ty),
            other => Err(EvalError::mismatch("Convert", other)),
        },
        ValueType::Double | ValueType::Decimal => match value {
            Value::String(_) => parse_value(&value, ty),
            other => other
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| EvalError::mismatch("Convert", other)),
        },
        ValueType::String => Ok(Value::String(value.to_display_string())),
        ValueType::Bool => match value {
            Value::Bool(_) => Ok(value),
            Value::Int(i) => Ok(Value::Bool(i != 0)),
            Value::String(_) => parse_value(&value, ty),
            other => Err(EvalError::mismatch("Convert", other)),
        },
        ValueType::DateTime => match value {
            Value::DateTime(_) => Ok(value),
            Value::String(_) => parse_value(&value, ty),
            other => Err(EvalError::mismatch("Convert", other)),
        },
        ValueType::TimeSpan => match value {
            Value::TimeSpan(_) => Ok(value),
            Value::Int(ms) => Ok(Value::TimeSpan(ms)),
            other => Err(EvalError::mismatch("Convert", other)),
        },
        _ => Ok(value),
    }
}

pub fn parse_value(value: &Value, ty: &ValueType) -> EvalResult<Value> {
    let text = match value {
        Value::String(s) => s.trim(),
        Value::Null => return Ok(Value::Null),
        other => return convert_value(other.clone(), ty),
    };
    let fail = || EvalError::Parse {
        value: text.to_string(),
        ty: ty.to_string(),
    };
    match ty.underlying() {
        ValueType::Int32 | ValueType::Int64 => text.parse::<i64>().map(Value::Int).map_err(|_| fail()),
        ValueType::Double | ValueType::Decimal => {
            text.parse::<f64>().map(Value::Float).map_err(|_| fail())
        }
        ValueType::Bool => match text.to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(fail()),
        },
        ValueType::DateTime => NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S"))
            .or_else(|_| {
                NaiveDate::parse_from_str(text, "%Y-%m-%d")
                    .map(|d| d.and_time(chrono::NaiveTime::MIN))
            })
            .map(Value::DateTime)
            .map_err(|_| fail()),
        ValueType::String => Ok(Value::String(text.to_string())),
        _ => Err(fail()),
    }
}

fn string_arg<'v>(op: SpecialOp, values: &'v [Value], index: usize) -> EvalResult<&'v str> {
    match values.get(index) {
        Some(Value::String(s)) => Ok(s),
        other => Err(EvalError::mismatch(&format!("{:?}", op), other)),
    }
}

fn index_arg(op: SpecialOp, values: &[Value], index: usize) -> EvalResult<usize> {
    match values.get(index) {
        Some(Value::Int(i)) if *i >= 0 => Ok(*i as usize),
        other => Err(EvalError::mismatch(&format!("{:?}", op), other)),
    }
}

fn float_arg(op: SpecialOp, values: &[Value], index: usize) -> EvalResult<f64> {
    values
        .get(index)
        .and_then(Value::as_f64)
        .ok_or_else(|| EvalError::mismatch(&format!("{:?}", op), values.get(index)))
}

fn date_arg(op: SpecialOp, values: &[Value], index: usize) -> EvalResult<NaiveDateTime> {
    match values.get(index) {
        Some(Value::DateTime(dt)) => Ok(*dt),
        other => Err(EvalError::mismatch(&format!("{:?}", op), other)),
    }
}

fn char_slice(s: &str, start: usize, len: Option<usize>) -> Option<String> {
    let total = s.chars().count();
    let len = len.unwrap_or(total.checked_sub(start)?);
    if start + len > total {
        return None;
    }
    Some(s.chars().skip(start).take(len).collect())
}

fn eval_special(op: SpecialOp, values: &[Value]) -> EvalResult<Value> {
    use SpecialOp::*;

    match op {
        IsNull => return Ok(Value::Bool(values.first().map(Value::is_null).unwrap_or(true))),
        IsNotNull => return Ok(Value::Bool(!values.first().map(Value::is_null).unwrap_or(true))),
        Concat => {
            return Ok(Value::String(
                values.iter().map(Value::to_display_string).collect(),
            ))
        }
        In => {
            let needle = values.first().ok_or_else(|| EvalError::mismatch("In", values))?;
            return match values.get(1) {
                Some(Value::Array(items)) => {
                    Ok(Value::Bool(items.iter().any(|item| values_equal(item, needle))))
                }
                other => Err(EvalError::mismatch("In", other)),
            };
        }
        Now => return Ok(Value::DateTime(chrono::Local::now().naive_local())),
        Count | Sum | Average | Min | Max | Like => {
            return Err(EvalError::NotHostEvaluable(format!("{:?}", op)))
        }
        _ => {}
    }

    if values.iter().any(Value::is_null) {
        return Ok(Value::Null);
    }

    let out_of_range = || EvalError::mismatch(&format!("{:?}", op), values);
    Ok(match op {
        StringLength => Value::Int(string_arg(op, values, 0)?.chars().count() as i64),
        ToUpper => Value::String(string_arg(op, values, 0)?.to_uppercase()),
        ToLower => Value::String(string_arg(op, values, 0)?.to_lowercase()),
        Trim => Value::String(string_arg(op, values, 0)?.trim().to_string()),
        LTrim => Value::String(string_arg(op, values, 0)?.trim_start().to_string()),
        RTrim => Value::String(string_arg(op, values, 0)?.trim_end().to_string()),
        Substring => {
            let s = string_arg(op, values, 0)?;
            let start = index_arg(op, values, 1)?;
            let len = if values.len() > 2 {
                Some(index_arg(op, values, 2)?)
            } else {
                None
            };
            Value::String(char_slice(s, start, len).ok_or_else(out_of_range)?)
        }
        StringInsert => {
            let s = string_arg(op, values, 0)?;
            let at = index_arg(op, values, 1)?;
            let inserted = string_arg(op, values, 2)?;
            let head = char_slice(s, 0, Some(at)).ok_or_else(out_of_range)?;
            let tail = char_slice(s, at, None).ok_or_else(out_of_range)?;
            Value::String(format!("{}{}{}", head, inserted, tail))
        }
        Remove => {
            let s = string_arg(op, values, 0)?;
            let at = index_arg(op, values, 1)?;
            let head = char_slice(s, 0, Some(at)).ok_or_else(out_of_range)?;
            if values.len() > 2 {
                let count = index_arg(op, values, 2)?;
                let tail = char_slice(s, at + count, None).ok_or_else(out_of_range)?;
                Value::String(head + &tail)
            } else {
                Value::String(head)
            }
        }
        Replace => Value::String(string_arg(op, values, 0)?.replace(
            string_arg(op, values, 1)?,
            string_arg(op, values, 2)?,
        )),
        IndexOf => {
            let s = string_arg(op, values, 0)?;
            let needle = string_arg(op, values, 1)?;
            let start = if values.len() > 2 {
                index_arg(op, values, 2)?
            } else {
                0
            };
            let haystack: String = s.chars().skip(start).collect();
            Value::Int(match haystack.find(needle) {
                Some(byte_pos) => (start + haystack[..byte_pos].chars().count()) as i64,
                None => -1,
            })
        }
        Year => Value::Int(date_arg(op, values, 0)?.year() as i64),
        Month => Value::Int(date_arg(op, values, 0)?.month() as i64),
        Day => Value::Int(date_arg(op, values, 0)?.day() as i64),
        Hour => Value::Int(date_arg(op, values, 0)?.hour() as i64),
        Minute => Value::Int(date_arg(op, values, 0)?.minute() as i64),
        Second => Value::Int(date_arg(op, values, 0)?.second() as i64),
        Millisecond => Value::Int((date_arg(op, values, 0)?.nanosecond() / 1_000_000) as i64),
        Date => Value::DateTime(date_arg(op, values, 0)?.date().and_time(chrono::NaiveTime::MIN)),
        DateDiffInMilliseconds => Value::Int(
            (date_arg(op, values, 0)? - date_arg(op, values, 1)?).num_milliseconds(),
        ),
        Abs => match values.first() {
            Some(Value::Int(i)) => Value::Int(i.wrapping_abs()),
            _ => Value::Float(float_arg(op, values, 0)?.abs()),
        },
        Sign => Value::Int(match values.first() {
            Some(Value::Int(i)) => i.signum(),
            _ => {
                let f = float_arg(op, values, 0)?;
                if f > 0.0 {
                    1
                } else if f < 0.0 {
                    -1
                } else {
                    0
                }
            }
        }),
        Floor => match values.first() {
            Some(Value::Int(i)) => Value::Int(*i),
            _ => Value::Float(float_arg(op, values, 0)?.floor()),
        },
        Round => match values.first() {
            Some(Value::Int(i)) => Value::Int(*i),
            _ => Value::Float(float_arg(op, values, 0)?.round_ties_even()),
        },
        Exp => Value::Float(float_arg(op, values, 0)?.exp()),
        Ln => Value::Float(float_arg(op, values, 0)?.ln()),
        Log => Value::Float(float_arg(op, values, 0)?.log(float_arg(op, values, 1)?)),
        Pow => Value::Float(float_arg(op, values, 0)?.powf(float_arg(op, values, 1)?)),
        Sqrt => Value::Float(float_arg(op, values, 0)?.sqrt()),
        IsNull | IsNotNull | Concat | In | Now | Count | Sum | Average | Min | Max | Like => {
            return Err(EvalError::NotHostEvaluable(format!("{:?}", op)))
        }
    })
}
