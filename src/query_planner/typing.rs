//! Static result type of an expression, resolved against the query graph.

use super::query_graph::QueryGraph;
use crate::query_expr::{BinaryOp, QueryExpr, SpecialOp, UnaryOp, ValueType};

pub fn type_of(expr: &QueryExpr, graph: &QueryGraph) -> ValueType {
    match expr {
        QueryExpr::Constant(value) => value.value_type(),
        QueryExpr::Call(c) => c.ty.clone(),
        QueryExpr::Member(m) => m.ty.clone(),
        QueryExpr::New(n) => n.ty.clone(),
        QueryExpr::RowValue(rv) => rv.ty.clone(),
        QueryExpr::Parameter(_)
        | QueryExpr::Lambda(_)
        | QueryExpr::Quote(_)
        | QueryExpr::Invoke(_) => ValueType::Object,
        QueryExpr::Table(id) => ValueType::Entity(graph.table(*id).entity.clone()),
        QueryExpr::Column(id) => graph.column(*id).ty.clone(),
        QueryExpr::InputParameter(id) => graph.parameter(*id).ty.clone(),
        QueryExpr::MetaTable(id) => graph.meta_table(*id).ty.clone(),
        QueryExpr::EntitySet(set) => {
            ValueType::Sequence(Box::new(ValueType::Entity(set.entity.clone())))
        }
        QueryExpr::Group(g) => ValueType::Sequence(Box::new(type_of(&g.grouped, graph))),
        QueryExpr::StartIndexOffset(o) => type_of(&o.operand, graph),
        QueryExpr::SubSelect(scope) => graph
            .scope(*scope)
            .operands
            .first()
            .map(|operand| type_of(operand, graph))
            .unwrap_or(ValueType::Object),
        QueryExpr::Conditional(c) => match type_of(&c.if_true, graph) {
            ValueType::Object => type_of(&c.if_false, graph),
            ty => ty,
        },
        QueryExpr::Unary(u) => match u.op {
            UnaryOp::Not => ValueType::Bool,
            UnaryOp::Convert => u.ty.clone(),
            UnaryOp::Negate | UnaryOp::UnaryPlus => type_of(&u.operand, graph),
        },
        QueryExpr::Binary(b) => binary_type(b.op, &b.left, &b.right, graph),
        QueryExpr::Special(s) => special_type(s.op, &s.operands, graph),
    }
}

fn binary_type(op: BinaryOp, left: &QueryExpr, right: &QueryExpr, graph: &QueryGraph) -> ValueType {
    if op.is_predicate() {
        return ValueType::Bool;
    }
    let (lt, rt) = (type_of(left, graph), type_of(right, graph));
    match op {
        BinaryOp::Coalesce => rt,
        BinaryOp::Power => ValueType::Double,
        BinaryOp::Subtract if lt.is_date_time() && rt.is_date_time() => ValueType::TimeSpan,
        BinaryOp::Add | BinaryOp::Subtract if lt.is_date_time() => lt,
        BinaryOp::Add if lt.is_string() || rt.is_string() => ValueType::String,
        BinaryOp::And | BinaryOp::Or | BinaryOp::ExclusiveOr if lt.underlying() == &ValueType::Bool => {
            ValueType::Bool
        }
        _ => wider(lt, rt),
    }
}

fn numeric_rank(ty: &ValueType) -> Option<u8> {
    match ty.underlying() {
        ValueType::Int32 => Some(0),
        ValueType::Int64 => Some(1),
        ValueType::Decimal => Some(2),
        ValueType::Double => Some(3),
        _ => None,
    }
}

/// Numeric promotion: the wider operand type, nullable if either side is.
fn wider(left: ValueType, right: ValueType) -> ValueType {
    let nullable = left.is_nullable() || right.is_nullable();
    let base = match (numeric_rank(&left), numeric_rank(&right)) {
        (Some(l), Some(r)) if r > l => right.underlying().clone(),
        (Some(_), _) => left.underlying().clone(),
        (None, Some(_)) => right.underlying().clone(),
        (None, None) => return left,
    };
    if nullable {
        ValueType::nullable(base)
    } else {
        base
    }
}

fn special_type(op: SpecialOp, operands: &[QueryExpr], graph: &QueryGraph) -> ValueType {
    let first = || match operands.first() {
        Some(QueryExpr::Group(g)) => type_of(&g.grouped, graph),
        Some(operand) => type_of(operand, graph),
        None => ValueType::Object,
    };
    match op {
        SpecialOp::Count => ValueType::Int64,
        SpecialOp::Average => ValueType::Double,
        SpecialOp::Sum | SpecialOp::Min | SpecialOp::Max => first(),
        SpecialOp::Abs | SpecialOp::Floor | SpecialOp::Round => first(),
        SpecialOp::Like | SpecialOp::In | SpecialOp::IsNull | SpecialOp::IsNotNull => {
            ValueType::Bool
        }
        SpecialOp::Concat
        | SpecialOp::ToUpper
        | SpecialOp::ToLower
        | SpecialOp::Trim
        | SpecialOp::LTrim
        | SpecialOp::RTrim
        | SpecialOp::Substring
        | SpecialOp::StringInsert
        | SpecialOp::Replace
        | SpecialOp::Remove => ValueType::String,
        SpecialOp::StringLength
        | SpecialOp::IndexOf
        | SpecialOp::Year
        | SpecialOp::Month
        | SpecialOp::Day
        | SpecialOp::Hour
        | SpecialOp::Minute
        | SpecialOp::Second
        | SpecialOp::Millisecond
        | SpecialOp::Sign => ValueType::Int32,
        SpecialOp::Date | SpecialOp::Now => ValueType::DateTime,
        SpecialOp::DateDiffInMilliseconds => ValueType::Int64,
        SpecialOp::Exp | SpecialOp::Ln | SpecialOp::Log | SpecialOp::Pow | SpecialOp::Sqrt => {
            ValueType::Double
        }
    }
}
