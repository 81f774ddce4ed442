//! Evaluation precedence and tier classification for every expression node.
//!
//! Both tables are exhaustive matches: a new node kind does not compile until
//! it is classified here.

use super::{BinaryOp, QueryExpr, SpecialOp, UnaryOp};

/// Where a node can be evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Only the host can evaluate it (unresolved calls, constructions, lambdas)
    HostOnly,
    /// Only the database can evaluate it (columns, aggregates, sub-selects)
    ServerOnly,
    Either,
}

/// Binding strength, tightest first. A child binding looser than its parent
/// needs parentheses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Precedence {
    Primary,
    Unary,
    Multiplicative,
    Additive,
    Shift,
    Relational,
    Equality,
    LogicalAnd,
    LogicalXor,
    LogicalOr,
    ConditionalAnd,
    ConditionalOr,
    NullCoalescing,
    Conditional,
}

pub fn precedence(expr: &QueryExpr) -> Precedence {
    match expr {
        QueryExpr::Binary(b) => match b.op {
            BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => Precedence::Multiplicative,
            BinaryOp::Add | BinaryOp::Subtract => Precedence::Additive,
            BinaryOp::LeftShift | BinaryOp::RightShift => Precedence::Shift,
            BinaryOp::GreaterThan
            | BinaryOp::GreaterThanOrEqual
            | BinaryOp::LessThan
            | BinaryOp::LessThanOrEqual => Precedence::Relational,
            BinaryOp::Equal | BinaryOp::NotEqual => Precedence::Equality,
            BinaryOp::And => Precedence::LogicalAnd,
            BinaryOp::ExclusiveOr => Precedence::LogicalXor,
            BinaryOp::Or => Precedence::LogicalOr,
            BinaryOp::AndAlso => Precedence::ConditionalAnd,
            BinaryOp::OrElse => Precedence::ConditionalOr,
            BinaryOp::Coalesce => Precedence::NullCoalescing,
            // rendered as a function call
            BinaryOp::Power => Precedence::Primary,
        },
        QueryExpr::Unary(u) => match u.op {
            UnaryOp::Not | UnaryOp::Negate | UnaryOp::UnaryPlus => Precedence::Unary,
            UnaryOp::Convert => Precedence::Primary,
        },
        QueryExpr::Conditional(_) => Precedence::Conditional,
        QueryExpr::Special(s) => match s.op {
            SpecialOp::Concat => Precedence::Additive,
            SpecialOp::Like | SpecialOp::In => Precedence::Relational,
            SpecialOp::IsNull | SpecialOp::IsNotNull => Precedence::Equality,
            _ => Precedence::Primary,
        },
        QueryExpr::StartIndexOffset(o) if o.one_based && o.folded().is_none() => {
            Precedence::Additive
        }
        QueryExpr::Constant(_)
        | QueryExpr::Parameter(_)
        | QueryExpr::Lambda(_)
        | QueryExpr::Quote(_)
        | QueryExpr::Call(_)
        | QueryExpr::Member(_)
        | QueryExpr::New(_)
        | QueryExpr::Invoke(_)
        | QueryExpr::Table(_)
        | QueryExpr::Column(_)
        | QueryExpr::InputParameter(_)
        | QueryExpr::SubSelect(_)
        | QueryExpr::Group(_)
        | QueryExpr::MetaTable(_)
        | QueryExpr::EntitySet(_)
        | QueryExpr::StartIndexOffset(_)
        | QueryExpr::RowValue(_) => Precedence::Primary,
    }
}

/// The tier of the node itself, ignoring its children.
pub fn tier(expr: &QueryExpr) -> Tier {
    match expr {
        QueryExpr::Constant(_) | QueryExpr::InputParameter(_) => Tier::Either,
        QueryExpr::Binary(_)
        | QueryExpr::Unary(_)
        | QueryExpr::Conditional(_)
        | QueryExpr::StartIndexOffset(_) => Tier::Either,
        QueryExpr::Special(s) => match s.op {
            op if op.is_aggregate() => Tier::ServerOnly,
            SpecialOp::Like | SpecialOp::Now => Tier::ServerOnly,
            _ => Tier::Either,
        },
        QueryExpr::Table(_)
        | QueryExpr::Column(_)
        | QueryExpr::SubSelect(_)
        | QueryExpr::Group(_)
        | QueryExpr::MetaTable(_) => Tier::ServerOnly,
        QueryExpr::Parameter(_)
        | QueryExpr::Lambda(_)
        | QueryExpr::Quote(_)
        | QueryExpr::Call(_)
        | QueryExpr::Member(_)
        | QueryExpr::New(_)
        | QueryExpr::Invoke(_)
        | QueryExpr::EntitySet(_)
        | QueryExpr::RowValue(_) => Tier::HostOnly,
    }
}

/// True if any node of the tree can only run on the server.
pub fn contains_server_only(expr: &QueryExpr) -> bool {
    expr.any(&|e| tier(e) == Tier::ServerOnly)
}

/// True if any node of the tree can only run on the host.
pub fn contains_host_only(expr: &QueryExpr) -> bool {
    expr.any(&|e| tier(e) == Tier::HostOnly)
}

/// True if the tree yields a boolean.
pub fn is_predicate(expr: &QueryExpr) -> bool {
    match expr {
        QueryExpr::Binary(b) => b.op.is_predicate(),
        QueryExpr::Unary(u) => u.op == UnaryOp::Not,
        QueryExpr::Special(s) => s.op.is_predicate(),
        _ => false,
    }
}
