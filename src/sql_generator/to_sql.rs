//! Expression rendering.

use super::dialect::SqlDialect;
use super::errors::{SqlGenerationError, SqlResult};
use super::function_registry::{apply_template, get_function_template};
use crate::query_expr::qualifier::{precedence, Precedence};
use crate::query_expr::{BinaryOp, QueryExpr, SpecialOp, UnaryOp, Value, ValueType};
use crate::query_planner::query_graph::QueryGraph;
use crate::query_planner::typing::type_of;

pub struct SqlRenderer<'a> {
    pub graph: &'a QueryGraph,
    pub dialect: &'a dyn SqlDialect,
}

/// True when a conversion changes nothing the server can observe.
pub fn is_elided_convert(expr: &QueryExpr, graph: &QueryGraph) -> bool {
    match expr {
        QueryExpr::Unary(u) if u.op == UnaryOp::Convert => {
            matches!(
                u.ty.underlying(),
                ValueType::Object | ValueType::Entity(_) | ValueType::Record(_)
            ) || type_of(&u.operand, graph).same_underlying(&u.ty)
        }
        _ => false,
    }
}

/// Peels conversions that render as their operand.
pub fn strip_elided_converts<'e>(mut expr: &'e QueryExpr, graph: &QueryGraph) -> &'e QueryExpr {
    while let QueryExpr::Unary(u) = expr {
        if !is_elided_convert(expr, graph) {
            break;
        }
        expr = &u.operand;
    }
    expr
}

fn host_node_name(expr: &QueryExpr) -> &'static str {
    match expr {
        QueryExpr::Lambda(_) | QueryExpr::Quote(_) => "lambda",
        QueryExpr::Call(_) => "method call",
        QueryExpr::Member(_) => "member access",
        QueryExpr::New(_) => "construction",
        QueryExpr::Invoke(_) => "invocation",
        QueryExpr::MetaTable(_) => "table tuple",
        QueryExpr::EntitySet(_) => "entity set",
        QueryExpr::RowValue(_) => "row value",
        _ => "expression",
    }
}

fn binary_operator(op: BinaryOp, boolean: bool) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Subtract => "-",
        BinaryOp::Multiply => "*",
        BinaryOp::Divide => "/",
        BinaryOp::Modulo => "%",
        BinaryOp::LeftShift => "<<",
        BinaryOp::RightShift => ">>",
        BinaryOp::And if boolean => "AND",
        BinaryOp::And => "&",
        BinaryOp::Or if boolean => "OR",
        BinaryOp::Or => "|",
        BinaryOp::ExclusiveOr if boolean => "<>",
        BinaryOp::ExclusiveOr => "^",
        BinaryOp::AndAlso => "AND",
        BinaryOp::OrElse => "OR",
        BinaryOp::Equal => "=",
        BinaryOp::NotEqual => "<>",
        BinaryOp::GreaterThan => ">",
        BinaryOp::GreaterThanOrEqual => ">=",
        BinaryOp::LessThan => "<",
        BinaryOp::LessThanOrEqual => "<=",
        // rendered as functions by the caller
        BinaryOp::Power | BinaryOp::Coalesce => ",",
    }
}

impl<'a> SqlRenderer<'a> {
    pub fn new(graph: &'a QueryGraph, dialect: &'a dyn SqlDialect) -> Self {
        SqlRenderer { graph, dialect }
    }

    pub fn expression(&self, expr: &QueryExpr) -> SqlResult<String> {
        let expr = strip_elided_converts(expr, self.graph);
        match expr {
            QueryExpr::Constant(value) => self.dialect.literal(value),
            QueryExpr::InputParameter(id) => {
                Ok(self.dialect.parameter_name(&self.graph.parameter(*id).alias))
            }
            QueryExpr::Column(id) => {
                let column = self.graph.column(*id);
                Ok(match &self.graph.table(column.table).alias {
                    Some(alias) => format!("{}.{}", alias, column.name),
                    None => column.name.clone(),
                })
            }
            QueryExpr::Table(id) => Ok(match &self.graph.table(*id).alias {
                Some(alias) => format!("{}.*", alias),
                None => "*".to_string(),
            }),
            QueryExpr::SubSelect(scope) => Ok(format!("({})", self.scope_chain(*scope)?)),
            QueryExpr::Binary(b) => {
                let null_test = match (b.op, b.left.as_ref(), b.right.as_ref()) {
                    (BinaryOp::Equal | BinaryOp::NotEqual, operand, QueryExpr::Constant(Value::Null))
                    | (BinaryOp::Equal | BinaryOp::NotEqual, QueryExpr::Constant(Value::Null), operand) => {
                        Some(operand)
                    }
                    _ => None,
                };
                if let Some(operand) = null_test {
                    let rendered = self.operand(Precedence::Equality, operand, false)?;
                    return Ok(if b.op == BinaryOp::Equal {
                        format!("{} IS NULL", rendered)
                    } else {
                        format!("{} IS NOT NULL", rendered)
                    });
                }
                match b.op {
                    BinaryOp::Coalesce => Ok(format!(
                        "COALESCE({}, {})",
                        self.expression(&b.left)?,
                        self.expression(&b.right)?
                    )),
                    BinaryOp::Power => Ok(format!(
                        "POWER({}, {})",
                        self.expression(&b.left)?,
                        self.expression(&b.right)?
                    )),
                    BinaryOp::Add
                        if type_of(&b.left, self.graph).is_string()
                            || type_of(&b.right, self.graph).is_string() =>
                    {
                        Ok(self.dialect.concat(&[
                            self.operand(Precedence::Additive, &b.left, false)?,
                            self.operand(Precedence::Additive, &b.right, true)?,
                        ]))
                    }
                    op => {
                        let prec = precedence(expr);
                        let left = self.operand(prec, &b.left, false)?;
                        let right = self.operand(prec, &b.right, true)?;
                        if op == BinaryOp::Modulo {
                            return Ok(self.dialect.modulo(&left, &right));
                        }
                        let boolean = type_of(&b.left, self.graph).underlying() == &ValueType::Bool;
                        Ok(format!("{} {} {}", left, binary_operator(op, boolean), right))
                    }
                }
            }
            QueryExpr::Unary(u) => match u.op {
                UnaryOp::Not => Ok(format!(
                    "NOT {}",
                    self.operand(Precedence::Unary, &u.operand, false)?
                )),
                UnaryOp::Negate => Ok(format!(
                    "-{}",
                    self.operand(Precedence::Unary, &u.operand, false)?
                )),
                UnaryOp::UnaryPlus => self.expression(&u.operand),
                UnaryOp::Convert => self.dialect.cast(&self.expression(&u.operand)?, &u.ty),
            },
            QueryExpr::Conditional(c) => Ok(format!(
                "CASE WHEN {} THEN {} ELSE {} END",
                self.expression(&c.test)?,
                self.expression(&c.if_true)?,
                self.expression(&c.if_false)?
            )),
            QueryExpr::StartIndexOffset(o) => match (o.one_based, o.folded()) {
                (false, _) => self.expression(&o.operand),
                (true, Some(n)) => Ok(n.to_string()),
                (true, None) => Ok(format!(
                    "{} + 1",
                    self.operand(Precedence::Additive, &o.operand, false)?
                )),
            },
            QueryExpr::Special(s) => self.special(expr, s.op, &s.operands),
            QueryExpr::Group(_) => Err(SqlGenerationError::Unsupported(
                "group outside of an aggregate".to_string(),
            )),
            QueryExpr::Parameter(name) => Err(SqlGenerationError::Unsupported(format!(
                "unbound parameter `{}`",
                name
            ))),
            QueryExpr::Lambda(_)
            | QueryExpr::Quote(_)
            | QueryExpr::Call(_)
            | QueryExpr::Member(_)
            | QueryExpr::New(_)
            | QueryExpr::Invoke(_)
            | QueryExpr::MetaTable(_)
            | QueryExpr::EntitySet(_)
            | QueryExpr::RowValue(_) => Err(SqlGenerationError::Unsupported(format!(
                "host expression {}",
                host_node_name(expr)
            ))),
        }
    }

    /// Renders `child`, parenthesized when it binds looser than `parent`.
    /// Right operands of equal precedence are parenthesized too, keeping
    /// `a - (b - c)` intact.
    fn operand(&self, parent: Precedence, child: &QueryExpr, right: bool) -> SqlResult<String> {
        let stripped = strip_elided_converts(child, self.graph);
        let prec = precedence(stripped);
        let rendered = self.expression(stripped)?;
        let wrap = prec > parent || (right && prec == parent && prec != Precedence::Primary);
        Ok(if wrap {
            format!("({})", rendered)
        } else {
            rendered
        })
    }

    /// Function arguments: anything but a primary is parenthesized.
    fn argument(&self, arg: &QueryExpr) -> SqlResult<String> {
        self.operand(Precedence::Primary, arg, false)
    }

    fn aggregate_operand<'e>(&self, operand: &'e QueryExpr) -> &'e QueryExpr {
        match operand {
            QueryExpr::Group(g) => &g.grouped,
            other => other,
        }
    }

    fn special(&self, expr: &QueryExpr, op: SpecialOp, operands: &[QueryExpr]) -> SqlResult<String> {
        let prec = precedence(expr);
        match op {
            SpecialOp::Count => match operands.first().map(|o| self.aggregate_operand(o)) {
                None | Some(QueryExpr::Table(_)) | Some(QueryExpr::MetaTable(_)) => {
                    Ok("COUNT(*)".to_string())
                }
                Some(operand) => Ok(format!("COUNT({})", self.expression(operand)?)),
            },
            SpecialOp::Sum | SpecialOp::Average | SpecialOp::Min | SpecialOp::Max => {
                let name = match op {
                    SpecialOp::Sum => "SUM",
                    SpecialOp::Average => "AVG",
                    SpecialOp::Min => "MIN",
                    _ => "MAX",
                };
                let operand = operands
                    .first()
                    .ok_or_else(|| SqlGenerationError::NoFunction {
                        op: name.to_string(),
                        arity: 0,
                    })?;
                Ok(format!(
                    "{}({})",
                    name,
                    self.expression(self.aggregate_operand(operand))?
                ))
            }
            SpecialOp::Like => match operands {
                [value, pattern] => Ok(format!(
                    "{} LIKE {}",
                    self.operand(prec, value, false)?,
                    self.operand(prec, pattern, true)?
                )),
                _ => Err(SqlGenerationError::NoFunction {
                    op: "Like".to_string(),
                    arity: operands.len(),
                }),
            },
            SpecialOp::In => match operands {
                [_, QueryExpr::Constant(Value::Array(items))] if items.is_empty() => {
                    Ok("1 = 0".to_string())
                }
                [value, list @ (QueryExpr::Constant(Value::Array(_)) | QueryExpr::SubSelect(_))] => {
                    Ok(format!(
                        "{} IN {}",
                        self.operand(prec, value, false)?,
                        self.expression(list)?
                    ))
                }
                _ => Err(SqlGenerationError::Unsupported(
                    "IN requires a value list or a sub-select".to_string(),
                )),
            },
            SpecialOp::IsNull | SpecialOp::IsNotNull => {
                let operand = operands.first().ok_or_else(|| SqlGenerationError::NoFunction {
                    op: format!("{:?}", op),
                    arity: 0,
                })?;
                let rendered = self.operand(prec, operand, false)?;
                Ok(if op == SpecialOp::IsNull {
                    format!("{} IS NULL", rendered)
                } else {
                    format!("{} IS NOT NULL", rendered)
                })
            }
            SpecialOp::Concat => {
                let parts = operands
                    .iter()
                    .enumerate()
                    .map(|(i, part)| self.operand(prec, part, i > 0))
                    .collect::<SqlResult<Vec<_>>>()?;
                Ok(self.dialect.concat(&parts))
            }
            _ => {
                let template = match self.dialect.function_template(op, operands.len()) {
                    Some(template) => template,
                    None => get_function_template(op, operands.len())?,
                };
                let args = operands
                    .iter()
                    .map(|arg| self.argument(arg))
                    .collect::<SqlResult<Vec<_>>>()?;
                Ok(apply_template(template, &args))
            }
        }
    }
}
