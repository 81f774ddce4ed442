//! Expression passes run over a finished query graph.
//!
//! A pass rewrites one expression at a time and reports whether it changed
//! anything. [`optimize_graph`] applies the passes to every expression a
//! scope renders: select list, filters, grouping, ordering, paging and the
//! row reader.

use crate::materializer::host_eval::evaluate;
use crate::query_expr::{QueryExpr, SpecialOp, Value};
use crate::query_planner::errors::BuildError;
use crate::query_planner::query_graph::{QueryGraph, SelectScope};

pub type OptimizerResult<T> = Result<T, BuildError>;

#[derive(Debug, PartialEq, Clone)]
pub enum Transformed<T> {
    Yes(T),
    No(T),
}

impl<T> Transformed<T> {
    pub fn into_inner(self) -> T {
        match self {
            Transformed::Yes(value) | Transformed::No(value) => value,
        }
    }

    pub fn is_yes(&self) -> bool {
        matches!(self, Transformed::Yes(_))
    }
}

pub trait OptimizerPass {
    fn optimize(
        &self,
        expr: &QueryExpr,
        graph: &QueryGraph,
    ) -> OptimizerResult<Transformed<QueryExpr>>;
}

/// Evaluates subtrees whose operands are all constants. A subtree the host
/// cannot evaluate is left for the server.
pub struct ConstantFolding;

impl ConstantFolding {
    fn foldable(expr: &QueryExpr) -> bool {
        let all_constant =
            |children: Vec<&QueryExpr>| children.iter().all(|c| matches!(c, QueryExpr::Constant(_)));
        match expr {
            QueryExpr::Binary(_) | QueryExpr::Unary(_) => all_constant(expr.children()),
            QueryExpr::Special(s) => {
                !s.op.is_aggregate()
                    && !matches!(s.op, SpecialOp::Like | SpecialOp::Now)
                    && !s.operands.is_empty()
                    && all_constant(expr.children())
            }
            _ => false,
        }
    }

    fn fold(&self, expr: &QueryExpr) -> OptimizerResult<Transformed<QueryExpr>> {
        let mut changed = false;
        let rebuilt = expr.try_map_children(&mut |child| {
            let folded = self.fold(child)?;
            changed |= folded.is_yes();
            Ok::<_, BuildError>(folded.into_inner())
        })?;

        if let QueryExpr::Conditional(c) = &rebuilt {
            if let QueryExpr::Constant(Value::Bool(test)) = c.test.as_ref() {
                let branch = if *test { &c.if_true } else { &c.if_false };
                return Ok(Transformed::Yes(branch.as_ref().clone()));
            }
        }

        if Self::foldable(&rebuilt) {
            match evaluate(&rebuilt, None) {
                Ok(value) => return Ok(Transformed::Yes(QueryExpr::Constant(value))),
                Err(err) => log::trace!("Left unfolded: {}", err),
            }
        }

        Ok(if changed {
            Transformed::Yes(rebuilt)
        } else {
            Transformed::No(rebuilt)
        })
    }
}

impl OptimizerPass for ConstantFolding {
    fn optimize(
        &self,
        expr: &QueryExpr,
        _graph: &QueryGraph,
    ) -> OptimizerResult<Transformed<QueryExpr>> {
        self.fold(expr)
    }
}

fn scope_expressions(scope: &mut SelectScope) -> Vec<&mut QueryExpr> {
    let mut exprs: Vec<&mut QueryExpr> = Vec::new();
    exprs.extend(scope.operands.iter_mut());
    exprs.extend(scope.filters.iter_mut());
    for group in scope.group.iter_mut() {
        exprs.push(group.grouped.as_mut());
        exprs.push(group.key.as_mut());
    }
    exprs.extend(scope.order_by.iter_mut().map(|item| &mut item.expression));
    exprs.extend(scope.limit.as_mut());
    exprs.extend(scope.offset.as_mut());
    exprs.extend(scope.offset_and_limit.as_mut());
    exprs.extend(scope.reader.as_mut());
    exprs
}

/// Runs `passes` in order over every expression of every scope.
pub fn optimize_graph(
    graph: &mut QueryGraph,
    passes: &[&dyn OptimizerPass],
) -> OptimizerResult<()> {
    let mut rewritten = 0;
    for index in 0..graph.scopes.len() {
        let mut scope = graph.scopes[index].clone();
        for expr in scope_expressions(&mut scope) {
            for pass in passes {
                if let Transformed::Yes(new) = pass.optimize(expr, graph)? {
                    *expr = new;
                    rewritten += 1;
                }
            }
        }
        graph.scopes[index] = scope;
    }
    log::debug!("Optimizer rewrote {} expressions", rewritten);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_expr::builders::*;
    use crate::query_expr::{BinaryOp, ColumnId, IndexOffset, ValueType};

    fn fold(expr: QueryExpr) -> Transformed<QueryExpr> {
        ConstantFolding.optimize(&expr, &QueryGraph::new()).unwrap()
    }

    #[test]
    fn test_folds_constant_arithmetic() {
        assert_eq!(
            fold(add(constant(2), constant(3))),
            Transformed::Yes(constant(5))
        );
    }

    #[test]
    fn test_column_blocks_folding() {
        let column = QueryExpr::Column(ColumnId(0));
        let expr = gt(column.clone(), add(constant(1), constant(1)));
        assert_eq!(fold(expr), Transformed::Yes(gt(column, constant(2))));
    }

    #[test]
    fn test_constant_test_selects_branch() {
        let column = QueryExpr::Column(ColumnId(0));
        let expr = QueryExpr::conditional(
            lt(constant(1), constant(2)),
            column.clone(),
            constant(0),
        );
        assert_eq!(fold(expr), Transformed::Yes(column));
    }

    #[test]
    fn test_now_and_index_offsets_survive() {
        let now = QueryExpr::special(SpecialOp::Now, vec![]);
        assert_eq!(fold(now.clone()), Transformed::No(now));

        let offset = QueryExpr::StartIndexOffset(IndexOffset {
            operand: Box::new(constant(1)),
            one_based: true,
        });
        assert_eq!(fold(offset.clone()), Transformed::No(offset));
    }

    #[test]
    fn test_failed_evaluation_is_left_alone() {
        let expr = QueryExpr::binary(BinaryOp::Divide, constant(1), constant(0));
        assert_eq!(fold(expr.clone()), Transformed::No(expr));
    }

    #[test]
    fn test_optimize_graph_rewrites_filters_and_limits() {
        let mut graph = QueryGraph::new();
        let root = graph.root();
        graph.scope_mut(root).filters = vec![gt(
            QueryExpr::Column(ColumnId(0)),
            QueryExpr::convert(constant(3), ValueType::Int64),
        )];
        graph.scope_mut(root).limit = Some(QueryExpr::conditional(
            lt(constant(3), constant(5)),
            constant(3),
            constant(5),
        ));
        optimize_graph(&mut graph, &[&ConstantFolding]).unwrap();
        assert_eq!(graph.scope(root).limit, Some(constant(3)));
        assert_eq!(
            graph.scope(root).filters,
            vec![gt(QueryExpr::Column(ColumnId(0)), constant(3))]
        );
    }
}
