//! Aggregates and the derived `source` table.
//!
//! A terminal aggregate folds into the current scope when it can. Once the
//! scope already has a result list, a grouping or a set-operation sibling it
//! becomes a derived table and the aggregate moves to a new parent scope:
//!
//! ```text
//! SELECT SUM(source.c0) FROM (SELECT ... AS c0 FROM ...) AS source
//! ```
//!
//! Aggregates inside a lambda body become correlated sub-selects, or
//! aggregates over the group when the source is a grouping.

use super::{expect_operands, Dispatcher};
use crate::query_expr::{
    GroupExpr, QueryExpr, ScopeId, SpecialOp, TableId, UnaryOp, Value, ValueType,
};
use crate::query_planner::builder_ctx::BuilderContext;
use crate::query_planner::errors::{BuildError, BuildResult};
use crate::query_planner::query_graph::{ColumnRef, TableRef};
use crate::query_planner::typing::type_of;

const DERIVED_TABLE: &str = "source";

impl Dispatcher<'_> {
    /// `operands` is the source, optionally followed by the selector (the
    /// predicate for Count). `negate_predicate` serves `All`.
    pub(super) fn analyze_aggregate(
        &mut self,
        op: SpecialOp,
        operands: &[QueryExpr],
        negate_predicate: bool,
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        expect_operands(&format!("{:?}", op), operands, &[1, 2])?;
        if ctx.is_external_in_chain {
            self.terminal_aggregate(op, operands, negate_predicate, ctx)
        } else {
            self.nested_aggregate(op, operands, negate_predicate, ctx)
        }
    }

    fn terminal_aggregate(
        &mut self,
        op: SpecialOp,
        operands: &[QueryExpr],
        negate_predicate: bool,
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        let source = self.analyze_source(&operands[0], ctx)?;
        let scope = self.graph.scope(ctx.current_scope);
        let needs_parent = scope.next.is_some()
            || !scope.operands.is_empty()
            || !scope.group.is_empty()
            || scope.limit.is_some()
            || scope.offset.is_some();

        if needs_parent {
            return self.aggregate_over_parent_select(op, source, operands, negate_predicate, ctx);
        }
        let operand = self.aggregate_operand(op, &source, operands, negate_predicate, ctx)?;
        Ok(QueryExpr::special(op, operand))
    }

    fn aggregate_over_parent_select(
        &mut self,
        op: SpecialOp,
        source: QueryExpr,
        operands: &[QueryExpr],
        negate_predicate: bool,
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        let projection = match (op, operands.get(1)) {
            (SpecialOp::Count, Some(predicate)) => {
                let predicate = self.analyze(predicate, &[source.clone()], ctx)?;
                self.push_count_filter(predicate, negate_predicate, ctx);
                whole_row(source)
            }
            (SpecialOp::Count, None) => whole_row(source),
            (_, Some(selector)) => self.analyze(selector, &[source], ctx)?,
            (_, None) => whole_row(source),
        };
        let ty = type_of(&projection, &self.graph);
        let derived = self.new_parent_select(&projection, ctx)?;

        if op == SpecialOp::Count {
            return Ok(QueryExpr::special(SpecialOp::Count, vec![]));
        }
        let column = self.graph.add_column(ColumnRef {
            table: derived,
            name: "c0".to_string(),
            member: "c0".to_string(),
            ty,
            alias: None,
        });
        self.graph.scope_mut(ctx.current_scope).columns.push(column);
        Ok(QueryExpr::special(op, vec![QueryExpr::Column(column)]))
    }

    /// Cuts the current scope with `projection` as its result list and wraps
    /// it in a new parent scope as the derived table. `ctx` moves to the
    /// parent, which starts over with the configured server-load policy.
    pub(super) fn new_parent_select(
        &mut self,
        projection: &QueryExpr,
        ctx: &mut BuilderContext,
    ) -> BuildResult<TableId> {
        self.maximize_server_load = true;
        let cut = self.build_select(projection, ctx);
        self.maximize_server_load = self.query.maximize_server_load;
        cut?;

        let inner = ctx.current_scope;
        let parent = self.graph.scope(inner).parent;
        let outer = self.graph.add_scope(parent);
        self.graph.scope_mut(inner).parent = Some(outer);

        let mut table = TableRef::new(DERIVED_TABLE, DERIVED_TABLE);
        table.alias = Some(DERIVED_TABLE.to_string());
        table.source = Some(inner);
        let table = self.graph.add_table(table);
        self.graph.scope_mut(outer).tables.push(table);

        log::debug!("Scope {} wrapped as derived table in scope {}", inner.0, outer.0);
        ctx.current_scope = outer;
        Ok(table)
    }

    fn push_count_filter(&mut self, predicate: QueryExpr, negate: bool, ctx: &BuilderContext) {
        let predicate = if negate {
            QueryExpr::unary(UnaryOp::Not, predicate, ValueType::Bool)
        } else {
            predicate
        };
        self.graph
            .scope_mut(ctx.current_scope)
            .filters
            .push(predicate);
    }

    /// Operand list of the aggregate call. Count never has one; its predicate
    /// becomes a filter of the scope.
    fn aggregate_operand(
        &mut self,
        op: SpecialOp,
        source: &QueryExpr,
        operands: &[QueryExpr],
        negate_predicate: bool,
        ctx: &mut BuilderContext,
    ) -> BuildResult<Vec<QueryExpr>> {
        match (op, operands.get(1)) {
            (SpecialOp::Count, Some(predicate)) => {
                let predicate = self.analyze(predicate, &[source.clone()], ctx)?;
                self.push_count_filter(predicate, negate_predicate, ctx);
                Ok(vec![])
            }
            (SpecialOp::Count, None) => Ok(vec![]),
            (_, Some(selector)) => Ok(vec![self.analyze(selector, &[source.clone()], ctx)?]),
            (_, None)
                if matches!(
                    source,
                    QueryExpr::Table(_)
                        | QueryExpr::MetaTable(_)
                        | QueryExpr::EntitySet(_)
                        | QueryExpr::Group(_)
                ) =>
            {
                Err(BuildError::UnsupportedConstruct(format!("{:?} over whole rows", op)))
            }
            (_, None) => Ok(vec![source.clone()]),
        }
    }

    fn nested_aggregate(
        &mut self,
        op: SpecialOp,
        operands: &[QueryExpr],
        negate_predicate: bool,
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        let nested = self.graph.add_scope(Some(ctx.current_scope));
        let mut nested_ctx = ctx.new_select(nested);
        let source = self.analyze(&operands[0], &[], &mut nested_ctx)?;

        if let QueryExpr::Group(group) = source {
            self.discard_empty_scope(nested);
            return self.group_aggregate(op, group, operands, negate_predicate, ctx);
        }

        let source = self.resolve_source(source, &nested_ctx)?;
        let operand =
            self.aggregate_operand(op, &source, operands, negate_predicate, &mut nested_ctx)?;
        self.graph.scope_mut(nested).operands = vec![QueryExpr::special(op, operand)];
        Ok(QueryExpr::SubSelect(nested))
    }

    /// Drops a scope opened speculatively when nothing was registered in it.
    fn discard_empty_scope(&mut self, scope: ScopeId) {
        let is_last = scope.0 + 1 == self.graph.scopes.len();
        let untouched = {
            let s = self.graph.scope(scope);
            s.tables.is_empty() && s.columns.is_empty() && s.filters.is_empty()
        };
        if is_last && untouched {
            self.graph.scopes.pop();
        }
    }

    /// Aggregates over the rows of the current group.
    fn group_aggregate(
        &mut self,
        op: SpecialOp,
        group: GroupExpr,
        operands: &[QueryExpr],
        negate_predicate: bool,
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        let element = (*group.grouped).clone();
        let over_group = |grouped: QueryExpr| {
            QueryExpr::Group(GroupExpr {
                grouped: Box::new(grouped),
                key: group.key.clone(),
            })
        };
        match (op, operands.get(1)) {
            (SpecialOp::Count, Some(predicate)) => {
                let mut predicate = self.analyze(predicate, &[element], ctx)?;
                if negate_predicate {
                    predicate = QueryExpr::unary(UnaryOp::Not, predicate, ValueType::Bool);
                }
                let counted = QueryExpr::conditional(
                    predicate,
                    QueryExpr::Constant(Value::Int(1)),
                    QueryExpr::Constant(Value::Int(0)),
                );
                Ok(QueryExpr::special(SpecialOp::Sum, vec![over_group(counted)]))
            }
            (SpecialOp::Count, None) => Ok(QueryExpr::special(
                SpecialOp::Count,
                vec![QueryExpr::Group(group.clone())],
            )),
            (_, Some(selector)) => {
                let selected = self.analyze(selector, &[element], ctx)?;
                Ok(QueryExpr::special(op, vec![over_group(selected)]))
            }
            (_, None) => Ok(QueryExpr::special(op, vec![QueryExpr::Group(group.clone())])),
        }
    }
}

/// The grouping key stands for a group's rows once they are projected.
fn whole_row(source: QueryExpr) -> QueryExpr {
    match source {
        QueryExpr::Group(group) => *group.key,
        other => other,
    }
}
