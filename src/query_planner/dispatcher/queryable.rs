//! Relational operator handlers.

use super::{expect_operands, Dispatcher, QueryOperation};
use crate::materializer::host_eval::evaluate;
use crate::query_expr::{
    BinaryOp, GroupExpr, MemberAccess, QueryChain, QueryExpr, SpecialOp, Value, ValueType,
};
use crate::query_planner::builder_ctx::BuilderContext;
use crate::query_planner::errors::{BuildError, BuildResult};
use crate::query_planner::query_graph::{
    ExecuteMethod, JoinDescriptor, JoinKind, OrderByItem, SetOperator,
};

/// The query a constant (or a captured member) denotes, if any.
pub(super) fn captured_query(expr: &QueryExpr) -> Option<QueryChain> {
    let value = match expr {
        QueryExpr::Constant(value) => value,
        QueryExpr::Member(MemberAccess {
            object: Some(object),
            name,
            ..
        }) => match object.as_ref() {
            QueryExpr::Constant(Value::Record(record)) => record.get(name)?,
            _ => return None,
        },
        _ => return None,
    };
    match value {
        Value::Query(chain) => Some((**chain).clone()),
        Value::Table(_) => Some(QueryChain::new(QueryExpr::Constant(value.clone()))),
        _ => None,
    }
}

impl Dispatcher<'_> {
    pub(super) fn analyze_query_operation(
        &mut self,
        operation: QueryOperation,
        operands: &[QueryExpr],
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        use QueryOperation as Q;
        match operation {
            Q::Where => self.analyze_where(operands, ctx),
            Q::Select => self.analyze_select(operands, ctx),
            Q::SelectMany => self.analyze_select_many(operands, ctx),
            Q::Join => self.analyze_join("Join", operands, ctx),
            Q::GroupJoin => self.analyze_join("GroupJoin", operands, ctx),
            Q::DefaultIfEmpty => self.analyze_default_if_empty(operands, ctx),
            Q::Distinct => self.analyze_distinct(operands, ctx),
            Q::GroupBy => self.analyze_group_by(operands, ctx),
            Q::Take => self.analyze_take(operands, ctx),
            Q::Skip => self.analyze_skip(operands, ctx),
            Q::OrderBy | Q::ThenBy => self.analyze_order_by(operands, false, ctx),
            Q::OrderByDescending | Q::ThenByDescending => {
                self.analyze_order_by(operands, true, ctx)
            }
            Q::First => self.analyze_execute(ExecuteMethod::First, operands, ctx),
            Q::FirstOrDefault => self.analyze_execute(ExecuteMethod::FirstOrDefault, operands, ctx),
            Q::Single => self.analyze_execute(ExecuteMethod::Single, operands, ctx),
            Q::SingleOrDefault => {
                self.analyze_execute(ExecuteMethod::SingleOrDefault, operands, ctx)
            }
            Q::Last => self.analyze_execute(ExecuteMethod::Last, operands, ctx),
            Q::LastOrDefault => self.analyze_execute(ExecuteMethod::LastOrDefault, operands, ctx),
            Q::Contains => self.analyze_contains(operands, ctx),
            Q::Union => self.analyze_set_operation(SetOperator::Union, operands, ctx),
            Q::Concat => self.analyze_set_operation(SetOperator::UnionAll, operands, ctx),
            Q::Intersect => self.analyze_set_operation(SetOperator::Intersect, operands, ctx),
            Q::Except => self.analyze_set_operation(SetOperator::Except, operands, ctx),
            Q::Count => self.analyze_aggregate(SpecialOp::Count, operands, false, ctx),
            Q::Sum => self.analyze_aggregate(SpecialOp::Sum, operands, false, ctx),
            Q::Average => self.analyze_aggregate(SpecialOp::Average, operands, false, ctx),
            Q::Min => self.analyze_aggregate(SpecialOp::Min, operands, false, ctx),
            Q::Max => self.analyze_aggregate(SpecialOp::Max, operands, false, ctx),
            Q::Any => {
                let count = self.analyze_aggregate(SpecialOp::Count, operands, false, ctx)?;
                Ok(QueryExpr::binary(
                    BinaryOp::GreaterThan,
                    count,
                    QueryExpr::Constant(Value::Int(0)),
                ))
            }
            Q::All => {
                expect_operands("All", operands, &[2])?;
                let count = self.analyze_aggregate(SpecialOp::Count, operands, true, ctx)?;
                Ok(QueryExpr::binary(
                    BinaryOp::Equal,
                    count,
                    QueryExpr::Constant(Value::Int(0)),
                ))
            }
        }
    }

    /// Analyzes a sequence operand. Entity sets are joined and bare tables
    /// registered in the current scope.
    pub(super) fn analyze_source(
        &mut self,
        source: &QueryExpr,
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        let source = self.analyze(source, &[], ctx)?;
        self.resolve_source(source, ctx)
    }

    pub(super) fn resolve_source(
        &mut self,
        source: QueryExpr,
        ctx: &BuilderContext,
    ) -> BuildResult<QueryExpr> {
        match source {
            QueryExpr::EntitySet(set) => {
                let joined = self
                    .register_association(set.table, &set.member, &set.entity, ctx.current_scope)?
                    .ok_or_else(|| BuildError::ColumnNotMapped {
                        entity: self.graph.table(set.table).entity.clone(),
                        member: set.member.clone(),
                    })?;
                Ok(QueryExpr::Table(joined))
            }
            QueryExpr::Table(table) => Ok(QueryExpr::Table(
                self.register_table(table, ctx.current_scope)?,
            )),
            other => Ok(other),
        }
    }

    fn analyze_where(
        &mut self,
        operands: &[QueryExpr],
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        expect_operands("Where", operands, &[2])?;
        let source = self.analyze_source(&operands[0], ctx)?;
        let predicate = self.analyze(&operands[1], &[source.clone()], ctx)?;
        self.graph
            .scope_mut(ctx.current_scope)
            .filters
            .push(predicate);
        Ok(source)
    }

    fn analyze_select(
        &mut self,
        operands: &[QueryExpr],
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        expect_operands("Select", operands, &[2])?;
        let source = self.analyze_source(&operands[0], ctx)?;
        let projection = self.analyze(&operands[1], &[source], ctx)?;
        if let QueryExpr::New(new) = &projection {
            if let ValueType::Entity(entity) = &new.ty {
                if self.query.schema.table_name(entity).is_some() {
                    return Err(BuildError::UnsupportedConstruct(format!(
                        "explicit construction of entity type `{}` in a query",
                        entity
                    )));
                }
            }
        }
        Ok(projection)
    }

    fn analyze_select_many(
        &mut self,
        operands: &[QueryExpr],
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        expect_operands("SelectMany", operands, &[2, 3])?;
        let source = self.analyze_source(&operands[0], ctx)?;
        let collection = self.analyze(&operands[1], &[source.clone()], ctx)?;
        let collection = self.resolve_source(collection, ctx)?;
        match operands.get(2) {
            Some(result_selector) => {
                let mut tuple_ctx = ctx.expecting_meta_table();
                self.analyze(result_selector, &[source, collection], &mut tuple_ctx)
            }
            None => Ok(collection),
        }
    }

    /// `outer.Join(inner, outerKey, innerKey, result)`: the inner table joins
    /// the table the outer key is read from.
    fn analyze_join(
        &mut self,
        operation: &str,
        operands: &[QueryExpr],
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        expect_operands(operation, operands, &[5])?;
        let outer = self.analyze_source(&operands[0], ctx)?;
        let inner = match self.analyze(&operands[1], &[], ctx)? {
            QueryExpr::Table(table) => table,
            _ => return Err(BuildError::malformed(operation, "inner sequence must be a table")),
        };
        let outer_key = self.analyze(&operands[2], &[outer.clone()], ctx)?;
        let inner_key = self.analyze(&operands[3], &[QueryExpr::Table(inner)], ctx)?;

        let joined_to = match &outer {
            QueryExpr::Table(table) => *table,
            _ => {
                let mut found = None;
                outer_key.visit(&mut |e| {
                    if let (None, QueryExpr::Column(c)) = (found, e) {
                        found = Some(self.graph.column(*c).table);
                    }
                });
                found.ok_or_else(|| {
                    BuildError::malformed(operation, "outer key does not reference a table")
                })?
            }
        };

        let predicate = match (&inner_key, &outer_key) {
            (QueryExpr::New(inner_new), QueryExpr::New(outer_new)) => {
                if inner_new.members.len() != outer_new.members.len() {
                    return Err(BuildError::malformed(operation, "key shapes differ"));
                }
                inner_new
                    .members
                    .iter()
                    .zip(&outer_new.members)
                    .map(|(i, o)| QueryExpr::binary(BinaryOp::Equal, i.value.clone(), o.value.clone()))
                    .reduce(|acc, equal| QueryExpr::binary(BinaryOp::AndAlso, acc, equal))
                    .ok_or_else(|| BuildError::malformed(operation, "empty composite key"))?
            }
            _ => QueryExpr::binary(BinaryOp::Equal, inner_key.clone(), outer_key.clone()),
        };

        let join_id = format!("join{}", self.graph.tables.len());
        {
            let table = self.graph.table_mut(inner);
            table.join_id = Some(join_id);
            table.join = Some(JoinDescriptor {
                kind: JoinKind::INNER,
                joined_to,
                predicate,
            });
        }
        let inner = self.register_table(inner, ctx.current_scope)?;

        let mut tuple_ctx = ctx.expecting_meta_table();
        self.analyze(&operands[4], &[outer, QueryExpr::Table(inner)], &mut tuple_ctx)
    }

    fn analyze_default_if_empty(
        &mut self,
        operands: &[QueryExpr],
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        expect_operands("DefaultIfEmpty", operands, &[1])?;
        let source = self.analyze_source(&operands[0], ctx)?;
        if let QueryExpr::Table(table) = &source {
            self.graph.table_mut(*table).outer_join = true;
        }
        Ok(source)
    }

    /// Distinct groups the projection by itself.
    fn analyze_distinct(
        &mut self,
        operands: &[QueryExpr],
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        expect_operands("Distinct", operands, &[1])?;
        let source = self.analyze_source(&operands[0], ctx)?;
        self.graph.scope_mut(ctx.current_scope).group.push(GroupExpr {
            grouped: Box::new(source.clone()),
            key: Box::new(source.clone()),
        });
        Ok(source)
    }

    fn analyze_group_by(
        &mut self,
        operands: &[QueryExpr],
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        expect_operands("GroupBy", operands, &[2, 3])?;
        let source = self.analyze_source(&operands[0], ctx)?;
        let key = self.analyze(&operands[1], &[source.clone()], ctx)?;
        let grouped = match operands.get(2) {
            Some(element) => self.analyze(element, &[source], ctx)?,
            None => source,
        };
        let group = GroupExpr {
            grouped: Box::new(grouped),
            key: Box::new(key),
        };
        self.graph
            .scope_mut(ctx.current_scope)
            .group
            .push(group.clone());
        Ok(QueryExpr::Group(group))
    }

    fn analyze_take(
        &mut self,
        operands: &[QueryExpr],
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        expect_operands("Take", operands, &[2])?;
        let source = self.analyze_source(&operands[0], ctx)?;
        let count = self.analyze(&operands[1], &[], ctx)?;
        self.merge_limit(ctx, count);
        Ok(source)
    }

    /// Keeps the smaller of the existing and the new limit.
    fn merge_limit(&mut self, ctx: &BuilderContext, limit: QueryExpr) {
        let scope = self.graph.scope_mut(ctx.current_scope);
        scope.limit = Some(match scope.limit.take() {
            Some(previous) => QueryExpr::conditional(
                QueryExpr::binary(BinaryOp::LessThan, previous.clone(), limit.clone()),
                previous,
                limit,
            ),
            None => limit,
        });
    }

    fn analyze_skip(
        &mut self,
        operands: &[QueryExpr],
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        expect_operands("Skip", operands, &[2])?;
        let source = self.analyze_source(&operands[0], ctx)?;
        let count = self.analyze(&operands[1], &[], ctx)?;
        let scope = self.graph.scope_mut(ctx.current_scope);
        scope.offset = Some(match scope.offset.take() {
            Some(previous) => QueryExpr::binary(BinaryOp::Add, count, previous),
            None => count,
        });
        Ok(source)
    }

    fn analyze_order_by(
        &mut self,
        operands: &[QueryExpr],
        descending: bool,
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        expect_operands("OrderBy", operands, &[2])?;
        let source = self.analyze_source(&operands[0], ctx)?;
        let expression = self.analyze(&operands[1], &[source.clone()], ctx)?;
        self.graph
            .scope_mut(ctx.current_scope)
            .order_by
            .push(OrderByItem {
                descending,
                expression,
            });
        Ok(source)
    }

    /// First/Single/Last and their OrDefault forms.
    fn analyze_execute(
        &mut self,
        method: ExecuteMethod,
        operands: &[QueryExpr],
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        let name = method.to_string();
        expect_operands(&name, operands, &[1, 2])?;
        if !ctx.is_external_in_chain {
            return Err(BuildError::UnsupportedConstruct(format!(
                "{} inside a nested query",
                name
            )));
        }
        let source = self.analyze_source(&operands[0], ctx)?;
        if let Some(predicate) = operands.get(1) {
            let predicate = self.analyze(predicate, &[source.clone()], ctx)?;
            self.graph
                .scope_mut(ctx.current_scope)
                .filters
                .push(predicate);
        }
        let limit = match method {
            ExecuteMethod::First | ExecuteMethod::FirstOrDefault => Some(1),
            ExecuteMethod::Single | ExecuteMethod::SingleOrDefault => Some(2),
            ExecuteMethod::Last | ExecuteMethod::LastOrDefault => None,
        };
        if let Some(limit) = limit {
            self.merge_limit(ctx, QueryExpr::Constant(Value::Int(limit)));
        }
        self.graph.scope_mut(ctx.current_scope).execute_method = Some(method);
        Ok(source)
    }

    /// Array constants become `IN (list)`, other queries `IN (sub-select)`;
    /// a sequence of rows is searched with a filtered count.
    fn analyze_contains(
        &mut self,
        operands: &[QueryExpr],
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        expect_operands("Contains", operands, &[2])?;

        if let Some(chain) = captured_query(&operands[0]) {
            let value = self.analyze(&operands[1], &[], ctx)?;
            let nested = self.graph.add_scope(Some(ctx.current_scope));
            let mut nested_ctx = ctx.new_select(nested);
            let projection = self.analyze_chain(&chain, &mut nested_ctx)?;
            let saved = self.maximize_server_load;
            self.maximize_server_load = true;
            let cut = self.build_select(&projection, &nested_ctx);
            self.maximize_server_load = saved;
            cut?;
            return Ok(QueryExpr::special(
                SpecialOp::In,
                vec![value, QueryExpr::SubSelect(nested)],
            ));
        }

        let source = self.analyze(&operands[0], &[], ctx)?;
        match source {
            QueryExpr::Constant(Value::Array(_)) => {
                let value = self.analyze(&operands[1], &[], ctx)?;
                Ok(QueryExpr::special(SpecialOp::In, vec![value, source]))
            }
            QueryExpr::InputParameter(id) => {
                let list = evaluate(&self.graph.parameter(id).value, Some(&self.graph))?;
                if !matches!(list, Value::Array(_)) {
                    return Err(BuildError::malformed("Contains", "source is not a list"));
                }
                self.graph.parameters[id.0].retired = true;
                let value = self.analyze(&operands[1], &[], ctx)?;
                Ok(QueryExpr::special(
                    SpecialOp::In,
                    vec![value, QueryExpr::Constant(list)],
                ))
            }
            source => self.contains_row(source, &operands[1], ctx),
        }
    }

    fn contains_row(
        &mut self,
        source: QueryExpr,
        value: &QueryExpr,
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        let value = self.analyze(value, &[], ctx)?;
        let mut search_ctx = if ctx.is_external_in_chain {
            ctx.clone()
        } else {
            let nested = self.graph.add_scope(Some(ctx.current_scope));
            ctx.new_select(nested)
        };
        let source = self.resolve_source(source, &search_ctx)?;
        let test = match (&source, &value) {
            (QueryExpr::Table(l), QueryExpr::Table(r)) => self.rows_equal(*l, *r, &search_ctx)?,
            _ => QueryExpr::binary(BinaryOp::Equal, source.clone(), value),
        };
        self.graph
            .scope_mut(search_ctx.current_scope)
            .filters
            .push(test);

        let count = if ctx.is_external_in_chain {
            let count = self.analyze_aggregate(SpecialOp::Count, &[source], false, &mut search_ctx)?;
            ctx.current_scope = search_ctx.current_scope;
            count
        } else {
            let nested = search_ctx.current_scope;
            self.graph.scope_mut(nested).operands =
                vec![QueryExpr::special(SpecialOp::Count, vec![])];
            QueryExpr::SubSelect(nested)
        };
        Ok(QueryExpr::binary(
            BinaryOp::GreaterThan,
            count,
            QueryExpr::Constant(Value::Int(0)),
        ))
    }

    /// Links the second query as a sibling scope of the current one. Both
    /// sides are cut with everything on the server so their shapes match.
    fn analyze_set_operation(
        &mut self,
        operator: SetOperator,
        operands: &[QueryExpr],
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        let name = format!("{:?}", operator);
        expect_operands(&name, operands, &[2])?;
        self.maximize_server_load = true;

        let first = self.analyze_source(&operands[0], ctx)?;
        let chain = captured_query(&operands[1])
            .ok_or_else(|| BuildError::malformed(&name, "second operand must be a query"))?;

        let parent = self.graph.scope(ctx.current_scope).parent;
        let sister = self.graph.add_scope(parent);
        let mut sister_ctx = ctx.new_select(sister);
        let projection = self.analyze_chain(&chain, &mut sister_ctx)?;
        self.build_select(&projection, &sister_ctx)?;

        let last = self.graph.last_in_chain(ctx.current_scope);
        self.graph.scope_mut(last).next = Some((operator, sister));
        log::debug!(
            "Linked scope {} to scope {} with {}",
            sister.0,
            last.0,
            name
        );
        Ok(first)
    }
}
