//! Query graph builder.
//!
//! [`Dispatcher::analyze_chain`] walks a [`QueryChain`] link by link and
//! rewrites every host construct into resolved nodes, registering tables,
//! columns and parameters in the [`QueryGraph`] as it goes.
//!
//! Handlers are split by concern:
//! - `queryable`: relational operators (Where, Select, Join, GroupBy, ...)
//! - `projection`: aggregates, Any/All and the derived `source` table
//! - `members`: member access on tables, records, groups and scalars
//! - `scalar`: string, math, Parse and ToString calls
//! - `registrar`: table, column, association and parameter registration
//! - `cutter`: the split of a projection into select list and row reader

use crate::query_expr::rewriter::PrePassRewriter;
use crate::query_expr::{
    BinaryExpr, BinaryOp, Conditional, Lambda, MemberBinding, MethodCall, MethodOwner, NewExpr,
    QueryChain, QueryExpr, TableId, UnaryExpr, UnaryOp, Value, ValueType,
};
use crate::query_planner::builder_ctx::BuilderContext;
use crate::query_planner::errors::{BuildError, BuildResult};
use crate::query_planner::query_context::QueryContext;
use crate::query_planner::query_graph::{MetaTable, QueryGraph};
use crate::query_planner::typing::type_of;

mod cutter;
mod members;
pub mod operations;
mod projection;
mod queryable;
mod registrar;
mod scalar;

pub use operations::{MathMethod, QueryOperation, StringMethod};

pub struct Dispatcher<'q> {
    pub graph: QueryGraph,
    pub query: &'q QueryContext,
    /// Starts from the context's policy; set operations force it on
    pub maximize_server_load: bool,
}

impl<'q> Dispatcher<'q> {
    pub fn new(query: &'q QueryContext) -> Self {
        Dispatcher {
            graph: QueryGraph::new(),
            query,
            maximize_server_load: query.maximize_server_load,
        }
    }

    /// Analyzes the source and then every operation, feeding each result to
    /// the next operation as its first operand. Only the last operation is
    /// external, and only when `ctx` itself is.
    pub fn analyze_chain(
        &mut self,
        chain: &QueryChain,
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        let external = ctx.is_external_in_chain;
        ctx.is_external_in_chain = false;
        log::debug!(
            "Analyzing chain of {} operations in scope {}",
            chain.operations.len(),
            ctx.current_scope.0
        );

        let mut current = self.analyze(&chain.source, &[], ctx)?;
        let last = chain.operations.len().saturating_sub(1);
        for (i, operation) in chain.operations.iter().enumerate() {
            let operation = self.prepass(operation);
            ctx.is_external_in_chain = external && i == last;
            log::trace!("Operation {} at link {}", operation.name, i);
            current = self.analyze_call(&operation, &[current], ctx)?;
        }

        ctx.is_external_in_chain = external;
        Ok(current)
    }

    fn prepass(&self, operation: &MethodCall) -> MethodCall {
        let type_of = |e: &QueryExpr| type_of(e, &self.graph);
        let rewriter = PrePassRewriter::new(&type_of);
        match rewriter.rewrite(&QueryExpr::Call(operation.clone())) {
            QueryExpr::Call(call) => call,
            _ => operation.clone(),
        }
    }

    /// Resolves `expr`. `params` are already analyzed values for the formal
    /// parameters of a lambda (or the leading operands of a call).
    pub fn analyze(
        &mut self,
        expr: &QueryExpr,
        params: &[QueryExpr],
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        match expr {
            QueryExpr::Call(call) => self.analyze_call(call, params, ctx),
            QueryExpr::Lambda(lambda) => self.analyze_lambda(lambda, params, ctx),
            QueryExpr::Quote(inner) => {
                let mut quoted = ctx.new_quote();
                self.analyze(inner, params, &mut quoted)
            }
            QueryExpr::Parameter(name) => self.bound_parameter(name, ctx),
            QueryExpr::Member(access) => self.analyze_member(access, ctx),
            QueryExpr::Binary(b) => self.analyze_binary(b, ctx),
            QueryExpr::Unary(u) => self.analyze_unary(u, ctx),
            QueryExpr::Conditional(c) => self.analyze_conditional(c, ctx),
            QueryExpr::New(new) => self.analyze_new(new, ctx),
            QueryExpr::Invoke(invocation) => {
                let arguments = invocation
                    .arguments
                    .iter()
                    .map(|a| self.analyze(a, &[], ctx))
                    .collect::<BuildResult<Vec<_>>>()?;
                let mut invoked = ctx.new_quote();
                self.analyze(&invocation.lambda, &arguments, &mut invoked)
            }
            QueryExpr::Constant(value) => self.analyze_constant(value, ctx),
            QueryExpr::Special(_) | QueryExpr::StartIndexOffset(_) | QueryExpr::Group(_) => {
                expr.try_map_children(&mut |child| self.analyze(child, &[], ctx))
            }
            QueryExpr::Table(_)
            | QueryExpr::Column(_)
            | QueryExpr::InputParameter(_)
            | QueryExpr::SubSelect(_)
            | QueryExpr::MetaTable(_)
            | QueryExpr::EntitySet(_)
            | QueryExpr::RowValue(_) => Ok(expr.clone()),
        }
    }

    fn analyze_call(
        &mut self,
        call: &MethodCall,
        params: &[QueryExpr],
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        let mut operands: Vec<QueryExpr> = params.to_vec();
        operands.extend(call.object.iter().map(|object| object.as_ref().clone()));
        operands.extend(call.arguments.iter().cloned());

        match (&call.owner, call.name.as_str()) {
            (MethodOwner::Queryable | MethodOwner::Enumerable, name) => {
                let operation = QueryOperation::try_from(name)
                    .map_err(|name| BuildError::unsupported(&call.owner, &name))?;
                self.analyze_query_operation(operation, &operands, ctx)
            }
            (MethodOwner::String, name) => {
                let method = StringMethod::try_from(name)
                    .map_err(|name| BuildError::unsupported(&call.owner, &name))?;
                self.analyze_string_method(method, &operands, ctx)
            }
            (MethodOwner::Math, name) => {
                let method = MathMethod::try_from(name)
                    .map_err(|name| BuildError::unsupported(&call.owner, &name))?;
                self.analyze_math_method(method, &operands, ctx)
            }
            (MethodOwner::Type(ty), "Parse") => self.analyze_parse(ty, &operands, ctx),
            (_, "ToString") => self.analyze_to_string(&operands, ctx),
            (owner, name) => Err(BuildError::unsupported(owner, name)),
        }
    }

    fn analyze_lambda(
        &mut self,
        lambda: &Lambda,
        params: &[QueryExpr],
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        if params.len() < lambda.parameters.len() {
            return Err(BuildError::malformed(
                "lambda",
                format!(
                    "expected {} arguments, got {}",
                    lambda.parameters.len(),
                    params.len()
                ),
            ));
        }

        let saved = (
            ctx.bindings.clone(),
            ctx.is_external_in_chain,
            ctx.in_lambda_body,
        );
        for (name, value) in lambda.parameters.iter().zip(params) {
            let value = self.analyze(value, &[], ctx)?;
            ctx.bindings.insert(name.clone(), value);
        }
        ctx.is_external_in_chain = false;
        ctx.in_lambda_body = true;
        let result = self.analyze(&lambda.body, &[], ctx);
        (ctx.bindings, ctx.is_external_in_chain, ctx.in_lambda_body) = saved;
        result
    }

    /// A bound table or column without an alias adopts the variable name.
    fn bound_parameter(&mut self, name: &str, ctx: &BuilderContext) -> BuildResult<QueryExpr> {
        let value = ctx
            .binding(name)
            .cloned()
            .ok_or_else(|| BuildError::MissingBoundParameter(name.to_string()))?;
        match &value {
            QueryExpr::Table(id) if self.graph.table(*id).alias.is_none() => {
                self.graph.table_mut(*id).alias = Some(name.to_string());
            }
            QueryExpr::Column(id) if self.graph.column(*id).alias.is_none() => {
                self.graph.columns[id.0].alias = Some(name.to_string());
            }
            _ => {}
        }
        Ok(value)
    }

    fn analyze_constant(&mut self, value: &Value, ctx: &mut BuilderContext) -> BuildResult<QueryExpr> {
        match value {
            Value::Table(entity) => Ok(QueryExpr::Table(self.create_table(entity)?)),
            Value::Query(chain) => {
                let mut nested = ctx.clone();
                nested.is_external_in_chain = false;
                self.analyze_chain(chain, &mut nested)
            }
            v if ctx.in_lambda_body
                && self.query.parameterize_constants
                && !v.is_null()
                && v.value_type().is_primitive() =>
            {
                Ok(self.register_parameter("", QueryExpr::Constant(v.clone()), v.value_type()))
            }
            _ => Ok(QueryExpr::Constant(value.clone())),
        }
    }

    fn analyze_binary(&mut self, b: &BinaryExpr, ctx: &mut BuilderContext) -> BuildResult<QueryExpr> {
        let left = self.analyze(&b.left, &[], ctx)?;
        let right = self.analyze(&b.right, &[], ctx)?;
        match (b.op, &left, &right) {
            (BinaryOp::Equal, QueryExpr::Table(l), QueryExpr::Table(r)) => {
                self.rows_equal(*l, *r, ctx)
            }
            (BinaryOp::NotEqual, QueryExpr::Table(l), QueryExpr::Table(r)) => {
                let equal = self.rows_equal(*l, *r, ctx)?;
                Ok(QueryExpr::unary(UnaryOp::Not, equal, ValueType::Bool))
            }
            _ => Ok(QueryExpr::binary(b.op, left, right)),
        }
    }

    /// Row identity: every primary-key column pairwise equal.
    fn rows_equal(&mut self, left: TableId, right: TableId, ctx: &BuilderContext) -> BuildResult<QueryExpr> {
        let entity = self.graph.table(left).entity.clone();
        let keys = self.query.schema.primary_keys(&entity);
        if keys.is_empty() {
            return Err(BuildError::UnsupportedConstruct(format!(
                "comparison of `{}` rows without a primary key",
                entity
            )));
        }
        let mut predicate: Option<QueryExpr> = None;
        for key in &keys {
            let l = self.register_column(left, key, ctx.current_scope)?;
            let r = self.register_column(right, key, ctx.current_scope)?;
            let equal = QueryExpr::binary(BinaryOp::Equal, l, r);
            predicate = Some(match predicate {
                Some(p) => QueryExpr::binary(BinaryOp::AndAlso, p, equal),
                None => equal,
            });
        }
        predicate.ok_or_else(|| BuildError::UnsupportedConstruct(entity))
    }

    fn analyze_unary(&mut self, u: &UnaryExpr, ctx: &mut BuilderContext) -> BuildResult<QueryExpr> {
        let operand = self.analyze(&u.operand, &[], ctx)?;
        match (u.op, &operand) {
            // casts between row shapes have no SQL meaning
            (
                UnaryOp::Convert,
                QueryExpr::Table(_)
                | QueryExpr::MetaTable(_)
                | QueryExpr::Group(_)
                | QueryExpr::EntitySet(_),
            ) => Ok(operand),
            _ => Ok(QueryExpr::unary(u.op, operand, u.ty.clone())),
        }
    }

    fn analyze_conditional(
        &mut self,
        c: &Conditional,
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        Ok(QueryExpr::conditional(
            self.analyze(&c.test, &[], ctx)?,
            self.analyze(&c.if_true, &[], ctx)?,
            self.analyze(&c.if_false, &[], ctx)?,
        ))
    }

    /// Constructions whose members are all tables become a table tuple when
    /// the caller expects one (SelectMany and Join result selectors).
    fn analyze_new(&mut self, new: &NewExpr, ctx: &mut BuilderContext) -> BuildResult<QueryExpr> {
        let expect_meta = ctx.expect_meta_table_definition;
        ctx.expect_meta_table_definition = false;
        let members = new
            .members
            .iter()
            .map(|m| {
                Ok(MemberBinding {
                    name: m.name.clone(),
                    value: self.analyze(&m.value, &[], ctx)?,
                })
            })
            .collect::<BuildResult<Vec<_>>>();
        ctx.expect_meta_table_definition = expect_meta;
        let members = members?;

        let all_tables = !members.is_empty()
            && members
                .iter()
                .all(|m| matches!(m.value, QueryExpr::Table(_) | QueryExpr::MetaTable(_)));
        if expect_meta && all_tables {
            let id = self.graph.add_meta_table(MetaTable {
                ty: new.ty.clone(),
                members: members.into_iter().map(|m| (m.name, m.value)).collect(),
            });
            return Ok(QueryExpr::MetaTable(id));
        }
        Ok(QueryExpr::New(NewExpr {
            ty: new.ty.clone(),
            members,
        }))
    }
}

/// Checks the operand count of `operation` against the accepted counts.
fn expect_operands(
    operation: &str,
    operands: &[QueryExpr],
    accepted: &[usize],
) -> BuildResult<()> {
    if accepted.contains(&operands.len()) {
        Ok(())
    } else {
        Err(BuildError::malformed(
            operation,
            format!("expected {:?} operands, got {}", accepted, operands.len()),
        ))
    }
}

#[cfg(test)]
mod tests;
