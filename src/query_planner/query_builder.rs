//! Query orchestration: chain -> graph -> SQL + parameters + materializer.

use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use super::aliasing::assign_aliases;
use super::builder_ctx::BuilderContext;
use super::dispatcher::Dispatcher;
use super::errors::{BuildError, BuildResult};
use super::optimizer::{optimize_graph, ConstantFolding, OptimizerPass, Transformed};
use super::query_context::QueryContext;
use super::query_graph::{ExecuteMethod, QueryGraph};
use super::typing::type_of;
use crate::materializer::{compile, Compiled, EvalEnv, EvalResult, Materializer, RowReadingContext};
use crate::query_cache::{QueryCache, QueryCacheKey, TableReaderKey};
use crate::query_expr::builders::add;
use crate::query_expr::rewriter::PrePassRewriter;
use crate::query_expr::{
    MemberBinding, NewExpr, QueryChain, QueryExpr, RowValue, ScopeId, Value, ValueType,
};
use crate::sql_generator::{generate_sql, SqlDialect};

/// One statement parameter, in marker order.
#[derive(Clone)]
pub struct ParameterDescriptor {
    pub alias: String,
    /// Marker as it appears in the statement (`@p1`, `:p1`)
    pub name: String,
    pub ty: ValueType,
    supplier: Compiled,
}

impl ParameterDescriptor {
    /// Computes the value to bind from the captured host state.
    pub fn value(&self) -> EvalResult<Value> {
        let reading = RowReadingContext::default();
        (self.supplier)(&EvalEnv {
            row: None,
            reading: &reading,
        })
    }
}

impl fmt::Debug for ParameterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterDescriptor")
            .field("alias", &self.alias)
            .field("name", &self.name)
            .field("ty", &self.ty)
            .finish()
    }
}

/// Immutable result of a build, shared through the cache.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub sql: String,
    pub parameters: Vec<ParameterDescriptor>,
    pub materializer: Materializer,
    pub execute_method: Option<ExecuteMethod>,
    /// Hex SHA-256 of the cache key, for logs
    pub fingerprint: String,
}

impl CompiledQuery {
    pub fn row_type(&self) -> &ValueType {
        self.materializer.row_type()
    }
}

/// A finished graph before rendering.
#[derive(Debug)]
pub struct ExpressionQuery {
    pub graph: QueryGraph,
    pub top: ScopeId,
    pub materializer: Materializer,
}

impl ExpressionQuery {
    pub fn execute_method(&self) -> Option<ExecuteMethod> {
        self.graph
            .scopes
            .iter()
            .find_map(|scope| scope.execute_method)
    }
}

pub struct QueryBuilder {
    cache: Arc<QueryCache>,
}

impl QueryBuilder {
    pub fn new(cache: Arc<QueryCache>) -> Self {
        QueryBuilder { cache }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Builds the graph of `chain` with its last operation external, then
    /// finishes it: paging merge, pre-pass rewrite, constant folding,
    /// materializer and alias assignment.
    pub fn build_expression_query(
        chain: &QueryChain,
        query: &QueryContext,
    ) -> BuildResult<ExpressionQuery> {
        let mut dispatcher = Dispatcher::new(query);
        let mut ctx = BuilderContext::new(dispatcher.graph.root());
        ctx.is_external_in_chain = true;

        let result = dispatcher.analyze_chain(chain, &mut ctx)?;
        let row_type = type_of(&result, &dispatcher.graph);
        dispatcher.build_select(&result, &ctx)?;
        let top = ctx.current_scope;
        let mut graph = dispatcher.graph;

        merge_paging(&mut graph);
        rewrite_clauses(&mut graph);

        let passes: [&dyn OptimizerPass; 1] = [&ConstantFolding];
        optimize_operands(&mut graph, top, &passes)?;
        optimize_graph(&mut graph, &passes)?;

        let reader = graph
            .scope(top)
            .reader
            .clone()
            .ok_or_else(|| BuildError::DanglingReference("a scope without reader".to_string()))?;
        let materializer = Materializer::compile(&reader, row_type, Some(&graph))?;

        assign_aliases(&mut graph);

        Ok(ExpressionQuery {
            graph,
            top,
            materializer,
        })
    }

    /// Cache-checked build and render.
    pub fn get_select_query(
        &self,
        chain: &QueryChain,
        query: &QueryContext,
    ) -> BuildResult<Arc<CompiledQuery>> {
        let canonical = chain
            .canonical_form()
            .map_err(|e| BuildError::malformed("query chain", e.to_string()))?;
        let key = QueryCacheKey::new(
            &canonical,
            &query.schema.schema_name(),
            query.dialect.name(),
            &build_options(query),
        );
        if let Some(cached) = self.cache.get(&key) {
            log::debug!("Reusing statement {}", cached.fingerprint);
            return Ok(cached);
        }

        let expression = Self::build_expression_query(chain, query)?;
        let sql = generate_sql(&expression.graph, query.dialect.as_ref(), expression.top)?;
        let parameters = ordered_parameters(&expression.graph, &sql, query.dialect.as_ref())?;
        let fingerprint = fingerprint(&key);
        log::debug!(
            "Built statement {} with {} parameter(s)",
            fingerprint,
            parameters.len()
        );

        let compiled = Arc::new(CompiledQuery {
            execute_method: expression.execute_method(),
            sql,
            parameters,
            materializer: expression.materializer,
            fingerprint,
        });
        self.cache.insert(key, Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Materializer for rows of `entity` whose columns come in `columns`
    /// order, for statements not produced by the builder.
    pub fn get_table_reader(
        &self,
        entity: &str,
        columns: &[String],
        query: &QueryContext,
    ) -> BuildResult<Arc<Materializer>> {
        let key = TableReaderKey::new(entity, columns, &query.schema.schema_name());
        if let Some(cached) = self.cache.get_table_reader(&key) {
            return Ok(cached);
        }
        if query.schema.table_name(entity).is_none() {
            return Err(BuildError::TableNotMapped(entity.to_string()));
        }

        let members = columns
            .iter()
            .enumerate()
            .map(|(index, column)| {
                let member = query.schema.member_for_column(entity, column).ok_or_else(|| {
                    BuildError::ColumnNotMapped {
                        entity: entity.to_string(),
                        member: column.clone(),
                    }
                })?;
                let ty = query
                    .schema
                    .column_type(entity, &member)
                    .unwrap_or(ValueType::Object);
                Ok(MemberBinding {
                    name: member,
                    value: QueryExpr::RowValue(RowValue { index, ty }),
                })
            })
            .collect::<BuildResult<Vec<_>>>()?;
        let row_type = ValueType::Entity(entity.to_string());
        let reader = QueryExpr::New(NewExpr {
            ty: row_type.clone(),
            members,
        });

        let materializer = Arc::new(Materializer::compile(&reader, row_type, None)?);
        self.cache.insert_table_reader(key, Arc::clone(&materializer));
        Ok(materializer)
    }
}

fn build_options(query: &QueryContext) -> String {
    format!(
        "maximize={};parameterize={};trim={}",
        query.maximize_server_load, query.parameterize_constants, query.reading.trim_strings
    )
}

fn fingerprint(key: &QueryCacheKey) -> String {
    let mut hasher = Sha256::new();
    for part in [&key.chain, &key.schema_name, &key.dialect, &key.options] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Scopes with both a limit and an offset also get their sum.
fn merge_paging(graph: &mut QueryGraph) {
    for scope in graph.scopes.iter_mut() {
        if let (Some(offset), Some(limit)) = (&scope.offset, &scope.limit) {
            scope.offset_and_limit = Some(add(offset.clone(), limit.clone()));
        }
    }
}

fn rewrite_clauses(graph: &mut QueryGraph) {
    let rewritten: Vec<_> = {
        let type_of = |e: &QueryExpr| type_of(e, graph);
        let rewriter = PrePassRewriter::new(&type_of);
        graph
            .scopes
            .iter()
            .map(|scope| {
                (
                    scope.filters.iter().map(|f| rewriter.rewrite(f)).collect::<Vec<_>>(),
                    scope.limit.as_ref().map(|l| rewriter.rewrite(l)),
                    scope.offset.as_ref().map(|o| rewriter.rewrite(o)),
                )
            })
            .collect()
    };
    for (scope, (filters, limit, offset)) in graph.scopes.iter_mut().zip(rewritten) {
        scope.filters = filters;
        scope.limit = limit;
        scope.offset = offset;
    }
}

/// First optimizer run, confined to the result list of the top scope.
fn optimize_operands(
    graph: &mut QueryGraph,
    top: ScopeId,
    passes: &[&dyn OptimizerPass],
) -> BuildResult<()> {
    let mut operands = graph.scope(top).operands.clone();
    for operand in operands.iter_mut() {
        for pass in passes {
            if let Transformed::Yes(new) = pass.optimize(operand, graph)? {
                *operand = new;
            }
        }
    }
    graph.scope_mut(top).operands = operands;
    Ok(())
}

/// Active parameters whose marker occurs in `sql`, ordered by first
/// occurrence. Parameters only the reader uses are resolved on the host.
fn ordered_parameters(
    graph: &QueryGraph,
    sql: &str,
    dialect: &dyn SqlDialect,
) -> BuildResult<Vec<ParameterDescriptor>> {
    let mut found = Vec::new();
    for (_, parameter) in graph.active_parameters() {
        let name = dialect.parameter_name(&parameter.alias);
        if let Some(position) = marker_position(sql, &name) {
            found.push((
                position,
                ParameterDescriptor {
                    alias: parameter.alias.clone(),
                    name,
                    ty: parameter.ty.clone(),
                    supplier: compile(&parameter.value, Some(graph))?,
                },
            ));
        }
    }
    found.sort_by_key(|(position, _)| *position);
    Ok(found.into_iter().map(|(_, descriptor)| descriptor).collect())
}

/// `@p1` must not match inside `@p10`.
fn marker_position(sql: &str, marker: &str) -> Option<usize> {
    sql.match_indices(marker).map(|(i, _)| i).find(|i| {
        sql[i + marker.len()..]
            .chars()
            .next()
            .is_none_or(|c| !(c.is_alphanumeric() || c == '_'))
    })
}
