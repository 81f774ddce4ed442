use crate::query_expr::ScopeId;
use crate::query_planner::query_graph::QueryGraph;

pub mod dialect;
pub mod errors;
mod function_registry;
pub mod to_sql;
mod to_sql_query;

pub use dialect::{dialect_by_name, GenericDialect, OracleDialect, PostgresDialect, SqlDialect};
pub use errors::{SqlGenerationError, SqlResult};
pub use to_sql::SqlRenderer;
pub use to_sql_query::sort_tables;

/// Renders the statement rooted at `scope`.
pub fn generate_sql(graph: &QueryGraph, dialect: &dyn SqlDialect, scope: ScopeId) -> SqlResult<String> {
    let sql = SqlRenderer::new(graph, dialect).scope_chain(scope)?;
    log::debug!("Generated SQL: {}", sql);
    Ok(sql)
}
