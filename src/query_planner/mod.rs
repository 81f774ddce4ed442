use std::sync::Arc;

use crate::query_expr::QueryChain;

pub mod aliasing;
pub mod builder_ctx;
pub mod direct_query;
pub mod dispatcher;
pub mod errors;
pub mod optimizer;
pub mod query_builder;
pub mod query_context;
pub mod query_graph;
pub mod typing;

pub use direct_query::{rewrite_direct_statement, DirectQueryError};
pub use errors::{BuildError, BuildResult};
pub use query_builder::{CompiledQuery, ExpressionQuery, ParameterDescriptor, QueryBuilder};
pub use query_context::{QueryContext, QueryContextBuilder};

/// Builds and renders `chain` without a shared cache.
pub fn translate(chain: &QueryChain, query: &QueryContext) -> BuildResult<Arc<CompiledQuery>> {
    let builder = QueryBuilder::new(Arc::new(crate::query_cache::QueryCache::new(
        crate::query_cache::QueryCacheConfig {
            enabled: false,
            ..Default::default()
        },
    )));
    builder.get_select_query(chain, query)
}
