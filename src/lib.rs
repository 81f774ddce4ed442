//! chainql - translates chained query operations into SQL
//!
//! A query arrives as a chain of method calls over a table (`Where`,
//! `Select`, `OrderBy`, `Take`, `Count`, ...). The crate turns it into:
//! - a single SQL statement for the configured dialect
//! - the statement parameters, each with a host value supplier
//! - a compiled materializer turning result rows into values
//!
//! Pipeline: `query_expr` (AST) -> `query_planner` (scope graph, tier cut,
//! optimization, aliases) -> `sql_generator` (rendering), with
//! `materializer` for the host side and `query_cache` sharing results.

pub mod config;
pub mod materializer;
pub mod query_cache;
pub mod query_expr;
pub mod query_planner;
pub mod schema_catalog;
pub mod sql_generator;
