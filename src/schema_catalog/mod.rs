//! Schema mapping boundary.
//!
//! The translator never inspects host types. Everything it needs to know
//! about entities, columns and associations comes through [`SchemaMapper`],
//! keyed by (entity name, member name). Every lookup may answer "not found";
//! the planner decides whether that is an error.

pub mod config;
pub mod errors;
pub mod mapping_schema;

pub use config::MappingConfig;
pub use errors::SchemaError;
pub use mapping_schema::MappingSchema;

use crate::query_expr::ValueType;
use crate::query_planner::query_graph::JoinKind;

/// Foreign-key relationship from one entity to another.
#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    /// Key members on the referencing entity
    pub these_keys: Vec<String>,
    /// Key members on the target entity, pairwise with `these_keys`
    pub other_keys: Vec<String>,
    pub other_entity: String,
    pub join_kind: JoinKind,
    /// Seed for the joined table's alias
    pub join_id: String,
}

#[cfg_attr(test, mockall::automock)]
pub trait SchemaMapper: Send + Sync {
    /// Name of the mapping, part of cache keys.
    fn schema_name(&self) -> String;

    fn table_name(&self, entity: &str) -> Option<String>;

    fn column_name(&self, entity: &str, member: &str) -> Option<String>;

    fn column_type(&self, entity: &str, member: &str) -> Option<ValueType>;

    fn primary_keys(&self, entity: &str) -> Vec<String>;

    fn association(&self, entity: &str, member: &str, other_entity: &str) -> Option<Association>;

    /// Mapped column members of `entity`, in declaration order.
    fn members(&self, entity: &str) -> Vec<String>;

    fn member_for_column(&self, entity: &str, column: &str) -> Option<String>;
}
