use std::sync::Arc;

use chainql::query_expr::builders::*;
use chainql::query_expr::{QueryExpr, ValueType};
use chainql::query_planner::QueryContext;
use chainql::schema_catalog::MappingConfig;
use chainql::sql_generator::SqlDialect;

pub const SHOP: &str = r#"
name: shop
entities:
  - name: Person
    columns:
      - { member: Id, type: Int32, primary_key: true }
      - { member: Name, type: String }
      - { member: Age, type: Int32 }
  - name: Customer
    columns:
      - { member: Id, type: Int32, primary_key: true }
      - { member: Name, type: String }
  - name: Order
    columns:
      - { member: Id, type: Int32, primary_key: true }
      - { member: CustomerId, type: Int32 }
    associations:
      - { member: Customer, other: Customer, this_keys: [CustomerId], other_keys: [Id] }
"#;

pub fn shop_context(dialect: Arc<dyn SqlDialect>, parameterize: bool) -> QueryContext {
    let schema = MappingConfig::from_yaml_str(SHOP)
        .expect("fixture mapping parses")
        .to_schema()
        .expect("fixture mapping is consistent");
    QueryContext::builder(Arc::new(schema), dialect)
        .parameterize_constants(parameterize)
        .build()
}

/// `p.<name>` for a lambda parameter `p`.
pub fn field(parameter: &str, name: &str, ty: ValueType) -> QueryExpr {
    member(param(parameter), name, ty)
}

/// `p => p.Age > min_age`
pub fn older_than(min_age: QueryExpr) -> QueryExpr {
    lambda(&["p"], gt(field("p", "Age", ValueType::Int32), min_age))
}
