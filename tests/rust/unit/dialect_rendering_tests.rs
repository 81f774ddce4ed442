use std::sync::Arc;

use chainql::config::{DialectName, EngineConfig};
use chainql::query_expr::builders::*;
use chainql::query_expr::ValueType;
use chainql::query_planner::translate;
use chainql::schema_catalog::MappingConfig;

const LEGACY: &str = r#"
name: legacy
entities:
  - name: Customer
    table: CUSTOMERS
    columns:
      - { member: Id, column: CUST_ID, type: Int32, primary_key: true }
      - { member: Name, column: CUST_NAME, type: String }
  - name: Order
    table: ORDERS
    columns:
      - { member: Id, column: ORDER_ID, type: Int32, primary_key: true }
      - { member: CustomerId, column: CUST_ID, type: Int32, nullable: true }
    associations:
      - { member: Customer, other: Customer, this_keys: [CustomerId], other_keys: [Id] }
"#;

fn config(dialect: DialectName) -> EngineConfig {
    EngineConfig {
        dialect,
        ..Default::default()
    }
}

fn context(config: &EngineConfig) -> chainql::query_planner::QueryContext {
    let schema = MappingConfig::from_yaml_str(LEGACY)
        .unwrap()
        .to_schema()
        .unwrap();
    config.query_context(Arc::new(schema)).unwrap()
}

#[test]
fn test_nullable_key_becomes_outer_join() {
    let customer = member(
        param("o"),
        "Customer",
        ValueType::Entity("Customer".to_string()),
    );
    let chain = table("Order").select(lambda(
        &["o"],
        member(customer, "Name", ValueType::String),
    ));
    let compiled = translate(&chain, &context(&config(DialectName::Generic))).unwrap();

    assert_eq!(
        compiled.sql,
        "SELECT Customer1.CUST_NAME FROM ORDERS AS o LEFT OUTER JOIN CUSTOMERS AS Customer1 ON Customer1.CUST_ID = o.CUST_ID"
    );
}

#[test]
fn test_oracle_aliases_without_as() {
    let customer = member(
        param("o"),
        "Customer",
        ValueType::Entity("Customer".to_string()),
    );
    let chain = table("Order").select(lambda(
        &["o"],
        member(customer, "Name", ValueType::String),
    ));
    let compiled = translate(&chain, &context(&config(DialectName::Oracle))).unwrap();

    assert_eq!(
        compiled.sql,
        "SELECT Customer1.CUST_NAME FROM ORDERS o LEFT OUTER JOIN CUSTOMERS Customer1 ON Customer1.CUST_ID = o.CUST_ID"
    );
}

#[test]
fn test_oracle_limit_uses_rownum() {
    let query = context(&config(DialectName::Oracle));

    let compiled = translate(&table("Customer").take(3), &query).unwrap();
    assert_eq!(
        compiled.sql,
        "SELECT * FROM (SELECT CUST_ID, CUST_NAME FROM CUSTOMERS) WHERE ROWNUM <= 3"
    );

    let compiled = translate(&table("Customer").skip(2).take(3), &query).unwrap();
    assert_eq!(
        compiled.sql,
        "SELECT * FROM (SELECT q_.*, ROWNUM AS rn_ FROM (SELECT CUST_ID, CUST_NAME FROM CUSTOMERS) q_ WHERE ROWNUM <= 5) WHERE rn_ > 2"
    );
}

#[test]
fn test_generic_limit_and_offset() {
    let query = context(&config(DialectName::Generic));
    let compiled = translate(&table("Customer").skip(2).take(3), &query).unwrap();
    assert_eq!(
        compiled.sql,
        "SELECT CUST_ID, CUST_NAME FROM CUSTOMERS LIMIT 3 OFFSET 2"
    );
}

#[test]
fn test_parameterize_flag_comes_from_config() {
    let config = EngineConfig {
        parameterize_constants: true,
        ..config(DialectName::Postgres)
    };
    let chain = table("Customer").filter(lambda(
        &["c"],
        eq(
            member(param("c"), "Name", ValueType::String),
            constant("ann"),
        ),
    ));
    let compiled = translate(&chain, &context(&config)).unwrap();

    assert_eq!(
        compiled.sql,
        "SELECT CUST_ID, CUST_NAME FROM CUSTOMERS WHERE (CUST_NAME = :p1)"
    );
    assert_eq!(compiled.parameters[0].ty, ValueType::String);
}
