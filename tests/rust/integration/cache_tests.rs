use std::sync::Arc;

use chainql::materializer::{RowReadingContext, ValueRow};
use chainql::query_cache::{QueryCache, QueryCacheConfig};
use chainql::query_expr::builders::*;
use chainql::query_expr::{Record, Value};
use chainql::query_planner::{BuildError, QueryBuilder};
use chainql::sql_generator::{GenericDialect, OracleDialect};

use super::fixtures::{older_than, shop_context};

fn builder() -> QueryBuilder {
    QueryBuilder::new(Arc::new(QueryCache::with_defaults()))
}

#[test]
fn test_repeated_query_is_served_from_cache() {
    let builder = builder();
    let query = shop_context(Arc::new(GenericDialect), true);
    let chain = table("Person").filter(older_than(constant(18)));

    let first = builder.get_select_query(&chain, &query).unwrap();
    let second = builder.get_select_query(&chain, &query).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    let metrics = builder.cache().metrics();
    assert_eq!(metrics.hits, 1);
    assert_eq!(metrics.misses, 1);
    assert_eq!(metrics.size, 1);
}

#[test]
fn test_dialect_and_flags_are_part_of_the_key() {
    let builder = builder();
    let chain = table("Person").filter(older_than(constant(18)));

    let generic = builder
        .get_select_query(&chain, &shop_context(Arc::new(GenericDialect), true))
        .unwrap();
    let oracle = builder
        .get_select_query(&chain, &shop_context(Arc::new(OracleDialect), true))
        .unwrap();
    let inline = builder
        .get_select_query(&chain, &shop_context(Arc::new(GenericDialect), false))
        .unwrap();

    assert_ne!(generic.fingerprint, oracle.fingerprint);
    assert_ne!(generic.fingerprint, inline.fingerprint);
    assert!(inline.sql.ends_with("(Age > 18)"));
    assert_eq!(builder.cache().metrics().size, 3);
}

#[test]
fn test_cached_parameters_read_the_new_capture() {
    // Captured values are part of the chain, so a new value is a new entry
    let builder = builder();
    let query = shop_context(Arc::new(GenericDialect), false);
    let capture = |age: i64| {
        table("Person").filter(older_than(member(
            constant(Record::new("Closure").with_field("minAge", Value::Int(age))),
            "minAge",
            chainql::query_expr::ValueType::Int32,
        )))
    };

    let twenty = builder.get_select_query(&capture(20), &query).unwrap();
    let thirty = builder.get_select_query(&capture(30), &query).unwrap();

    assert_eq!(twenty.sql, thirty.sql);
    assert_eq!(twenty.parameters[0].value(), Ok(Value::Int(20)));
    assert_eq!(thirty.parameters[0].value(), Ok(Value::Int(30)));
}

#[test]
fn test_disabled_cache_rebuilds() {
    let builder = QueryBuilder::new(Arc::new(QueryCache::new(QueryCacheConfig {
        enabled: false,
        ..Default::default()
    })));
    let query = shop_context(Arc::new(GenericDialect), false);
    let chain = table("Person").take(1);

    let first = builder.get_select_query(&chain, &query).unwrap();
    let second = builder.get_select_query(&chain, &query).unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(first.sql, second.sql);
    assert_eq!(builder.cache().metrics().size, 0);
}

#[test]
fn test_table_reader_follows_column_order() {
    let builder = builder();
    let query = shop_context(Arc::new(GenericDialect), false);
    let columns = vec!["Age".to_string(), "Id".to_string()];

    let reader = builder.get_table_reader("Person", &columns, &query).unwrap();
    let again = builder.get_table_reader("Person", &columns, &query).unwrap();
    assert!(Arc::ptr_eq(&reader, &again));

    let row = ValueRow(vec![Value::Int(30), Value::Int(7)]);
    let expected = Record::new("Person")
        .with_field("Age", Value::Int(30))
        .with_field("Id", Value::Int(7));
    assert_eq!(
        reader.materialize(&row, &RowReadingContext::default()),
        Ok(Value::Record(expected))
    );
    assert_eq!(builder.cache().metrics().table_readers, 1);
}

#[test]
fn test_table_reader_rejects_unknown_columns() {
    let builder = builder();
    let query = shop_context(Arc::new(GenericDialect), false);

    assert_eq!(
        builder
            .get_table_reader("Person", &["Email".to_string()], &query)
            .unwrap_err(),
        BuildError::ColumnNotMapped {
            entity: "Person".to_string(),
            member: "Email".to_string(),
        }
    );
    assert_eq!(
        builder
            .get_table_reader("Invoice", &["Id".to_string()], &query)
            .unwrap_err(),
        BuildError::TableNotMapped("Invoice".to_string())
    );
}

#[test]
fn test_invalidate_schema_drops_entries() {
    let builder = builder();
    let query = shop_context(Arc::new(GenericDialect), false);
    builder
        .get_select_query(&table("Person").take(2), &query)
        .unwrap();
    builder
        .get_table_reader("Person", &["Id".to_string()], &query)
        .unwrap();

    builder.cache().invalidate_schema("shop");

    let metrics = builder.cache().metrics();
    assert_eq!(metrics.size, 0);
    assert_eq!(metrics.table_readers, 0);
}
