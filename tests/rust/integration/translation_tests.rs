use std::sync::Arc;

use chainql::materializer::{RowReadingContext, ValueRow};
use chainql::query_expr::builders::*;
use chainql::query_expr::{MethodOwner, QueryChain, QueryExpr, Record, Value, ValueType};
use chainql::query_planner::query_graph::ExecuteMethod;
use chainql::query_planner::{translate, BuildError, QueryContext};
use chainql::sql_generator::{GenericDialect, OracleDialect, PostgresDialect};

use super::fixtures::{field, older_than, shop_context};

fn generic(parameterize: bool) -> QueryContext {
    shop_context(Arc::new(GenericDialect), parameterize)
}

#[test]
fn test_where_with_parameterized_constant() {
    let chain = table("Person").filter(older_than(constant(18)));
    let compiled = translate(&chain, &generic(true)).unwrap();

    assert_eq!(
        compiled.sql,
        "SELECT Id, Name, Age FROM Person WHERE (Age > @p1)"
    );
    assert_eq!(compiled.parameters.len(), 1);
    let parameter = &compiled.parameters[0];
    assert_eq!(parameter.alias, "p1");
    assert_eq!(parameter.name, "@p1");
    assert_eq!(parameter.value(), Ok(Value::Int(18)));
    assert_eq!(compiled.execute_method, None);
}

#[test]
fn test_where_with_inline_constant() {
    let chain = table("Person").filter(older_than(constant(18)));
    let compiled = translate(&chain, &generic(false)).unwrap();

    assert_eq!(
        compiled.sql,
        "SELECT Id, Name, Age FROM Person WHERE (Age > 18)"
    );
    assert!(compiled.parameters.is_empty());
}

#[test]
fn test_captured_member_keeps_its_name() {
    let closure = Record::new("Closure").with_field("minAge", Value::Int(21));
    let chain = table("Person").filter(older_than(member(
        constant(closure),
        "minAge",
        ValueType::Int32,
    )));
    let compiled = translate(&chain, &generic(false)).unwrap();

    assert_eq!(
        compiled.sql,
        "SELECT Id, Name, Age FROM Person WHERE (Age > @minAge)"
    );
    assert_eq!(compiled.parameters[0].alias, "minAge");
    assert_eq!(compiled.parameters[0].value(), Ok(Value::Int(21)));
}

#[test]
fn test_markers_follow_the_dialect() {
    let chain = table("Person").filter(older_than(constant(18)));

    let oracle = translate(&chain, &shop_context(Arc::new(OracleDialect), true)).unwrap();
    assert_eq!(
        oracle.sql,
        "SELECT Id, Name, Age FROM Person WHERE (Age > :p1)"
    );
    assert_eq!(oracle.parameters[0].name, ":p1");

    let postgres = translate(&chain, &shop_context(Arc::new(PostgresDialect), true)).unwrap();
    assert_eq!(postgres.parameters[0].name, ":p1");
}

#[test]
fn test_association_becomes_inner_join() {
    let customer = member(
        param("o"),
        "Customer",
        ValueType::Entity("Customer".to_string()),
    );
    let chain = table("Order").select(lambda(
        &["o"],
        member(customer, "Name", ValueType::String),
    ));
    let compiled = translate(&chain, &generic(false)).unwrap();

    assert_eq!(
        compiled.sql,
        "SELECT Customer1.Name FROM Order AS o INNER JOIN Customer AS Customer1 ON Customer1.Id = o.CustomerId"
    );
    assert_eq!(compiled.row_type(), &ValueType::String);
}

#[test]
fn test_any_is_count_comparison() {
    let chain = table("Person").any(Some(lambda(
        &["p"],
        gt(field("p", "Age", ValueType::Int32), constant(0)),
    )));
    let compiled = translate(&chain, &generic(false)).unwrap();

    assert_eq!(compiled.sql, "SELECT COUNT(*) FROM Person WHERE (Age > 0)");
    assert_eq!(compiled.row_type(), &ValueType::Bool);

    let row = ValueRow(vec![Value::Int(3)]);
    assert_eq!(
        compiled
            .materializer
            .materialize(&row, &RowReadingContext::default()),
        Ok(Value::Bool(true))
    );
}

#[test]
fn test_paging_merges() {
    let compiled = translate(&table("Person").take(5).take(3), &generic(false)).unwrap();
    assert_eq!(compiled.sql, "SELECT Id, Name, Age FROM Person LIMIT 3");

    let compiled = translate(&table("Person").skip(2).skip(3), &generic(false)).unwrap();
    assert_eq!(compiled.sql, "SELECT Id, Name, Age FROM Person OFFSET 5");
}

#[test]
fn test_first_sets_execute_method() {
    let compiled = translate(&table("Person").then("First", vec![]), &generic(false)).unwrap();
    assert_eq!(compiled.sql, "SELECT Id, Name, Age FROM Person LIMIT 1");
    assert_eq!(compiled.execute_method, Some(ExecuteMethod::First));
}

#[test]
fn test_group_by_with_having() {
    let group_count = || {
        call(
            MethodOwner::Enumerable,
            "Count",
            None,
            vec![param("g")],
            ValueType::Int32,
        )
    };
    let chain = table("Order")
        .then(
            "GroupBy",
            vec![lambda(
                &["o"],
                field("o", "CustomerId", ValueType::Int32),
            )],
        )
        .filter(lambda(&["g"], gt(group_count(), constant(1))))
        .select(lambda(
            &["g"],
            new_record(
                "Row",
                vec![
                    ("Key", field("g", "Key", ValueType::Int32)),
                    ("Orders", group_count()),
                ],
            ),
        ));
    let compiled = translate(&chain, &generic(false)).unwrap();

    assert_eq!(
        compiled.sql,
        "SELECT CustomerId, COUNT(*) FROM Order GROUP BY CustomerId HAVING (COUNT(*) > 1)"
    );
}

#[test]
fn test_union_gets_distinct_aliases() {
    let ids = || table("Person").select(lambda(&["p"], field("p", "Id", ValueType::Int32)));
    let chain = ids().then(
        "Union",
        vec![QueryExpr::Constant(Value::Query(Box::new(ids())))],
    );
    let compiled = translate(&chain, &generic(false)).unwrap();

    assert_eq!(
        compiled.sql,
        "SELECT p.Id FROM Person AS p UNION SELECT p1.Id FROM Person AS p1"
    );
}

#[test]
fn test_count_over_limit_uses_derived_table() {
    let compiled = translate(&table("Person").take(10).count(), &generic(false)).unwrap();
    assert_eq!(
        compiled.sql,
        "SELECT COUNT(*) FROM (SELECT Person1.Id AS c0, Person1.Name AS c1, Person1.Age AS c2 FROM Person AS Person1 LIMIT 10) AS source"
    );
}

#[test]
fn test_contains_over_subquery() {
    let customer_ids = table("Customer")
        .select(lambda(&["c"], field("c", "Id", ValueType::Int32)))
        .into_expr();
    let chain = table("Person").filter(lambda(
        &["p"],
        call(
            MethodOwner::Enumerable,
            "Contains",
            None,
            vec![customer_ids, field("p", "Id", ValueType::Int32)],
            ValueType::Bool,
        ),
    ));
    let compiled = translate(&chain, &generic(false)).unwrap();

    assert_eq!(
        compiled.sql,
        "SELECT p.Id, p.Name, p.Age FROM Person AS p WHERE (p.Id IN (SELECT c.Id FROM Customer AS c))"
    );
}

#[test]
fn test_string_functions_stay_on_host_by_default() {
    let upper = lambda(
        &["p"],
        call(
            MethodOwner::String,
            "ToUpper",
            Some(field("p", "Name", ValueType::String)),
            vec![],
            ValueType::String,
        ),
    );
    let chain = table("Person").select(upper);

    let compiled = translate(&chain, &generic(false)).unwrap();
    assert_eq!(compiled.sql, "SELECT Name FROM Person");
    let row = ValueRow(vec![Value::String("ann".to_string())]);
    assert_eq!(
        compiled
            .materializer
            .materialize(&row, &RowReadingContext::default()),
        Ok(Value::String("ANN".to_string()))
    );

    let pushed = QueryContext {
        maximize_server_load: true,
        ..generic(false)
    };
    let compiled = translate(&chain, &pushed).unwrap();
    assert_eq!(compiled.sql, "SELECT UPPER(Name) FROM Person");
}

#[test]
fn test_unknown_entity_is_reported() {
    assert_eq!(
        translate(&table("Invoice"), &generic(false)).unwrap_err(),
        BuildError::TableNotMapped("Invoice".to_string())
    );
}

fn customer_orders(quantifier: &str, predicate: QueryExpr) -> QueryChain {
    table("Customer").filter(lambda(
        &["c"],
        call(
            MethodOwner::Enumerable,
            quantifier,
            None,
            vec![table("Order").into_expr(), lambda(&["o"], predicate)],
            ValueType::Bool,
        ),
    ))
}

fn ordered_by_customer() -> QueryExpr {
    eq(
        field("o", "CustomerId", ValueType::Int32),
        field("c", "Id", ValueType::Int32),
    )
}

#[test]
fn test_nested_all_counts_violations() {
    let compiled = translate(&customer_orders("All", ordered_by_customer()), &generic(false)).unwrap();
    assert_eq!(
        compiled.sql,
        "SELECT c.Id, c.Name FROM Customer AS c WHERE ((SELECT COUNT(*) FROM Order AS o WHERE (NOT (o.CustomerId = c.Id))) = 0)"
    );
}

#[test]
fn test_nested_any_counts_matches() {
    let compiled = translate(&customer_orders("Any", ordered_by_customer()), &generic(false)).unwrap();
    assert_eq!(
        compiled.sql,
        "SELECT c.Id, c.Name FROM Customer AS c WHERE ((SELECT COUNT(*) FROM Order AS o WHERE (o.CustomerId = c.Id)) > 0)"
    );
}

#[test]
fn test_join_on_keys() {
    let chain = table("Order").then(
        "Join",
        vec![
            table("Customer").into_expr(),
            lambda(&["o"], field("o", "CustomerId", ValueType::Int32)),
            lambda(&["c"], field("c", "Id", ValueType::Int32)),
            lambda(&["o", "c"], field("c", "Name", ValueType::String)),
        ],
    );
    let compiled = translate(&chain, &generic(false)).unwrap();
    assert_eq!(
        compiled.sql,
        "SELECT c.Name FROM Order AS o INNER JOIN Customer AS c ON c.Id = o.CustomerId"
    );
}

#[test]
fn test_default_if_empty_makes_outer_join() {
    let optional_customer = call(
        MethodOwner::Enumerable,
        "DefaultIfEmpty",
        None,
        vec![field("o", "Customer", ValueType::Entity("Customer".to_string()))],
        ValueType::Object,
    );
    let chain = table("Order").then(
        "SelectMany",
        vec![
            lambda(&["o"], optional_customer),
            lambda(&["o", "c"], field("c", "Name", ValueType::String)),
        ],
    );
    let compiled = translate(&chain, &generic(false)).unwrap();
    assert_eq!(
        compiled.sql,
        "SELECT c.Name FROM Order AS o LEFT OUTER JOIN Customer AS c ON c.Id = o.CustomerId"
    );
}

#[test]
fn test_set_operations_chain_in_order() {
    let ids = || table("Person").select(lambda(&["p"], field("p", "Id", ValueType::Int32)));
    let chain = ids()
        .then("Union", vec![ids().into_expr()])
        .then("Concat", vec![ids().into_expr()])
        .then("Except", vec![ids().into_expr()]);
    let compiled = translate(&chain, &generic(false)).unwrap();
    assert_eq!(
        compiled.sql,
        "SELECT p.Id FROM Person AS p UNION SELECT p1.Id FROM Person AS p1 UNION ALL SELECT p2.Id FROM Person AS p2 EXCEPT SELECT p3.Id FROM Person AS p3"
    );

    let oracle = translate(&chain, &shop_context(Arc::new(OracleDialect), false)).unwrap();
    assert!(oracle.sql.contains(" MINUS SELECT p3.Id FROM Person p3"));
}

#[test]
fn test_substring_start_is_shifted_for_sql() {
    let substring = |start: i64| {
        lambda(
            &["p"],
            eq(
                call(
                    MethodOwner::String,
                    "Substring",
                    Some(field("p", "Name", ValueType::String)),
                    vec![constant(start)],
                    ValueType::String,
                ),
                constant("x"),
            ),
        )
    };

    let compiled = translate(&table("Person").filter(substring(1)), &generic(false)).unwrap();
    assert_eq!(
        compiled.sql,
        "SELECT Id, Name, Age FROM Person WHERE (SUBSTRING(Name, 2) = 'x')"
    );

    let compiled = translate(&table("Person").filter(substring(i64::MAX)), &generic(false)).unwrap();
    assert_eq!(
        compiled.sql,
        "SELECT Id, Name, Age FROM Person WHERE (SUBSTRING(Name, (9223372036854775807 + 1)) = 'x')"
    );
}

#[test]
fn test_captured_name_never_shadows_a_table_alias() {
    let closure = Record::new("Closure").with_field("Customer1", Value::Int(4));
    let customer = field("o", "Customer", ValueType::Entity("Customer".to_string()));
    let chain = table("Order").filter(lambda(
        &["o"],
        eq(
            member(customer, "Id", ValueType::Int32),
            member(constant(closure), "Customer1", ValueType::Int32),
        ),
    ));
    let compiled = translate(&chain, &generic(false)).unwrap();
    assert_eq!(
        compiled.sql,
        "SELECT o.Id, o.CustomerId FROM Order AS o INNER JOIN Customer AS Customer1 ON Customer1.Id = o.CustomerId WHERE (Customer1.Id = @Customer11)"
    );
    assert_eq!(compiled.parameters[0].alias, "Customer11");
    assert_eq!(compiled.parameters[0].value(), Ok(Value::Int(4)));
}
