use std::sync::Arc;

use super::*;
use crate::materializer::evaluate;
use crate::query_expr::builders::*;
use crate::query_expr::{Record, ScopeId, SpecialOp};
use crate::query_planner::query_graph::{ExecuteMethod, JoinKind, SetOperator};
use crate::schema_catalog::{MappingConfig, MockSchemaMapper};
use crate::sql_generator::GenericDialect;

const SHOP: &str = r#"
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

fn shop(parameterize: bool) -> QueryContext {
    let schema = MappingConfig::from_yaml_str(SHOP)
        .unwrap()
        .to_schema()
        .unwrap();
    QueryContext::builder(Arc::new(schema), Arc::new(GenericDialect))
        .parameterize_constants(parameterize)
        .build()
}

/// Analyzes `chain` as a whole query and cuts the result.
fn run(chain: &QueryChain, query: &QueryContext) -> BuildResult<(QueryGraph, ScopeId)> {
    let mut dispatcher = Dispatcher::new(query);
    let mut ctx = BuilderContext::new(dispatcher.graph.root());
    ctx.is_external_in_chain = true;
    let result = dispatcher.analyze_chain(chain, &mut ctx)?;
    dispatcher.build_select(&result, &ctx)?;
    Ok((dispatcher.graph, ctx.current_scope))
}

fn age(name: &str) -> QueryExpr {
    member(param(name), "Age", ValueType::Int32)
}

fn column_member(graph: &QueryGraph, expr: &QueryExpr) -> String {
    match expr {
        QueryExpr::Column(id) => graph.column(*id).member.clone(),
        other => panic!("expected a column, got {:?}", other),
    }
}

#[test]
fn test_where_registers_table_and_filter() {
    let query = shop(false);
    let chain = table("Person").filter(lambda(&["p"], gt(age("p"), constant(18))));
    let (graph, top) = run(&chain, &query).unwrap();

    let scope = graph.scope(top);
    assert_eq!(scope.tables.len(), 1);
    assert_eq!(graph.table(scope.tables[0]).alias.as_deref(), Some("p"));
    match &scope.filters[..] {
        [QueryExpr::Binary(b)] => {
            assert_eq!(b.op, BinaryOp::GreaterThan);
            assert_eq!(column_member(&graph, &b.left), "Age");
            assert_eq!(*b.right, constant(18));
        }
        other => panic!("unexpected filters {:?}", other),
    }
    // whole entity rows select every mapped column
    assert_eq!(scope.operands.len(), 3);
}

#[test]
fn test_lambda_constants_become_parameters() {
    let query = shop(true);
    let chain = table("Person").filter(lambda(&["p"], gt(age("p"), constant(18))));
    let (graph, top) = run(&chain, &query).unwrap();

    let QueryExpr::Binary(filter) = &graph.scope(top).filters[0] else {
        panic!("expected a comparison");
    };
    let QueryExpr::InputParameter(id) = filter.right.as_ref() else {
        panic!("expected a parameter, got {:?}", filter.right);
    };
    assert_eq!(graph.parameter(*id).value, constant(18));
    assert_eq!(graph.parameter(*id).alias, "");
}

#[test]
fn test_captured_member_is_named_parameter() {
    let query = shop(false);
    let closure = Record::new("Closure").with_field("minAge", Value::Int(21));
    let chain = table("Person").filter(lambda(
        &["p"],
        gt(age("p"), member(constant(closure), "minAge", ValueType::Int32)),
    ));
    let (graph, _) = run(&chain, &query).unwrap();

    let active: Vec<_> = graph.active_parameters().collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].1.alias, "minAge");
    assert_eq!(
        evaluate(&active[0].1.value, Some(&graph)),
        Ok(Value::Int(21))
    );
}

#[test]
fn test_association_is_joined_once() {
    let query = shop(false);
    let customer = |o: &str| member(param(o), "Customer", ValueType::Entity("Customer".into()));
    let chain = table("Order").select(lambda(
        &["o"],
        new_record(
            "Row",
            vec![
                ("Name", member(customer("o"), "Name", ValueType::String)),
                ("Id", member(customer("o"), "Id", ValueType::Int32)),
            ],
        ),
    ));
    let (graph, top) = run(&chain, &query).unwrap();

    let scope = graph.scope(top);
    assert_eq!(scope.tables.len(), 2);
    let joined = graph.table(scope.tables[1]);
    assert_eq!(joined.entity, "Customer");
    assert_eq!(joined.join_id.as_deref(), Some("Customer"));
    assert!(joined.join.is_some());
    assert_eq!(scope.operands.len(), 2);
}

#[test]
fn test_take_keeps_the_smaller_limit() {
    let query = shop(false);
    let chain = table("Person").take(5).take(3);
    let (graph, top) = run(&chain, &query).unwrap();
    let limit = graph.scope(top).limit.clone().unwrap();
    assert_eq!(evaluate(&limit, None), Ok(Value::Int(3)));
}

#[test]
fn test_skip_accumulates() {
    let query = shop(false);
    let chain = table("Person").skip(2).skip(3);
    let (graph, top) = run(&chain, &query).unwrap();
    let offset = graph.scope(top).offset.clone().unwrap();
    assert_eq!(evaluate(&offset, None), Ok(Value::Int(5)));
}

#[test]
fn test_first_limits_to_one_row() {
    let query = shop(false);
    let chain = table("Person").then("First", vec![]);
    let (graph, top) = run(&chain, &query).unwrap();
    let scope = graph.scope(top);
    assert_eq!(scope.execute_method, Some(ExecuteMethod::First));
    assert_eq!(scope.limit, Some(constant(1)));
}

#[test]
fn test_first_inside_nested_query_is_rejected() {
    let query = shop(false);
    let inner = table("Person")
        .select(lambda(&["q"], member(param("q"), "Id", ValueType::Int32)))
        .then("First", vec![]);
    let chain = table("Person").filter(lambda(
        &["p"],
        call(
            MethodOwner::Enumerable,
            "Contains",
            None,
            vec![inner.into_expr(), member(param("p"), "Id", ValueType::Int32)],
            ValueType::Bool,
        ),
    ));
    assert!(matches!(
        run(&chain, &query),
        Err(BuildError::UnsupportedConstruct(_))
    ));
}

#[test]
fn test_unknown_operation() {
    let query = shop(false);
    let chain = table("Person").then("Reverse", vec![]);
    assert_eq!(
        run(&chain, &query).unwrap_err(),
        BuildError::UnsupportedOperation {
            owner: "Queryable".to_string(),
            name: "Reverse".to_string(),
        }
    );
}

#[test]
fn test_contains_over_array_is_in_list() {
    let query = shop(false);
    let ids = constant(Value::Array(vec![Value::Int(1), Value::Int(2)]));
    let chain = table("Person").filter(lambda(
        &["p"],
        call(
            MethodOwner::Enumerable,
            "Contains",
            None,
            vec![ids.clone(), member(param("p"), "Id", ValueType::Int32)],
            ValueType::Bool,
        ),
    ));
    let (graph, top) = run(&chain, &query).unwrap();
    match &graph.scope(top).filters[0] {
        QueryExpr::Special(s) => {
            assert_eq!(s.op, SpecialOp::In);
            assert_eq!(column_member(&graph, &s.operands[0]), "Id");
            assert_eq!(s.operands[1], ids);
        }
        other => panic!("expected IN, got {:?}", other),
    }
}

#[test]
fn test_string_contains_is_like() {
    let query = shop(false);
    let name = member(param("p"), "Name", ValueType::String);
    let chain = table("Person").filter(lambda(
        &["p"],
        call(
            MethodOwner::String,
            "Contains",
            Some(name),
            vec![constant("ann")],
            ValueType::Bool,
        ),
    ));
    let (graph, top) = run(&chain, &query).unwrap();
    let QueryExpr::Special(like) = &graph.scope(top).filters[0] else {
        panic!("expected LIKE");
    };
    assert_eq!(like.op, SpecialOp::Like);
    assert_eq!(
        like.operands[1],
        QueryExpr::special(
            SpecialOp::Concat,
            vec![constant("%"), constant("ann"), constant("%")]
        )
    );
}

#[test]
fn test_explicit_entity_construction_is_rejected() {
    let query = shop(false);
    let chain = table("Person").select(lambda(
        &["p"],
        QueryExpr::New(NewExpr {
            ty: ValueType::Entity("Person".into()),
            members: vec![MemberBinding {
                name: "Id".into(),
                value: member(param("p"), "Id", ValueType::Int32),
            }],
        }),
    ));
    assert!(matches!(
        run(&chain, &query),
        Err(BuildError::UnsupportedConstruct(_))
    ));
}

#[test]
fn test_count_after_take_uses_derived_table() {
    let query = shop(false);
    let chain = table("Person").take(10).count();
    let (graph, top) = run(&chain, &query).unwrap();

    assert_ne!(top, graph.root());
    let scope = graph.scope(top);
    assert_eq!(scope.tables.len(), 1);
    let derived = graph.table(scope.tables[0]);
    assert_eq!(derived.source, Some(graph.root()));
    assert_eq!(scope.operands, vec![QueryExpr::special(SpecialOp::Count, vec![])]);
    assert_eq!(graph.scope(graph.root()).parent, Some(top));
}

#[test]
fn test_group_count_in_projection() {
    let query = shop(false);
    let group_count = call(
        MethodOwner::Enumerable,
        "Count",
        None,
        vec![param("g")],
        ValueType::Int32,
    );
    let chain = table("Order")
        .then(
            "GroupBy",
            vec![lambda(&["o"], member(param("o"), "CustomerId", ValueType::Int32))],
        )
        .select(lambda(
            &["g"],
            new_record(
                "Row",
                vec![
                    ("Key", member(param("g"), "Key", ValueType::Int32)),
                    ("Orders", group_count),
                ],
            ),
        ));
    let (graph, top) = run(&chain, &query).unwrap();

    // the speculative count scope is dropped again
    assert_eq!(graph.scopes.len(), 1);
    let scope = graph.scope(top);
    assert_eq!(scope.group.len(), 1);
    assert_eq!(column_member(&graph, &scope.operands[0]), "CustomerId");
    assert!(matches!(
        &scope.operands[1],
        QueryExpr::Special(s) if s.op == SpecialOp::Count
    ));
}

#[test]
fn test_unmapped_entity() {
    let mut schema = MockSchemaMapper::new();
    schema.expect_table_name().returning(|_| None);
    let query = QueryContext::new(Arc::new(schema), Arc::new(GenericDialect));
    assert_eq!(
        run(&table("Ghost"), &query).unwrap_err(),
        BuildError::TableNotMapped("Ghost".to_string())
    );
}

fn customer_of(order: &str) -> QueryExpr {
    member(param(order), "Customer", ValueType::Entity("Customer".into()))
}

fn nested_orders(quantifier: &str, variable: &str, predicate: QueryExpr) -> QueryExpr {
    call(
        MethodOwner::Enumerable,
        quantifier,
        None,
        vec![table("Order").into_expr(), lambda(&[variable], predicate)],
        ValueType::Bool,
    )
}

#[test]
fn test_join_shared_by_sibling_subqueries_moves_to_common_scope() {
    let query = shop(false);
    let customer_id = || member(customer_of("o"), "Id", ValueType::Int32);
    let chain = table("Order").filter(lambda(
        &["o"],
        and_also(
            nested_orders(
                "Any",
                "x",
                eq(member(param("x"), "Id", ValueType::Int32), customer_id()),
            ),
            nested_orders(
                "Any",
                "y",
                eq(member(param("y"), "CustomerId", ValueType::Int32), customer_id()),
            ),
        ),
    ));
    let (graph, top) = run(&chain, &query).unwrap();

    let root = graph.scope(top);
    assert_eq!(root.tables.len(), 2);
    let joined = root.tables[1];
    assert_eq!(graph.table(joined).join_id.as_deref(), Some("Customer"));
    assert!(root
        .columns
        .iter()
        .any(|c| graph.column(*c).table == joined));

    for nested in [ScopeId(1), ScopeId(2)] {
        let scope = graph.scope(nested);
        assert_eq!(scope.parent, Some(top));
        assert_eq!(scope.tables.len(), 1);
        assert_eq!(graph.table(scope.tables[0]).entity, "Order");
        assert!(scope.columns.iter().all(|c| graph.column(*c).table != joined));
    }
}

#[test]
fn test_nested_all_negates_the_predicate() {
    let query = shop(false);
    let predicate = eq(
        member(param("o"), "CustomerId", ValueType::Int32),
        member(param("c"), "Id", ValueType::Int32),
    );
    let chain = table("Customer").filter(lambda(&["c"], nested_orders("All", "o", predicate)));
    let (graph, top) = run(&chain, &query).unwrap();

    let nested = ScopeId(1);
    match &graph.scope(top).filters[..] {
        [QueryExpr::Binary(b)] => {
            assert_eq!(b.op, BinaryOp::Equal);
            assert_eq!(*b.left, QueryExpr::SubSelect(nested));
            assert_eq!(*b.right, constant(0));
        }
        other => panic!("unexpected filters {:?}", other),
    }
    let scope = graph.scope(nested);
    assert_eq!(scope.operands, vec![QueryExpr::special(SpecialOp::Count, vec![])]);
    assert!(matches!(
        &scope.filters[..],
        [QueryExpr::Unary(u)] if u.op == UnaryOp::Not
    ));
}

#[test]
fn test_nested_any_keeps_the_predicate() {
    let query = shop(false);
    let predicate = eq(
        member(param("o"), "CustomerId", ValueType::Int32),
        member(param("c"), "Id", ValueType::Int32),
    );
    let chain = table("Customer").filter(lambda(&["c"], nested_orders("Any", "o", predicate)));
    let (graph, top) = run(&chain, &query).unwrap();

    assert!(matches!(
        &graph.scope(top).filters[..],
        [QueryExpr::Binary(b)] if b.op == BinaryOp::GreaterThan
    ));
    assert!(matches!(
        &graph.scope(ScopeId(1)).filters[..],
        [QueryExpr::Binary(b)] if b.op == BinaryOp::Equal
    ));
}

#[test]
fn test_join_attaches_inner_table_to_outer() {
    let query = shop(false);
    let chain = table("Order").then(
        "Join",
        vec![
            table("Customer").into_expr(),
            lambda(&["o"], member(param("o"), "CustomerId", ValueType::Int32)),
            lambda(&["c"], member(param("c"), "Id", ValueType::Int32)),
            lambda(&["o", "c"], member(param("c"), "Name", ValueType::String)),
        ],
    );
    let (graph, top) = run(&chain, &query).unwrap();

    let scope = graph.scope(top);
    assert_eq!(scope.tables.len(), 2);
    let inner = graph.table(scope.tables[1]);
    assert_eq!(inner.entity, "Customer");
    assert_eq!(inner.alias.as_deref(), Some("c"));
    assert!(inner.join_id.as_deref().is_some_and(|id| id.starts_with("join")));
    let join = inner.join.as_ref().unwrap();
    assert_eq!(join.kind, JoinKind::INNER);
    assert_eq!(join.joined_to, scope.tables[0]);
    assert_eq!(scope.operands.len(), 1);
    assert_eq!(column_member(&graph, &scope.operands[0]), "Name");
}

#[test]
fn test_select_many_builds_table_tuple() {
    let query = shop(false);
    let chain = table("Order")
        .then(
            "SelectMany",
            vec![
                lambda(&["o"], customer_of("o")),
                lambda(
                    &["o", "c"],
                    new_record("Pair", vec![("Order", param("o")), ("Customer", param("c"))]),
                ),
            ],
        )
        .select(lambda(
            &["t"],
            member(
                member(param("t"), "Customer", ValueType::Entity("Customer".into())),
                "Name",
                ValueType::String,
            ),
        ));
    let (graph, top) = run(&chain, &query).unwrap();

    let scope = graph.scope(top);
    assert_eq!(graph.meta_tables.len(), 1);
    let tuple = &graph.meta_tables[0];
    assert_eq!(tuple.member("Order"), Some(&QueryExpr::Table(scope.tables[0])));
    assert_eq!(tuple.member("Customer"), Some(&QueryExpr::Table(scope.tables[1])));
    assert_eq!(column_member(&graph, &scope.operands[0]), "Name");
}

#[test]
fn test_default_if_empty_flags_outer_join() {
    let query = shop(false);
    let optional = call(
        MethodOwner::Enumerable,
        "DefaultIfEmpty",
        None,
        vec![customer_of("o")],
        ValueType::Object,
    );
    let chain = table("Order").then(
        "SelectMany",
        vec![
            lambda(&["o"], optional),
            lambda(&["o", "c"], member(param("c"), "Name", ValueType::String)),
        ],
    );
    let (graph, top) = run(&chain, &query).unwrap();

    let joined = graph.table(graph.scope(top).tables[1]);
    assert!(joined.outer_join);
    assert!(joined
        .effective_join_kind()
        .is_some_and(|kind| kind.contains(JoinKind::LEFT_OUTER)));
}

#[test]
fn test_set_operations_link_after_the_last_sibling() {
    let query = shop(false);
    let ids = || table("Person").select(lambda(&["p"], member(param("p"), "Id", ValueType::Int32)));
    let chain = ids()
        .then("Union", vec![ids().into_expr()])
        .then("Intersect", vec![ids().into_expr()]);
    let (graph, top) = run(&chain, &query).unwrap();

    assert_eq!(graph.scope(top).next, Some((SetOperator::Union, ScopeId(1))));
    assert_eq!(graph.scope(ScopeId(1)).next, Some((SetOperator::Intersect, ScopeId(2))));
    assert_eq!(graph.scope(ScopeId(2)).next, None);
    for sibling in [ScopeId(1), ScopeId(2)] {
        assert_eq!(graph.scope(sibling).parent, None);
        assert_eq!(graph.scope(sibling).operands.len(), 1);
    }
}
