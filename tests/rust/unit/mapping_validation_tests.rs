use chainql::schema_catalog::{MappingConfig, SchemaError, SchemaMapper};
use chainql::query_expr::ValueType;
use test_case::test_case;

fn invalid(yaml: &str) -> String {
    match MappingConfig::from_yaml_str(yaml).and_then(|m| m.to_schema()) {
        Err(SchemaError::InvalidConfig { message }) => message,
        other => panic!("expected an invalid mapping, got {:?}", other.map(|_| ())),
    }
}

#[test_case(
    "name: empty\nentities: []\n",
    "at least one entity" ;
    "no entities"
)]
#[test_case(
    r#"
name: dup
entities:
  - { name: A, columns: [{ member: Id, type: Int32 }] }
  - { name: A, columns: [{ member: Id, type: Int32 }] }
"#,
    "Duplicate entity: A" ;
    "duplicate entity"
)]
#[test_case(
    r#"
name: dangling
entities:
  - name: Order
    columns: [{ member: CustomerId, type: Int32 }]
    associations:
      - { member: Customer, other: Customer, this_keys: [CustomerId], other_keys: [Id] }
"#,
    "targets unknown entity Customer" ;
    "unknown association target"
)]
#[test_case(
    r#"
name: unpaired
entities:
  - { name: Customer, columns: [{ member: Id, type: Int32 }] }
  - name: Order
    columns: [{ member: CustomerId, type: Int32 }]
    associations:
      - { member: Customer, other: Customer, this_keys: [CustomerId], other_keys: [] }
"#,
    "equal, non-zero number of keys" ;
    "unpaired keys"
)]
#[test_case(
    r#"
name: badkey
entities:
  - { name: Customer, columns: [{ member: Id, type: Int32 }] }
  - name: Order
    columns: [{ member: CustomerId, type: Int32 }]
    associations:
      - { member: Customer, other: Customer, this_keys: [CustomerRef], other_keys: [Id] }
"#,
    "Unknown key member Order.CustomerRef" ;
    "unknown key member"
)]
fn test_invalid_mapping(yaml: &str, expected: &str) {
    let message = invalid(yaml);
    assert!(
        message.contains(expected),
        "`{}` does not mention `{}`",
        message,
        expected
    );
}

#[test]
fn test_unparseable_mapping() {
    assert!(matches!(
        MappingConfig::from_yaml_str("name: [unterminated"),
        Err(SchemaError::ConfigParseError { .. })
    ));
}

#[test]
fn test_renamed_table_and_columns() {
    let schema = MappingConfig::from_yaml_str(
        r#"
name: legacy
entities:
  - name: Order
    table: dbo.ORDERS
    columns:
      - { member: Id, column: ORDER_ID, type: Int32, primary_key: true }
      - { member: Note, column: NOTE_TXT, type: String, nullable: true }
"#,
    )
    .unwrap()
    .to_schema()
    .unwrap();

    assert_eq!(schema.table_name("Order").as_deref(), Some("dbo.ORDERS"));
    assert_eq!(schema.column_name("Order", "Id").as_deref(), Some("ORDER_ID"));
    assert_eq!(
        schema.column_type("Order", "Note"),
        Some(ValueType::nullable(ValueType::String))
    );
    assert_eq!(schema.primary_keys("Order"), vec!["Id"]);
    assert_eq!(
        schema.member_for_column("Order", "note_txt").as_deref(),
        Some("Note")
    );
    assert_eq!(schema.table_name("Invoice"), None);
}
