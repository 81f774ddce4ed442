use chainql::config::DialectName;
use chainql::query_planner::{rewrite_direct_statement, DirectQueryError};

#[test]
fn test_rewrite_for_each_configured_dialect() {
    let text = "UPDATE Person SET Age = {1} WHERE Id = {0}";
    let expected = [
        (DialectName::Generic, "UPDATE Person SET Age = @p1 WHERE Id = @p0"),
        (DialectName::Postgres, "UPDATE Person SET Age = :p1 WHERE Id = :p0"),
        (DialectName::Oracle, "UPDATE Person SET Age = :p1 WHERE Id = :p0"),
    ];
    for (name, sql) in expected {
        let dialect = name.dialect().unwrap();
        let (rewritten, names) = rewrite_direct_statement(text, dialect.as_ref()).unwrap();
        assert_eq!(rewritten, sql, "dialect {}", name);
        assert_eq!(names, vec!["p0", "p1"]);
    }
}

#[test]
fn test_unclosed_placeholder() {
    let dialect = DialectName::Generic.dialect().unwrap();
    assert_eq!(
        rewrite_direct_statement("SELECT * FROM t WHERE a = {0", dialect.as_ref()),
        Err(DirectQueryError::UnbalancedBrace {
            brace: '{',
            position: 26
        })
    );
}

#[test]
fn test_statement_without_placeholders_is_unchanged() {
    let dialect = DialectName::Oracle.dialect().unwrap();
    let (sql, names) =
        rewrite_direct_statement("SELECT COUNT(*) FROM Person", dialect.as_ref()).unwrap();
    assert_eq!(sql, "SELECT COUNT(*) FROM Person");
    assert!(names.is_empty());
}
