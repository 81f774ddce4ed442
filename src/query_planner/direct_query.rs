//! Placeholder rewriting for direct statements
//!
//! Direct statements are written by hand with positional `{N}` placeholders.
//! Each placeholder becomes the dialect's marker for the parameter `pN`:
//!
//! ```ignore
//! let (sql, names) = rewrite_direct_statement("SELECT * FROM t WHERE a = {0}", &PostgresDialect)?;
//! // sql:   "SELECT * FROM t WHERE a = :p0"
//! // names: ["p0"]
//! ```
//!
//! `{{` and `}}` stand for literal braces.

use std::collections::BTreeSet;

use regex::Regex;

use crate::sql_generator::SqlDialect;

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum DirectQueryError {
    #[error("Invalid placeholder `{{{0}}}` (expected a parameter index)")]
    InvalidPlaceholder(String),

    #[error("Unbalanced `{brace}` at byte {position}")]
    UnbalancedBrace { brace: char, position: usize },

    #[error("Placeholder pattern failed to compile: {0}")]
    Pattern(String),
}

lazy_static::lazy_static! {
    static ref PLACEHOLDER: Result<Regex, regex::Error> =
        Regex::new(r"\{\{|\}\}|\{([^{}]*)\}|[{}]");
}

/// Rewrites `{N}` placeholders into dialect markers. Returns the statement
/// and the distinct parameter names in index order.
pub fn rewrite_direct_statement(
    text: &str,
    dialect: &dyn SqlDialect,
) -> Result<(String, Vec<String>), DirectQueryError> {
    let pattern = PLACEHOLDER
        .as_ref()
        .map_err(|e| DirectQueryError::Pattern(e.to_string()))?;

    let mut sql = String::with_capacity(text.len());
    let mut indexes = BTreeSet::new();
    let mut last = 0;

    for captures in pattern.captures_iter(text) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        sql.push_str(&text[last..whole.start()]);
        last = whole.end();

        match (whole.as_str(), captures.get(1)) {
            ("{{", _) => sql.push('{'),
            ("}}", _) => sql.push('}'),
            (_, Some(inner)) => {
                let index: usize = inner
                    .as_str()
                    .trim()
                    .parse()
                    .map_err(|_| DirectQueryError::InvalidPlaceholder(inner.as_str().to_string()))?;
                indexes.insert(index);
                sql.push_str(&dialect.parameter_name(&format!("p{}", index)));
            }
            (brace, None) => {
                return Err(DirectQueryError::UnbalancedBrace {
                    brace: brace.chars().next().unwrap_or('{'),
                    position: whole.start(),
                })
            }
        }
    }
    sql.push_str(&text[last..]);

    let names = indexes.into_iter().map(|i| format!("p{}", i)).collect();
    log::debug!("Rewrote direct statement: {}", sql);
    Ok((sql, names))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_generator::{GenericDialect, OracleDialect};

    #[test]
    fn test_rewrite_positional_placeholders() {
        let (sql, names) = rewrite_direct_statement(
            "SELECT * FROM Person WHERE Age > {1} AND Name = {0} OR Age < {1}",
            &GenericDialect,
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM Person WHERE Age > @p1 AND Name = @p0 OR Age < @p1"
        );
        assert_eq!(names, vec!["p0", "p1"]);
    }

    #[test]
    fn test_oracle_markers() {
        let (sql, _) = rewrite_direct_statement("SELECT 1 FROM DUAL WHERE {0} = 1", &OracleDialect)
            .unwrap();
        assert_eq!(sql, "SELECT 1 FROM DUAL WHERE :p0 = 1");
    }

    #[test]
    fn test_escaped_braces_are_literal() {
        let (sql, names) =
            rewrite_direct_statement("SELECT '{{0}}' FROM t", &GenericDialect).unwrap();
        assert_eq!(sql, "SELECT '{0}' FROM t");
        assert!(names.is_empty());
    }

    #[test]
    fn test_non_numeric_placeholder() {
        assert_eq!(
            rewrite_direct_statement("SELECT {name}", &GenericDialect),
            Err(DirectQueryError::InvalidPlaceholder("name".to_string()))
        );
    }

    #[test]
    fn test_unbalanced_brace() {
        assert_eq!(
            rewrite_direct_statement("SELECT } FROM t", &GenericDialect),
            Err(DirectQueryError::UnbalancedBrace {
                brace: '}',
                position: 7
            })
        );
    }
}
