/// Scalar operator templates.
///
/// Maps `(operator, arity)` to an SQL template whose `{N}` slots receive the
/// rendered operands. Dialects may override an entry through
/// `SqlDialect::function_template`.
use std::collections::HashMap;

use super::errors::{SqlGenerationError, SqlResult};
use crate::query_expr::SpecialOp;

lazy_static::lazy_static! {
    static ref FUNCTION_TEMPLATES: HashMap<(SpecialOp, usize), &'static str> = {
        let mut m = HashMap::new();

        // ===== STRING FUNCTIONS =====
        m.insert((SpecialOp::StringLength, 1), "CHAR_LENGTH({0})");
        m.insert((SpecialOp::ToUpper, 1), "UPPER({0})");
        m.insert((SpecialOp::ToLower, 1), "LOWER({0})");
        m.insert((SpecialOp::Trim, 1), "TRIM({0})");
        m.insert((SpecialOp::LTrim, 1), "LTRIM({0})");
        m.insert((SpecialOp::RTrim, 1), "RTRIM({0})");
        m.insert((SpecialOp::Substring, 2), "SUBSTRING({0}, {1})");
        m.insert((SpecialOp::Substring, 3), "SUBSTRING({0}, {1}, {2})");
        m.insert((SpecialOp::Replace, 3), "REPLACE({0}, {1}, {2})");
        // index arguments arrive already shifted to 1-based positions
        m.insert((SpecialOp::StringInsert, 3), "OVERLAY({0} PLACING {2} FROM {1} FOR 0)");
        m.insert((SpecialOp::Remove, 2), "SUBSTRING({0}, 1, {1} - 1)");
        m.insert((SpecialOp::Remove, 3), "OVERLAY({0} PLACING '' FROM {1} FOR {2})");
        m.insert((SpecialOp::IndexOf, 2), "(POSITION({1} IN {0}) - 1)");
        m.insert(
            (SpecialOp::IndexOf, 3),
            "CASE WHEN POSITION({1} IN SUBSTRING({0}, {2})) = 0 THEN -1 \
             ELSE POSITION({1} IN SUBSTRING({0}, {2})) + {2} - 2 END",
        );

        // ===== DATETIME FUNCTIONS =====
        m.insert((SpecialOp::Year, 1), "EXTRACT(YEAR FROM {0})");
        m.insert((SpecialOp::Month, 1), "EXTRACT(MONTH FROM {0})");
        m.insert((SpecialOp::Day, 1), "EXTRACT(DAY FROM {0})");
        m.insert((SpecialOp::Hour, 1), "EXTRACT(HOUR FROM {0})");
        m.insert((SpecialOp::Minute, 1), "EXTRACT(MINUTE FROM {0})");
        m.insert((SpecialOp::Second, 1), "EXTRACT(SECOND FROM {0})");
        m.insert((SpecialOp::Millisecond, 1), "(EXTRACT(MILLISECOND FROM {0}) % 1000)");
        m.insert((SpecialOp::Date, 1), "CAST({0} AS DATE)");
        m.insert((SpecialOp::Now, 0), "CURRENT_TIMESTAMP");
        m.insert((SpecialOp::DateDiffInMilliseconds, 2), "(EXTRACT(EPOCH FROM ({0} - {1})) * 1000)");

        // ===== MATH FUNCTIONS =====
        m.insert((SpecialOp::Abs, 1), "ABS({0})");
        m.insert((SpecialOp::Exp, 1), "EXP({0})");
        m.insert((SpecialOp::Floor, 1), "FLOOR({0})");
        m.insert((SpecialOp::Ln, 1), "LN({0})");
        m.insert((SpecialOp::Log, 2), "LOG({1}, {0})");
        m.insert((SpecialOp::Pow, 2), "POWER({0}, {1})");
        m.insert((SpecialOp::Round, 1), "ROUND({0})");
        m.insert((SpecialOp::Round, 2), "ROUND({0}, {1})");
        m.insert((SpecialOp::Sign, 1), "SIGN({0})");
        m.insert((SpecialOp::Sqrt, 1), "SQRT({0})");

        m
    };
}

pub fn get_function_template(op: SpecialOp, arity: usize) -> SqlResult<&'static str> {
    FUNCTION_TEMPLATES
        .get(&(op, arity))
        .copied()
        .ok_or_else(|| SqlGenerationError::NoFunction {
            op: format!("{:?}", op),
            arity,
        })
}

/// Fills `{N}` slots with `args[N]` in a single pass, so rendered operands
/// are never rescanned.
pub fn apply_template(template: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let slot = after
            .find('}')
            .and_then(|close| Some((close, after[..close].parse::<usize>().ok()?)));
        match slot {
            Some((close, index)) if index < args.len() => {
                out.push_str(&args[index]);
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_template() {
        let t = get_function_template(SpecialOp::IndexOf, 2).unwrap();
        assert_eq!(
            apply_template(t, &["Name".into(), "'x'".into()]),
            "(POSITION('x' IN Name) - 1)"
        );
        assert_eq!(
            apply_template(get_function_template(SpecialOp::Log, 2).unwrap(), &["x".into(), "10".into()]),
            "LOG(10, x)"
        );
    }

    #[test]
    fn test_unknown_arity() {
        assert!(matches!(
            get_function_template(SpecialOp::Sqrt, 2),
            Err(SqlGenerationError::NoFunction { arity: 2, .. })
        ));
    }
}
