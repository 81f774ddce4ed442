//! Canonicalization applied before analysis and again over finished
//! WHERE/LIMIT/OFFSET operands.
//!
//! Currently rewrites string `+` into an explicit `Concat` special operator
//! (flattening nested concatenations), so the renderer never has to guess
//! whether `+` means addition.

use super::{BinaryOp, QueryExpr, SpecialExpr, SpecialOp, ValueType};

pub struct PrePassRewriter<'a> {
    type_of: &'a dyn Fn(&QueryExpr) -> ValueType,
}

impl<'a> PrePassRewriter<'a> {
    pub fn new(type_of: &'a dyn Fn(&QueryExpr) -> ValueType) -> Self {
        PrePassRewriter { type_of }
    }

    pub fn rewrite(&self, expr: &QueryExpr) -> QueryExpr {
        // children first so nested string additions are already Concat nodes
        let rebuilt: Result<QueryExpr, std::convert::Infallible> =
            expr.try_map_children(&mut |child| Ok(self.rewrite(child)));
        let rebuilt = match rebuilt {
            Ok(e) => e,
            Err(never) => match never {},
        };

        match &rebuilt {
            QueryExpr::Binary(b) if b.op == BinaryOp::Add && self.is_string_addition(b) => {
                let mut operands = Vec::new();
                flatten_concat(&b.left, &mut operands);
                flatten_concat(&b.right, &mut operands);
                QueryExpr::Special(SpecialExpr {
                    op: SpecialOp::Concat,
                    operands,
                })
            }
            _ => rebuilt,
        }
    }

    fn is_string_addition(&self, b: &super::BinaryExpr) -> bool {
        is_concat(&b.left)
            || is_concat(&b.right)
            || (self.type_of)(&b.left).is_string()
            || (self.type_of)(&b.right).is_string()
    }
}

fn is_concat(expr: &QueryExpr) -> bool {
    matches!(expr, QueryExpr::Special(s) if s.op == SpecialOp::Concat)
}

fn flatten_concat(expr: &QueryExpr, out: &mut Vec<QueryExpr>) {
    match expr {
        QueryExpr::Special(s) if s.op == SpecialOp::Concat => {
            out.extend(s.operands.iter().cloned());
        }
        other => out.push(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_expr::builders::*;

    fn declared(expr: &QueryExpr) -> ValueType {
        match expr {
            QueryExpr::Constant(v) => v.value_type(),
            QueryExpr::Member(m) => m.ty.clone(),
            _ => ValueType::Object,
        }
    }

    #[test]
    fn test_string_addition_becomes_flat_concat() {
        let name = member(param("p"), "Name", ValueType::String);
        let expr = add(add(constant("Mr "), name.clone()), constant("!"));
        let rewritten = PrePassRewriter::new(&declared).rewrite(&expr);
        assert_eq!(
            rewritten,
            QueryExpr::special(SpecialOp::Concat, vec![constant("Mr "), name, constant("!")])
        );
    }

    #[test]
    fn test_numeric_addition_untouched() {
        let expr = add(member(param("p"), "Age", ValueType::Int32), constant(1));
        assert_eq!(PrePassRewriter::new(&declared).rewrite(&expr), expr);
    }
}
