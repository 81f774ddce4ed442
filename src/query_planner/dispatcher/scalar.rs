//! String, math, Parse and ToString calls.

use super::{expect_operands, Dispatcher, MathMethod, StringMethod};
use crate::query_expr::{
    IndexOffset, MethodCall, MethodOwner, ParamId, QueryExpr, SpecialOp, Value, ValueType,
};
use crate::query_planner::builder_ctx::BuilderContext;
use crate::query_planner::errors::{BuildError, BuildResult};
use crate::query_planner::typing::type_of;

fn wildcard() -> QueryExpr {
    QueryExpr::Constant(Value::String("%".to_string()))
}

fn like(text: QueryExpr, pattern: Vec<QueryExpr>) -> QueryExpr {
    QueryExpr::special(
        SpecialOp::Like,
        vec![text, QueryExpr::special(SpecialOp::Concat, pattern)],
    )
}

impl Dispatcher<'_> {
    fn analyze_operands(
        &mut self,
        operands: &[QueryExpr],
        ctx: &mut BuilderContext,
    ) -> BuildResult<Vec<QueryExpr>> {
        operands
            .iter()
            .map(|operand| self.analyze(operand, &[], ctx))
            .collect()
    }

    /// Character positions are zero based on the host.
    fn string_index(&self, index: QueryExpr) -> QueryExpr {
        QueryExpr::StartIndexOffset(IndexOffset {
            operand: Box::new(index),
            one_based: self.query.dialect.string_indexes_start_at_one(),
        })
    }

    pub(super) fn analyze_string_method(
        &mut self,
        method: StringMethod,
        operands: &[QueryExpr],
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        let name = format!("String.{:?}", method);
        let mut args = self.analyze_operands(operands, ctx)?.into_iter();
        let Some(text) = args.next() else {
            return Err(BuildError::malformed(&name, "missing string operand"));
        };
        let args: Vec<QueryExpr> = args.collect();

        use StringMethod as S;
        Ok(match (method, args.as_slice()) {
            (S::Contains, [needle]) => like(text, vec![wildcard(), needle.clone(), wildcard()]),
            (S::StartsWith, [prefix]) => like(text, vec![prefix.clone(), wildcard()]),
            (S::EndsWith, [suffix]) => like(text, vec![wildcard(), suffix.clone()]),
            (S::IndexOf, [needle]) => {
                QueryExpr::special(SpecialOp::IndexOf, vec![text, needle.clone()])
            }
            (S::IndexOf, [needle, start]) => QueryExpr::special(
                SpecialOp::IndexOf,
                vec![text, needle.clone(), self.string_index(start.clone())],
            ),
            (S::Insert, [start, inserted]) => QueryExpr::special(
                SpecialOp::StringInsert,
                vec![text, self.string_index(start.clone()), inserted.clone()],
            ),
            (S::Remove, [start]) => QueryExpr::special(
                SpecialOp::Remove,
                vec![text, self.string_index(start.clone())],
            ),
            (S::Remove, [start, count]) => QueryExpr::special(
                SpecialOp::Remove,
                vec![text, self.string_index(start.clone()), count.clone()],
            ),
            (S::Substring, [start]) => QueryExpr::special(
                SpecialOp::Substring,
                vec![text, self.string_index(start.clone())],
            ),
            (S::Substring, [start, length]) => QueryExpr::special(
                SpecialOp::Substring,
                vec![text, self.string_index(start.clone()), length.clone()],
            ),
            (S::Replace, [old, new]) => {
                QueryExpr::special(SpecialOp::Replace, vec![text, old.clone(), new.clone()])
            }
            (S::ToLower, []) => QueryExpr::special(SpecialOp::ToLower, vec![text]),
            (S::ToUpper, []) => QueryExpr::special(SpecialOp::ToUpper, vec![text]),
            (S::Trim, []) => QueryExpr::special(SpecialOp::Trim, vec![text]),
            (S::TrimStart, []) => QueryExpr::special(SpecialOp::LTrim, vec![text]),
            (S::TrimEnd, []) => QueryExpr::special(SpecialOp::RTrim, vec![text]),
            (S::ToString, []) => text,
            (_, args) => {
                return Err(BuildError::malformed(
                    &name,
                    format!("unsupported argument count {}", args.len()),
                ))
            }
        })
    }

    pub(super) fn analyze_math_method(
        &mut self,
        method: MathMethod,
        operands: &[QueryExpr],
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        let name = format!("Math.{:?}", method);
        let args = self.analyze_operands(operands, ctx)?;

        use MathMethod as M;
        let (op, args) = match (method, args.as_slice()) {
            (M::Log, [x]) => (SpecialOp::Ln, vec![x.clone()]),
            (M::Log, [x, base]) => (SpecialOp::Log, vec![x.clone(), base.clone()]),
            (M::Log10, [x]) => (
                SpecialOp::Log,
                vec![x.clone(), QueryExpr::Constant(Value::Int(10))],
            ),
            (M::Round, [_] | [_, _]) => (SpecialOp::Round, args.clone()),
            (M::Pow, [_, _]) => (SpecialOp::Pow, args.clone()),
            (M::Abs, [_]) => (SpecialOp::Abs, args.clone()),
            (M::Exp, [_]) => (SpecialOp::Exp, args.clone()),
            (M::Floor, [_]) => (SpecialOp::Floor, args.clone()),
            (M::Sign, [_]) => (SpecialOp::Sign, args.clone()),
            (M::Sqrt, [_]) => (SpecialOp::Sqrt, args.clone()),
            (_, args) => {
                return Err(BuildError::malformed(
                    &name,
                    format!("unsupported argument count {}", args.len()),
                ))
            }
        };
        Ok(QueryExpr::special(op, args))
    }

    /// A parsed statement parameter stays a parameter, parsed on the host
    /// when bound. Anything else becomes a server-side conversion.
    pub(super) fn analyze_parse(
        &mut self,
        ty: &ValueType,
        operands: &[QueryExpr],
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        let name = format!("{}.Parse", ty);
        expect_operands(&name, operands, &[1])?;
        let arg = self.analyze(&operands[0], &[], ctx)?;
        match arg {
            QueryExpr::InputParameter(id) => {
                Ok(self.rewrap_parameter(id, MethodOwner::Type(ty.clone()), "Parse", ty.clone()))
            }
            arg => Ok(QueryExpr::convert(arg, ty.clone())),
        }
    }

    pub(super) fn analyze_to_string(
        &mut self,
        operands: &[QueryExpr],
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        expect_operands("ToString", operands, &[1])?;
        let arg = self.analyze(&operands[0], &[], ctx)?;
        if let QueryExpr::InputParameter(id) = arg {
            return Ok(self.rewrap_parameter(id, MethodOwner::Object, "ToString", ValueType::String));
        }
        let ty = type_of(&arg, &self.graph);
        if !ty.underlying().is_primitive() {
            return Err(BuildError::UnsupportedConstruct(format!(
                "ToString over values of type {}",
                ty
            )));
        }
        if ty.is_string() {
            return Ok(arg);
        }
        Ok(QueryExpr::convert(arg, ValueType::String))
    }

    /// Replaces parameter `id` with one computing `name` over its value.
    fn rewrap_parameter(
        &mut self,
        id: ParamId,
        owner: MethodOwner,
        name: &str,
        ty: ValueType,
    ) -> QueryExpr {
        let old = self.graph.parameter(id).clone();
        self.graph.parameters[id.0].retired = true;
        let value = QueryExpr::Call(MethodCall {
            owner,
            name: name.to_string(),
            object: None,
            arguments: vec![old.value],
            ty: ty.clone(),
        });
        self.register_parameter(&old.alias, value, ty)
    }
}
