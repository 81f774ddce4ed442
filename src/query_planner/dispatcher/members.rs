//! Member access resolution.

use super::Dispatcher;
use crate::query_expr::{
    BinaryOp, EntitySetExpr, MemberAccess, ParamId, QueryExpr, Record, SpecialOp, TableId, Value,
    ValueType,
};
use crate::query_planner::builder_ctx::BuilderContext;
use crate::query_planner::errors::{BuildError, BuildResult};
use crate::query_planner::query_graph::ExternalParameter;
use crate::query_planner::typing::type_of;

const MS_PER_SECOND: f64 = 1_000.0;
const MS_PER_MINUTE: f64 = 60_000.0;
const MS_PER_HOUR: f64 = 3_600_000.0;
const MS_PER_DAY: f64 = 86_400_000.0;

fn unsupported_member(owner: impl ToString, member: &str) -> BuildError {
    BuildError::UnsupportedMember {
        owner: owner.to_string(),
        member: member.to_string(),
    }
}

impl Dispatcher<'_> {
    pub(super) fn analyze_member(
        &mut self,
        access: &MemberAccess,
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        let Some(object) = &access.object else {
            return static_member(access);
        };
        let object = self.analyze(object, &[], ctx)?;
        let name = access.name.as_str();

        match &object {
            QueryExpr::MetaTable(id) => {
                let meta = self.graph.meta_table(*id);
                meta.member(name)
                    .cloned()
                    .ok_or_else(|| unsupported_member(&meta.ty, name))
            }
            QueryExpr::Group(group) if name == "Key" => Ok((*group.key).clone()),
            QueryExpr::Table(_) | QueryExpr::EntitySet(_) | QueryExpr::Group(_)
                if name == "Count" =>
            {
                self.analyze_aggregate(SpecialOp::Count, &[object.clone()], false, ctx)
            }
            QueryExpr::Table(table) => self.table_member(*table, access, ctx),
            QueryExpr::New(new) => new
                .member(name)
                .cloned()
                .ok_or_else(|| unsupported_member(&new.ty, name)),
            QueryExpr::Constant(Value::Record(record)) => self.record_member(record, access, ctx),
            QueryExpr::InputParameter(id) => Ok(self.parameter_member(*id, access)),
            _ => {
                let ty = type_of(&object, &self.graph);
                scalar_member(object, &ty, access)
            }
        }
    }

    /// Association first, then column.
    fn table_member(
        &mut self,
        table: TableId,
        access: &MemberAccess,
        ctx: &BuilderContext,
    ) -> BuildResult<QueryExpr> {
        let entity = self.graph.table(table).entity.clone();
        let name = access.name.as_str();

        if let Some(element) = access.ty.element().and_then(|e| e.entity_name()) {
            if self.query.schema.association(&entity, name, element).is_some() {
                return Ok(QueryExpr::EntitySet(EntitySetExpr {
                    table,
                    member: name.to_string(),
                    entity: element.to_string(),
                }));
            }
        }
        if let Some(other) = access.ty.entity_name() {
            if let Some(joined) =
                self.register_association(table, name, other, ctx.current_scope)?
            {
                return Ok(QueryExpr::Table(joined));
            }
        }
        if self.query.schema.column_name(&entity, name).is_some() {
            return self.register_column(table, name, ctx.current_scope);
        }
        Err(BuildError::ColumnNotMapped {
            entity,
            member: name.to_string(),
        })
    }

    /// Captured host values become statement parameters named after the
    /// member; nested records and query values stay analyzable.
    fn record_member(
        &mut self,
        record: &Record,
        access: &MemberAccess,
        ctx: &mut BuilderContext,
    ) -> BuildResult<QueryExpr> {
        let value = record
            .get(&access.name)
            .ok_or_else(|| unsupported_member(&record.type_name, &access.name))?;
        match value {
            Value::Table(_) | Value::Query(_) | Value::Record(_) => {
                let constant = QueryExpr::Constant(value.clone());
                self.analyze(&constant, &[], ctx)
            }
            _ => {
                let ty = match &access.ty {
                    ValueType::Object => value.value_type(),
                    ty => ty.clone(),
                };
                let source = QueryExpr::Member(MemberAccess {
                    object: Some(Box::new(QueryExpr::Constant(Value::Record(record.clone())))),
                    owner: None,
                    name: access.name.clone(),
                    ty: ty.clone(),
                });
                Ok(self.register_parameter(&access.name, source, ty))
            }
        }
    }

    /// Narrows a parameter to one of its members; the old one is retired.
    fn parameter_member(&mut self, id: ParamId, access: &MemberAccess) -> QueryExpr {
        let old = self.graph.parameter(id).clone();
        self.graph.parameters[id.0].retired = true;
        let value = QueryExpr::Member(MemberAccess {
            object: Some(Box::new(old.value)),
            owner: None,
            name: access.name.clone(),
            ty: access.ty.clone(),
        });
        let id = self.graph.add_parameter(ExternalParameter {
            alias: access.name.clone(),
            value,
            ty: access.ty.clone(),
            retired: false,
        });
        QueryExpr::InputParameter(id)
    }
}

fn static_member(access: &MemberAccess) -> BuildResult<QueryExpr> {
    match (&access.owner, access.name.as_str()) {
        (Some(ValueType::DateTime), "Now") => Ok(QueryExpr::special(SpecialOp::Now, vec![])),
        (owner, name) => Err(unsupported_member(
            owner.as_ref().map(|o| o.to_string()).unwrap_or_default(),
            name,
        )),
    }
}

/// Members of scalar values: nullable wrappers, dates, date differences and
/// string length.
fn scalar_member(object: QueryExpr, ty: &ValueType, access: &MemberAccess) -> BuildResult<QueryExpr> {
    let name = access.name.as_str();
    if ty.is_nullable() {
        match name {
            "Value" => return Ok(QueryExpr::convert(object, ty.underlying().clone())),
            "HasValue" => return Ok(QueryExpr::special(SpecialOp::IsNotNull, vec![object])),
            _ => {}
        }
    }

    if ty.is_date_time() {
        let op = match name {
            "Year" => SpecialOp::Year,
            "Month" => SpecialOp::Month,
            "Day" => SpecialOp::Day,
            "Hour" => SpecialOp::Hour,
            "Minute" => SpecialOp::Minute,
            "Second" => SpecialOp::Second,
            "Millisecond" => SpecialOp::Millisecond,
            "Date" => SpecialOp::Date,
            _ => return Err(unsupported_member(ty, name)),
        };
        return Ok(QueryExpr::special(op, vec![object]));
    }

    if ty.is_time_span() {
        return time_span_member(object, name);
    }

    if ty.is_string() && name == "Length" {
        return Ok(QueryExpr::special(SpecialOp::StringLength, vec![object]));
    }

    Err(unsupported_member(ty, name))
}

/// Lowers a member of `end - start` to millisecond arithmetic.
fn time_span_member(object: QueryExpr, name: &str) -> BuildResult<QueryExpr> {
    let (end, start) = match &object {
        QueryExpr::Binary(b) if b.op == BinaryOp::Subtract => ((*b.left).clone(), (*b.right).clone()),
        _ => return Err(unsupported_member(ValueType::TimeSpan, name)),
    };
    let milliseconds = QueryExpr::convert(
        QueryExpr::special(SpecialOp::DateDiffInMilliseconds, vec![end, start]),
        ValueType::Double,
    );
    let per = |unit: f64| {
        QueryExpr::binary(
            BinaryOp::Divide,
            milliseconds.clone(),
            QueryExpr::Constant(Value::Float(unit)),
        )
    };
    let part = |total: QueryExpr, modulo: i64| {
        QueryExpr::convert(
            QueryExpr::binary(
                BinaryOp::Modulo,
                QueryExpr::convert(total, ValueType::Int64),
                QueryExpr::Constant(Value::Int(modulo)),
            ),
            ValueType::Int32,
        )
    };

    Ok(match name {
        "TotalMilliseconds" => milliseconds.clone(),
        "TotalSeconds" => per(MS_PER_SECOND),
        "TotalMinutes" => per(MS_PER_MINUTE),
        "TotalHours" => per(MS_PER_HOUR),
        "TotalDays" => per(MS_PER_DAY),
        "Milliseconds" => part(milliseconds.clone(), 1000),
        "Seconds" => part(per(MS_PER_SECOND), 60),
        "Minutes" => part(per(MS_PER_MINUTE), 60),
        "Hours" => part(per(MS_PER_HOUR), 24),
        "Days" => QueryExpr::convert(per(MS_PER_DAY), ValueType::Int32),
        _ => return Err(unsupported_member(ValueType::TimeSpan, name)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_expr::builders::*;
    use super::static_member;

    fn dates() -> (QueryExpr, QueryExpr) {
        (
            QueryExpr::Column(crate::query_expr::ColumnId(0)),
            QueryExpr::Column(crate::query_expr::ColumnId(1)),
        )
    }

    #[test]
    fn test_total_hours_divides_milliseconds() {
        let (end, start) = dates();
        let lowered = time_span_member(
            QueryExpr::binary(BinaryOp::Subtract, end.clone(), start.clone()),
            "TotalHours",
        )
        .unwrap();
        let expected = QueryExpr::binary(
            BinaryOp::Divide,
            QueryExpr::convert(
                QueryExpr::special(SpecialOp::DateDiffInMilliseconds, vec![end, start]),
                ValueType::Double,
            ),
            constant(3_600_000.0),
        );
        assert_eq!(lowered, expected);
    }

    #[test]
    fn test_time_span_needs_a_date_difference() {
        let err = time_span_member(constant(5), "Days").unwrap_err();
        assert!(matches!(err, BuildError::UnsupportedMember { .. }));
    }

    #[test]
    fn test_nullable_members() {
        let ty = ValueType::nullable(ValueType::Int32);
        let value = scalar_member(constant(1), &ty, &access("Value", ValueType::Int32)).unwrap();
        assert_eq!(value, QueryExpr::convert(constant(1), ValueType::Int32));
        let has_value = scalar_member(constant(1), &ty, &access("HasValue", ValueType::Bool)).unwrap();
        assert_eq!(
            has_value,
            QueryExpr::special(SpecialOp::IsNotNull, vec![constant(1)])
        );
    }

    #[test]
    fn test_static_now() {
        let now = MemberAccess {
            object: None,
            owner: Some(ValueType::DateTime),
            name: "Now".into(),
            ty: ValueType::DateTime,
        };
        assert_eq!(
            static_member(&now).unwrap(),
            QueryExpr::special(SpecialOp::Now, vec![])
        );
    }

    fn access(name: &str, ty: ValueType) -> MemberAccess {
        MemberAccess {
            object: None,
            owner: None,
            name: name.into(),
            ty,
        }
    }
}
