//! Splits a resolved projection between the server and the host.
//!
//! Every maximal subtree the server can evaluate becomes an operand of the
//! scope's select list and is replaced in the host-side reader by a
//! `RowValue` pointing at its position. Whole rows (tables, table tuples)
//! are expanded to their mapped columns first.

use super::Dispatcher;
use crate::query_expr::qualifier::{contains_server_only, is_predicate, tier, Tier};
use crate::query_expr::{MemberBinding, NewExpr, QueryExpr, RowValue, TableId, ValueType};
use crate::query_planner::builder_ctx::BuilderContext;
use crate::query_planner::errors::{BuildError, BuildResult};
use crate::query_planner::typing::type_of;

/// Host-only nodes outside grouping keys. A key is rendered by GROUP BY and
/// never needs the host.
fn needs_host(expr: &QueryExpr) -> bool {
    match expr {
        QueryExpr::Group(group) => needs_host(&group.grouped),
        e if tier(e) == Tier::HostOnly => true,
        e => e.children().into_iter().any(needs_host),
    }
}

impl Dispatcher<'_> {
    /// Sets the select list and the reader of the current scope from
    /// `result`.
    pub fn build_select(&mut self, result: &QueryExpr, ctx: &BuilderContext) -> BuildResult<()> {
        let mut operands = Vec::new();
        let reader = self.split(result, &mut operands, ctx)?;
        log::trace!(
            "Scope {} selects {} operands",
            ctx.current_scope.0,
            operands.len()
        );
        let scope = self.graph.scope_mut(ctx.current_scope);
        scope.operands = operands;
        scope.reader = Some(reader);
        Ok(())
    }

    fn split(
        &mut self,
        expr: &QueryExpr,
        operands: &mut Vec<QueryExpr>,
        ctx: &BuilderContext,
    ) -> BuildResult<QueryExpr> {
        match expr {
            QueryExpr::Table(table) => {
                let row = self.table_row(*table, ctx)?;
                return self.split(&row, operands, ctx);
            }
            QueryExpr::MetaTable(id) => {
                let meta = self.graph.meta_table(*id).clone();
                let row = QueryExpr::New(NewExpr {
                    ty: meta.ty,
                    members: meta
                        .members
                        .into_iter()
                        .map(|(name, value)| MemberBinding { name, value })
                        .collect(),
                });
                return self.split(&row, operands, ctx);
            }
            QueryExpr::Group(_) => {
                return Err(BuildError::DanglingReference("a grouping".to_string()))
            }
            QueryExpr::EntitySet(set) => {
                return Err(BuildError::DanglingReference(format!(
                    "entity set `{}`",
                    set.member
                )))
            }
            _ => {}
        }

        if !needs_host(expr) {
            if (self.maximize_server_load && !is_predicate(expr)) || tier(expr) == Tier::ServerOnly
            {
                return Ok(self.push_operand(expr, operands));
            }
            if !contains_server_only(expr) {
                return Ok(expr.clone());
            }
        } else if tier(expr) == Tier::ServerOnly {
            return Err(BuildError::UnsupportedConstruct(format!(
                "server expression over host values: {:?}",
                expr
            )));
        }
        expr.try_map_children(&mut |child| self.split(child, operands, ctx))
    }

    /// Entity construction from every mapped column of `table`.
    fn table_row(&mut self, table: TableId, ctx: &BuilderContext) -> BuildResult<QueryExpr> {
        let entity = self.graph.table(table).entity.clone();
        let members = self
            .query
            .schema
            .members(&entity)
            .into_iter()
            .map(|member| {
                Ok(MemberBinding {
                    value: self.register_column(table, &member, ctx.current_scope)?,
                    name: member,
                })
            })
            .collect::<BuildResult<Vec<_>>>()?;
        Ok(QueryExpr::New(NewExpr {
            ty: ValueType::Entity(entity),
            members,
        }))
    }

    /// Appends `expr` to the select list unless an equal operand is already
    /// there.
    fn push_operand(&self, expr: &QueryExpr, operands: &mut Vec<QueryExpr>) -> QueryExpr {
        let index = match operands.iter().position(|o| o == expr) {
            Some(index) => index,
            None => {
                operands.push(expr.clone());
                operands.len() - 1
            }
        };
        QueryExpr::RowValue(RowValue {
            index,
            ty: type_of(expr, &self.graph),
        })
    }
}
