//! Registration of tables, columns, associations and external parameters.
//!
//! Tables are deduplicated by structural equality (see
//! [`QueryGraph::tables_equal`]) and promoted to the nearest common ancestor
//! scope when a nested scope reaches a table owned by a sibling branch.

use super::Dispatcher;
use crate::query_expr::{BinaryOp, ColumnId, QueryExpr, ScopeId, TableId, ValueType};
use crate::query_planner::errors::{BuildError, BuildResult};
use crate::query_planner::query_graph::{ColumnRef, ExternalParameter, JoinDescriptor, TableRef};

impl Dispatcher<'_> {
    /// New, unregistered table for `entity`.
    pub(super) fn create_table(&mut self, entity: &str) -> BuildResult<TableId> {
        let name = self
            .query
            .schema
            .table_name(entity)
            .ok_or_else(|| BuildError::TableNotMapped(entity.to_string()))?;
        Ok(self.graph.add_table(TableRef::new(entity, &name)))
    }

    /// Registers `table` so that `scope` can see it and returns the table
    /// actually registered, which may be an equal one found earlier.
    pub(super) fn register_table(&mut self, table: TableId, scope: ScopeId) -> BuildResult<TableId> {
        for visible in self.graph.ancestors(scope) {
            if let Some(found) = self.find_equal_table(visible, table) {
                return Ok(found);
            }
        }

        for index in 0..self.graph.scopes.len() {
            let owner = ScopeId(index);
            let Some(found) = self.find_equal_table(owner, table) else {
                continue;
            };
            let target = self.graph.common_ancestor(owner, scope).ok_or_else(|| {
                BuildError::NoCommonScope(self.graph.table(found).name.clone())
            })?;
            if target != owner {
                self.promote_table(found, owner, target);
            }
            return Ok(found);
        }

        self.graph.scope_mut(scope).tables.push(table);
        Ok(table)
    }

    fn find_equal_table(&self, scope: ScopeId, table: TableId) -> Option<TableId> {
        self.graph
            .scope(scope)
            .tables
            .iter()
            .copied()
            .find(|candidate| self.graph.tables_equal(*candidate, table))
    }

    /// Moves `table` and its columns from `from` into `to`.
    fn promote_table(&mut self, table: TableId, from: ScopeId, to: ScopeId) {
        log::debug!(
            "Promoting table {} from scope {} to scope {}",
            self.graph.table(table).name,
            from.0,
            to.0
        );
        let moved: Vec<_> = self
            .graph
            .scope(from)
            .columns
            .iter()
            .copied()
            .filter(|c| self.graph.column(*c).table == table)
            .collect();
        let source = self.graph.scope_mut(from);
        source.tables.retain(|t| *t != table);
        source.columns.retain(|c| !moved.contains(c));
        let target = self.graph.scope_mut(to);
        target.tables.push(table);
        target.columns.extend(moved);
    }

    /// Column reference for `member` of `table`; the table is registered on
    /// the way and columns are deduplicated per table.
    pub(super) fn register_column(
        &mut self,
        table: TableId,
        member: &str,
        scope: ScopeId,
    ) -> BuildResult<QueryExpr> {
        let table = self.register_table(table, scope)?;
        let entity = self.graph.table(table).entity.clone();
        let name = self.query.schema.column_name(&entity, member).ok_or_else(|| {
            BuildError::ColumnNotMapped {
                entity: entity.clone(),
                member: member.to_string(),
            }
        })?;

        if let Some(existing) = self
            .graph
            .columns
            .iter()
            .position(|c| c.table == table && c.name == name)
        {
            return Ok(QueryExpr::Column(ColumnId(existing)));
        }

        let ty = self
            .query
            .schema
            .column_type(&entity, member)
            .unwrap_or(ValueType::Object);
        let id = self.graph.add_column(ColumnRef {
            table,
            name,
            member: member.to_string(),
            ty,
            alias: None,
        });
        let owner = self.graph.scope_of_table(table).unwrap_or(scope);
        self.graph.scope_mut(owner).columns.push(id);
        Ok(QueryExpr::Column(id))
    }

    /// Joins the target of association `member` from `table`. Returns `None`
    /// when the mapper knows no such association.
    pub(super) fn register_association(
        &mut self,
        table: TableId,
        member: &str,
        other_entity: &str,
        scope: ScopeId,
    ) -> BuildResult<Option<TableId>> {
        let entity = self.graph.table(table).entity.clone();
        let Some(association) = self.query.schema.association(&entity, member, other_entity) else {
            return Ok(None);
        };

        let mut candidate = TableRef::new(
            &association.other_entity,
            &self
                .query
                .schema
                .table_name(&association.other_entity)
                .ok_or_else(|| BuildError::TableNotMapped(association.other_entity.clone()))?,
        );
        candidate.join_id = Some(association.join_id.clone());
        candidate.join = Some(JoinDescriptor {
            kind: association.join_kind,
            joined_to: table,
            predicate: QueryExpr::Constant(true.into()),
        });
        let candidate = self.graph.add_table(candidate);
        let registered = self.register_table(candidate, scope)?;
        if registered != candidate {
            log::trace!("Reusing join {} for {}.{}", association.join_id, entity, member);
            return Ok(Some(registered));
        }

        let mut predicate: Option<QueryExpr> = None;
        for (this_key, other_key) in association.these_keys.iter().zip(&association.other_keys) {
            let other_column = self.register_column(candidate, other_key, scope)?;
            let this_column = self.register_column(table, this_key, scope)?;
            let equal = QueryExpr::binary(BinaryOp::Equal, other_column, this_column);
            predicate = Some(match predicate {
                Some(p) => QueryExpr::binary(BinaryOp::AndAlso, p, equal),
                None => equal,
            });
        }
        let predicate = predicate.ok_or_else(|| {
            BuildError::malformed("association", format!("{}.{} has no keys", entity, member))
        })?;
        if let Some(join) = self.graph.table_mut(candidate).join.as_mut() {
            join.predicate = predicate;
        }
        Ok(Some(candidate))
    }

    /// Registers an external parameter. An empty alias is named at
    /// finalization.
    pub(super) fn register_parameter(&mut self, alias: &str, value: QueryExpr, ty: ValueType) -> QueryExpr {
        let id = self.graph.add_parameter(ExternalParameter {
            alias: alias.to_string(),
            value,
            ty,
            retired: false,
        });
        QueryExpr::InputParameter(id)
    }
}
