//! Arena holding every select scope, table, column, external parameter and
//! table tuple produced while analyzing one query.
//!
//! Expression nodes point into the arena by index ([`TableId`], [`ScopeId`],
//! ...). Scopes keep a parent index; ownership stays with the arena so there
//! are no reference cycles.

use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::query_expr::{
    ColumnId, GroupExpr, MetaTableId, ParamId, QueryExpr, ScopeId, TableId, ValueType,
};

/// Bit set of join kinds. `INNER` is the empty set; `FULL_OUTER` is both
/// outer bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct JoinKind(u8);

impl JoinKind {
    pub const INNER: JoinKind = JoinKind(0);
    pub const LEFT_OUTER: JoinKind = JoinKind(1);
    pub const RIGHT_OUTER: JoinKind = JoinKind(2);
    pub const FULL_OUTER: JoinKind = JoinKind(3);

    pub fn contains(self, other: JoinKind) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_inner(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for JoinKind {
    type Output = JoinKind;

    fn bitor(self, rhs: JoinKind) -> JoinKind {
        JoinKind(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinDescriptor {
    pub kind: JoinKind,
    /// The table this one joins against
    pub joined_to: TableId,
    /// Joined table's keys on the left, referencing table's keys on the right
    pub predicate: QueryExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub entity: String,
    /// Resolved table name
    pub name: String,
    pub alias: Option<String>,
    /// Join identifier; seeds the alias and participates in equality
    pub join_id: Option<String>,
    pub join: Option<JoinDescriptor>,
    /// Set by `DefaultIfEmpty`
    pub outer_join: bool,
    /// Derived table: the scope rendered in place of a table name
    pub source: Option<ScopeId>,
}

impl TableRef {
    pub fn new(entity: &str, name: &str) -> Self {
        TableRef {
            entity: entity.to_string(),
            name: name.to_string(),
            alias: None,
            join_id: None,
            join: None,
            outer_join: false,
            source: None,
        }
    }

    /// Join kind including the outer-join flag; `None` when not joined and
    /// not flagged.
    pub fn effective_join_kind(&self) -> Option<JoinKind> {
        match (&self.join, self.outer_join) {
            (Some(join), outer) if outer => Some(join.kind | JoinKind::LEFT_OUTER),
            (Some(join), _) => Some(join.kind),
            (None, true) => Some(JoinKind::LEFT_OUTER),
            (None, false) => None,
        }
    }

    pub fn alias_base(&self) -> &str {
        self.join_id.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub table: TableId,
    pub name: String,
    pub member: String,
    pub ty: ValueType,
    pub alias: Option<String>,
}

/// A host value lifted out of the expression tree and bound as a statement
/// parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalParameter {
    pub alias: String,
    /// Host expression producing the value at execution time
    pub value: QueryExpr,
    pub ty: ValueType,
    /// Replaced by a more specific parameter (member path)
    pub retired: bool,
}

/// Tuple of tables produced by `SelectMany`/`Join` result selectors.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaTable {
    pub ty: ValueType,
    pub members: Vec<(String, QueryExpr)>,
}

impl MetaTable {
    pub fn member(&self, name: &str) -> Option<&QueryExpr> {
        self.members.iter().find(|(n, _)| n == name).map(|(_, e)| e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetOperator {
    Union,
    UnionAll,
    Intersect,
    Except,
}

/// How the execution layer consumes the rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecuteMethod {
    First,
    FirstOrDefault,
    Single,
    SingleOrDefault,
    Last,
    LastOrDefault,
}

impl fmt::Display for ExecuteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub descending: bool,
    pub expression: QueryExpr,
}

/// One (sub)query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectScope {
    pub parent: Option<ScopeId>,
    pub tables: Vec<TableId>,
    pub columns: Vec<ColumnId>,
    /// Server-side result list
    pub operands: Vec<QueryExpr>,
    pub filters: Vec<QueryExpr>,
    pub group: Vec<GroupExpr>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<QueryExpr>,
    pub offset: Option<QueryExpr>,
    pub offset_and_limit: Option<QueryExpr>,
    pub next: Option<(SetOperator, ScopeId)>,
    pub execute_method: Option<ExecuteMethod>,
    /// Host-side row materialization expression over `RowValue` leaves
    pub reader: Option<QueryExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryGraph {
    pub scopes: Vec<SelectScope>,
    pub tables: Vec<TableRef>,
    pub columns: Vec<ColumnRef>,
    pub parameters: Vec<ExternalParameter>,
    pub meta_tables: Vec<MetaTable>,
}

impl Default for QueryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryGraph {
    /// Graph with an empty root scope.
    pub fn new() -> Self {
        QueryGraph {
            scopes: vec![SelectScope::default()],
            tables: Vec::new(),
            columns: Vec::new(),
            parameters: Vec::new(),
            meta_tables: Vec::new(),
        }
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn add_scope(&mut self, parent: Option<ScopeId>) -> ScopeId {
        self.scopes.push(SelectScope {
            parent,
            ..Default::default()
        });
        ScopeId(self.scopes.len() - 1)
    }

    pub fn scope(&self, id: ScopeId) -> &SelectScope {
        &self.scopes[id.0]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut SelectScope {
        &mut self.scopes[id.0]
    }

    pub fn add_table(&mut self, table: TableRef) -> TableId {
        self.tables.push(table);
        TableId(self.tables.len() - 1)
    }

    pub fn table(&self, id: TableId) -> &TableRef {
        &self.tables[id.0]
    }

    pub fn table_mut(&mut self, id: TableId) -> &mut TableRef {
        &mut self.tables[id.0]
    }

    pub fn add_column(&mut self, column: ColumnRef) -> ColumnId {
        self.columns.push(column);
        ColumnId(self.columns.len() - 1)
    }

    pub fn column(&self, id: ColumnId) -> &ColumnRef {
        &self.columns[id.0]
    }

    pub fn add_parameter(&mut self, parameter: ExternalParameter) -> ParamId {
        self.parameters.push(parameter);
        ParamId(self.parameters.len() - 1)
    }

    pub fn parameter(&self, id: ParamId) -> &ExternalParameter {
        &self.parameters[id.0]
    }

    pub fn add_meta_table(&mut self, meta: MetaTable) -> MetaTableId {
        self.meta_tables.push(meta);
        MetaTableId(self.meta_tables.len() - 1)
    }

    pub fn meta_table(&self, id: MetaTableId) -> &MetaTable {
        &self.meta_tables[id.0]
    }

    /// `scope` followed by its ancestors up to the root of its tree.
    pub fn ancestors(&self, scope: ScopeId) -> Vec<ScopeId> {
        let mut chain = vec![scope];
        let mut current = scope;
        while let Some(parent) = self.scope(current).parent {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// Nearest scope that is an ancestor-or-self of both.
    pub fn common_ancestor(&self, a: ScopeId, b: ScopeId) -> Option<ScopeId> {
        let a_chain = self.ancestors(a);
        self.ancestors(b)
            .into_iter()
            .find(|candidate| a_chain.contains(candidate))
    }

    /// The scope a table is currently registered in.
    pub fn scope_of_table(&self, table: TableId) -> Option<ScopeId> {
        self.scopes
            .iter()
            .position(|s| s.tables.contains(&table))
            .map(ScopeId)
    }

    /// Structural equality: joined tables are equal when they denote the same
    /// table reached through the same join from equal tables. Unjoined tables
    /// are only equal to themselves.
    pub fn tables_equal(&self, a: TableId, b: TableId) -> bool {
        if a == b {
            return true;
        }
        let (ta, tb) = (self.table(a), self.table(b));
        match (&ta.join, &tb.join) {
            (Some(ja), Some(jb)) => {
                ta.name == tb.name
                    && ta.join_id == tb.join_id
                    && ta.source == tb.source
                    && self.tables_equal(ja.joined_to, jb.joined_to)
            }
            _ => false,
        }
    }

    /// Last scope of a `next` chain starting at `scope`.
    pub fn last_in_chain(&self, scope: ScopeId) -> ScopeId {
        let mut current = scope;
        while let Some((_, next)) = self.scope(current).next {
            current = next;
        }
        current
    }

    pub fn active_parameters(&self) -> impl Iterator<Item = (ParamId, &ExternalParameter)> {
        self.parameters
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.retired)
            .map(|(i, p)| (ParamId(i), p))
    }

    /// Tables registered in any scope.
    pub fn registered_tables(&self) -> Vec<TableId> {
        self.scopes
            .iter()
            .flat_map(|s| s.tables.iter().copied())
            .collect()
    }
}
