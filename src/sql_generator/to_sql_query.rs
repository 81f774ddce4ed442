//! Clause assembly for a finished select-scope graph.

use super::errors::SqlResult;
use super::to_sql::SqlRenderer;
use crate::query_expr::{QueryExpr, ScopeId, TableId};
use crate::query_planner::query_graph::{JoinKind, QueryGraph};

/// Orders tables so every joined table sits below its join parent. A joined
/// table climbs from the end until it meets its parent or a non-joined
/// table.
pub fn sort_tables(graph: &QueryGraph, tables: &[TableId]) -> Vec<TableId> {
    let mut sorted: Vec<TableId> = Vec::with_capacity(tables.len());
    for &table in tables {
        let mut position = sorted.len();
        if let Some(join) = &graph.table(table).join {
            while position > 0 {
                let previous = sorted[position - 1];
                if graph.table(previous).join.is_none() || previous == join.joined_to {
                    break;
                }
                position -= 1;
            }
        }
        sorted.insert(position, table);
    }
    sorted
}

fn has_group(expr: &QueryExpr) -> bool {
    expr.any(&|e| match e {
        QueryExpr::Group(_) => true,
        QueryExpr::Special(s) => s.op.is_aggregate(),
        _ => false,
    })
}

fn push_clause(parts: &mut Vec<String>, keyword: &str, items: &[String], joiner: &str) {
    if !items.is_empty() {
        parts.push(format!("{} {}", keyword, items.join(joiner)));
    }
}

impl<'a> SqlRenderer<'a> {
    /// Renders `scope` followed by any set-operation siblings.
    pub fn scope_chain(&self, scope: ScopeId) -> SqlResult<String> {
        let mut sql = self.scope(scope)?;
        let mut current = scope;
        while let Some((op, next)) = self.graph.scope(current).next {
            let sep = self.dialect.statement_separator();
            sql = format!(
                "{}{}{}{}{}",
                sql,
                sep,
                self.dialect.set_operator(op),
                sep,
                self.scope(next)?
            );
            current = next;
        }
        Ok(sql)
    }

    fn table_declaration(&self, table: TableId) -> SqlResult<String> {
        let t = self.graph.table(table);
        let name = match t.source {
            Some(source) => format!("({})", self.scope_chain(source)?),
            None => t.name.clone(),
        };
        Ok(match &t.alias {
            Some(alias) => self.dialect.table_alias(&name, alias),
            None => name,
        })
    }

    /// One scope, without its set-operation siblings.
    fn scope(&self, scope_id: ScopeId) -> SqlResult<String> {
        let scope = self.graph.scope(scope_id);
        let derived = self
            .graph
            .tables
            .iter()
            .any(|t| t.source == Some(scope_id));

        // SELECT
        let mut select_items = Vec::with_capacity(scope.operands.len());
        for (i, operand) in scope.operands.iter().enumerate() {
            let rendered = self.expression(operand)?;
            select_items.push(if derived {
                format!("{} AS c{}", rendered, i)
            } else {
                rendered
            });
        }
        let select_list = if select_items.is_empty() {
            "*".to_string()
        } else {
            select_items.join(", ")
        };

        // FROM / JOIN
        let sorted = sort_tables(self.graph, &scope.tables);
        let any_outer = sorted.iter().any(|t| {
            self.graph
                .table(*t)
                .effective_join_kind()
                .is_some_and(|kind| kind != JoinKind::INNER)
        });
        let mut from_items = Vec::new();
        let mut joins = Vec::new();
        let mut where_items = Vec::new();
        for (i, &table) in sorted.iter().enumerate() {
            let t = self.graph.table(table);
            let declaration = self.table_declaration(table)?;
            let join = t.join.as_ref();
            let parent_in_scope = join.is_some_and(|j| sorted[..i].contains(&j.joined_to));
            if i == 0 {
                from_items.push(declaration);
                if let Some(join) = join {
                    where_items.push(format!("({})", self.expression(&join.predicate)?));
                }
            } else if let (Some(join), true) = (join, parent_in_scope) {
                let kind = t.effective_join_kind().unwrap_or(join.kind);
                joins.push(format!(
                    "{} {} ON {}",
                    self.dialect.join_keyword(kind),
                    declaration,
                    self.expression(&join.predicate)?
                ));
            } else {
                if any_outer || !joins.is_empty() {
                    joins.push(format!("CROSS JOIN {}", declaration));
                } else {
                    from_items.push(declaration);
                }
                if let Some(join) = join {
                    where_items.push(format!("({})", self.expression(&join.predicate)?));
                }
            }
        }

        // WHERE / HAVING
        let mut having_items = Vec::new();
        for filter in &scope.filters {
            let rendered = format!("({})", self.expression(filter)?);
            if has_group(filter) {
                having_items.push(rendered);
            } else {
                where_items.push(rendered);
            }
        }

        // GROUP BY
        let mut group_items: Vec<String> = Vec::new();
        for group in &scope.group {
            let keys: Vec<&QueryExpr> = if group.grouped == group.key {
                // distinct: group by the whole select list
                scope.operands.iter().collect()
            } else {
                match group.key.as_ref() {
                    QueryExpr::New(n) => n.members.iter().map(|m| &m.value).collect(),
                    key => vec![key],
                }
            };
            for key in keys {
                let rendered = self.expression(key)?;
                if !group_items.contains(&rendered) {
                    group_items.push(rendered);
                }
            }
        }

        // ORDER BY
        let mut order_items = Vec::new();
        for item in &scope.order_by {
            let keys: Vec<&QueryExpr> = match &item.expression {
                QueryExpr::New(n) => n.members.iter().map(|m| &m.value).collect(),
                key => vec![key],
            };
            for key in keys {
                let rendered = self.expression(key)?;
                order_items.push(if item.descending {
                    format!("{} DESC", rendered)
                } else {
                    rendered
                });
            }
        }

        let mut parts = vec![format!("SELECT {}", select_list)];
        if from_items.is_empty() {
            if let Some(dual) = self.dialect.dual_table() {
                parts.push(format!("FROM {}", dual));
            }
        } else {
            parts.push(format!("FROM {}", from_items.join(", ")));
        }
        parts.extend(joins);
        push_clause(&mut parts, "WHERE", &where_items, " AND ");
        push_clause(&mut parts, "GROUP BY", &group_items, ", ");
        push_clause(&mut parts, "HAVING", &having_items, " AND ");
        push_clause(&mut parts, "ORDER BY", &order_items, ", ");
        let sql = parts.join(self.dialect.statement_separator());

        let limit = scope.limit.as_ref().map(|l| self.expression(l)).transpose()?;
        let offset = scope.offset.as_ref().map(|o| self.expression(o)).transpose()?;
        let offset_and_limit = scope
            .offset_and_limit
            .as_ref()
            .map(|ol| self.expression(ol))
            .transpose()?;
        Ok(self.dialect.limit_clause(
            sql,
            limit.as_deref(),
            offset.as_deref(),
            offset_and_limit.as_deref(),
        ))
    }
}
