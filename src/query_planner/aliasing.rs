//! Final alias assignment for tables and statement parameters.
//!
//! Aliases must be unique across the whole statement. A user-chosen alias
//! (a lambda variable name, a captured member name) is kept the first time
//! it is seen; later duplicates and unnamed entries get a sanitized base name
//! followed by the first free counter.

use std::collections::HashSet;

use super::query_graph::QueryGraph;

const PARAMETER_BASE: &str = "p";

/// Last dotted segment, restricted to identifier characters.
pub fn sanitize(name: &str) -> String {
    let segment = name.rsplit('.').next().unwrap_or(name);
    let cleaned: String = segment
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    match cleaned.chars().next() {
        None => "t".to_string(),
        Some(first) if first.is_ascii_digit() => format!("t{}", cleaned),
        Some(_) => cleaned,
    }
}

fn numbered(base: &str, taken: &HashSet<String>) -> String {
    let base = sanitize(base);
    (1..)
        .map(|n| format!("{}{}", base, n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or(base)
}

/// Assigns table aliases, then parameter aliases, from one pool of names.
pub fn assign_aliases(graph: &mut QueryGraph) {
    let mut taken = HashSet::new();
    assign_table_aliases(graph, &mut taken);
    assign_parameter_aliases(graph, &mut taken);
}

/// A statement over a single table needs no table alias.
fn assign_table_aliases(graph: &mut QueryGraph, taken: &mut HashSet<String>) {
    let tables = graph.registered_tables();
    if let [only] = tables.as_slice() {
        graph.table_mut(*only).alias = None;
        return;
    }

    for id in tables {
        let table = graph.table(id);
        let alias = match &table.alias {
            Some(alias) if !taken.contains(alias) => alias.clone(),
            Some(alias) => numbered(alias, taken),
            None => numbered(table.alias_base(), taken),
        };
        log::trace!("Table {} aliased as {}", table.name, alias);
        taken.insert(alias.clone());
        graph.table_mut(id).alias = Some(alias);
    }
}

/// Only parameters still in use get an alias.
fn assign_parameter_aliases(graph: &mut QueryGraph, taken: &mut HashSet<String>) {
    let active: Vec<_> = graph.active_parameters().map(|(id, _)| id).collect();
    for id in active {
        let current = graph.parameter(id).alias.clone();
        let alias = if current.is_empty() {
            numbered(PARAMETER_BASE, taken)
        } else if taken.contains(&current) {
            numbered(&current, taken)
        } else {
            current
        };
        taken.insert(alias.clone());
        graph.parameters[id.0].alias = alias;
    }
}
