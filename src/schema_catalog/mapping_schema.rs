use std::collections::HashMap;

use super::config::AssociationDefinition;
use super::{Association, SchemaMapper};
use crate::query_expr::ValueType;
use crate::query_planner::query_graph::JoinKind;

#[derive(Debug, Clone)]
pub struct ColumnMapping {
    pub member: String,
    pub column: String,
    pub ty: ValueType,
    pub primary_key: bool,
}

#[derive(Debug, Clone)]
pub struct EntityMapping {
    pub table: String,
    pub columns: Vec<ColumnMapping>,
    pub associations: Vec<AssociationDefinition>,
}

impl EntityMapping {
    fn column(&self, member: &str) -> Option<&ColumnMapping> {
        self.columns.iter().find(|c| c.member == member)
    }
}

/// [`SchemaMapper`] backed by a YAML [`super::MappingConfig`].
#[derive(Debug, Clone)]
pub struct MappingSchema {
    name: String,
    entities: HashMap<String, EntityMapping>,
}

impl MappingSchema {
    pub fn new(name: String, entities: HashMap<String, EntityMapping>) -> Self {
        MappingSchema { name, entities }
    }

    pub fn entity(&self, name: &str) -> Option<&EntityMapping> {
        self.entities.get(name)
    }
}

impl SchemaMapper for MappingSchema {
    fn schema_name(&self) -> String {
        self.name.clone()
    }

    fn table_name(&self, entity: &str) -> Option<String> {
        self.entity(entity).map(|e| e.table.clone())
    }

    fn column_name(&self, entity: &str, member: &str) -> Option<String> {
        self.entity(entity)?.column(member).map(|c| c.column.clone())
    }

    fn column_type(&self, entity: &str, member: &str) -> Option<ValueType> {
        self.entity(entity)?.column(member).map(|c| c.ty.clone())
    }

    fn primary_keys(&self, entity: &str) -> Vec<String> {
        self.entity(entity)
            .map(|e| {
                e.columns
                    .iter()
                    .filter(|c| c.primary_key)
                    .map(|c| c.member.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn association(&self, entity: &str, member: &str, other_entity: &str) -> Option<Association> {
        let mapping = self.entity(entity)?;
        let def = mapping
            .associations
            .iter()
            .find(|a| a.member == member && a.other == other_entity)?;

        // a nullable referencing key means the target may be absent
        let nullable_key = def.this_keys.iter().any(|key| {
            mapping
                .column(key)
                .map(|c| c.ty.is_nullable())
                .unwrap_or(false)
        });
        let join_kind = if nullable_key {
            JoinKind::INNER | JoinKind::LEFT_OUTER
        } else {
            JoinKind::INNER
        };

        Some(Association {
            these_keys: def.this_keys.clone(),
            other_keys: def.other_keys.clone(),
            other_entity: def.other.clone(),
            join_kind,
            join_id: def.join_id.clone().unwrap_or_else(|| def.member.clone()),
        })
    }

    fn members(&self, entity: &str) -> Vec<String> {
        self.entity(entity)
            .map(|e| e.columns.iter().map(|c| c.member.clone()).collect())
            .unwrap_or_default()
    }

    fn member_for_column(&self, entity: &str, column: &str) -> Option<String> {
        self.entity(entity)?
            .columns
            .iter()
            .find(|c| c.column.eq_ignore_ascii_case(column))
            .map(|c| c.member.clone())
    }
}
