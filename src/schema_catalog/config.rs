//! YAML entity mapping configuration.
//!
//! ```yaml
//! name: shop
//! entities:
//!   - name: Order
//!     table: Orders
//!     columns:
//!       - { member: Id, type: Int32, primary_key: true }
//!       - { member: CustomerId, column: customer_id, type: Int32, nullable: true }
//!     associations:
//!       - { member: Customer, other: Customer, this_keys: [CustomerId], other_keys: [Id] }
//! ```

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::errors::SchemaError;
use super::mapping_schema::{ColumnMapping, EntityMapping, MappingSchema};
use crate::query_expr::ValueType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    pub name: String,
    pub entities: Vec<EntityDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    /// Defaults to the entity name
    #[serde(default)]
    pub table: Option<String>,
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub associations: Vec<AssociationDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub member: String,
    /// Defaults to the member name
    #[serde(default)]
    pub column: Option<String>,
    #[serde(rename = "type")]
    pub ty: ValueType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssociationDefinition {
    pub member: String,
    pub other: String,
    pub this_keys: Vec<String>,
    pub other_keys: Vec<String>,
    #[serde(default)]
    pub join_id: Option<String>,
}

impl MappingConfig {
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, SchemaError> {
        let contents = fs::read_to_string(path).map_err(|e| SchemaError::ConfigReadError {
            error: e.to_string(),
        })?;

        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, SchemaError> {
        serde_yaml::from_str(yaml).map_err(|e| SchemaError::ConfigParseError {
            error: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.entities.is_empty() {
            return Err(SchemaError::InvalidConfig {
                message: "Mapping must contain at least one entity".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for entity in &self.entities {
            if !seen.insert(entity.name.as_str()) {
                return Err(SchemaError::InvalidConfig {
                    message: format!("Duplicate entity: {}", entity.name),
                });
            }
        }

        let members: HashMap<&str, HashSet<&str>> = self
            .entities
            .iter()
            .map(|e| {
                (
                    e.name.as_str(),
                    e.columns.iter().map(|c| c.member.as_str()).collect(),
                )
            })
            .collect();

        for entity in &self.entities {
            for assoc in &entity.associations {
                let Some(other_members) = members.get(assoc.other.as_str()) else {
                    return Err(SchemaError::InvalidConfig {
                        message: format!(
                            "Association {}.{} targets unknown entity {}",
                            entity.name, assoc.member, assoc.other
                        ),
                    });
                };
                if assoc.this_keys.is_empty() || assoc.this_keys.len() != assoc.other_keys.len() {
                    return Err(SchemaError::InvalidConfig {
                        message: format!(
                            "Association {}.{} must pair an equal, non-zero number of keys",
                            entity.name, assoc.member
                        ),
                    });
                }
                let own_members = &members[entity.name.as_str()];
                for key in &assoc.this_keys {
                    if !own_members.contains(key.as_str()) {
                        return Err(SchemaError::InvalidConfig {
                            message: format!("Unknown key member {}.{}", entity.name, key),
                        });
                    }
                }
                for key in &assoc.other_keys {
                    if !other_members.contains(key.as_str()) {
                        return Err(SchemaError::InvalidConfig {
                            message: format!("Unknown key member {}.{}", assoc.other, key),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// Validates and builds the lookup structure.
    pub fn to_schema(&self) -> Result<MappingSchema, SchemaError> {
        self.validate()?;

        let entities = self
            .entities
            .iter()
            .map(|entity| {
                let columns = entity
                    .columns
                    .iter()
                    .map(|c| ColumnMapping {
                        member: c.member.clone(),
                        column: c.column.clone().unwrap_or_else(|| c.member.clone()),
                        ty: if c.nullable {
                            ValueType::nullable(c.ty.clone())
                        } else {
                            c.ty.clone()
                        },
                        primary_key: c.primary_key,
                    })
                    .collect();
                (
                    entity.name.clone(),
                    EntityMapping {
                        table: entity.table.clone().unwrap_or_else(|| entity.name.clone()),
                        columns,
                        associations: entity.associations.clone(),
                    },
                )
            })
            .collect();

        log::debug!(
            "Loaded mapping '{}' with {} entities",
            self.name,
            self.entities.len()
        );
        Ok(MappingSchema::new(self.name.clone(), entities))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SHOP: &str = r#"
name: shop
entities:
  - name: Customer
    columns:
      - { member: Id, type: Int32, primary_key: true }
      - { member: Name, type: String }
  - name: Order
    table: Orders
    columns:
      - { member: Id, type: Int32, primary_key: true }
      - { member: CustomerId, column: customer_id, type: Int32 }
    associations:
      - { member: Customer, other: Customer, this_keys: [CustomerId], other_keys: [Id] }
"#;

    #[test]
    fn test_parse_and_build() {
        let config = MappingConfig::from_yaml_str(SHOP).unwrap();
        let schema = config.to_schema().unwrap();
        assert_eq!(schema.entity("Order").unwrap().table, "Orders");
        assert_eq!(
            schema.entity("Order").unwrap().columns[1].column,
            "customer_id"
        );
    }

    #[test]
    fn test_unknown_association_target_rejected() {
        let yaml = SHOP.replace("other: Customer", "other: Client");
        let config = MappingConfig::from_yaml_str(&yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(SchemaError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_key_count_mismatch_rejected() {
        let yaml = SHOP.replace("other_keys: [Id]", "other_keys: [Id, Name]");
        let config = MappingConfig::from_yaml_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SHOP.as_bytes()).unwrap();
        let config = MappingConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.name, "shop");
        assert_eq!(config.entities.len(), 2);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        assert!(matches!(
            MappingConfig::from_yaml_file("/nonexistent/mapping.yaml"),
            Err(SchemaError::ConfigReadError { .. })
        ));
    }
}
