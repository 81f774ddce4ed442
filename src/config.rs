use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use validator::Validate;

use crate::query_cache::QueryCacheConfig;
use crate::query_planner::QueryContext;
use crate::schema_catalog::SchemaMapper;
use crate::sql_generator::{dialect_by_name, SqlDialect, SqlGenerationError};

/// Errors loading an [`EngineConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read environment variable: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("Invalid value `{value}` for {field}: {source}")]
    Parse {
        field: String,
        value: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Configuration rejected: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectName {
    #[default]
    Generic,
    Postgres,
    Oracle,
}

impl DialectName {
    pub fn dialect(self) -> Result<Arc<dyn SqlDialect>, SqlGenerationError> {
        dialect_by_name(&self.to_string())
    }
}

impl fmt::Display for DialectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DialectName::Generic => "generic",
            DialectName::Postgres => "postgres",
            DialectName::Oracle => "oracle",
        };
        f.write_str(name)
    }
}

impl FromStr for DialectName {
    type Err = SqlGenerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match dialect_by_name(s)?.name() {
            "postgres" => Ok(DialectName::Postgres),
            "oracle" => Ok(DialectName::Oracle),
            _ => Ok(DialectName::Generic),
        }
    }
}

/// Query cache limits
#[derive(Clone, Debug, PartialEq, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,

    #[validate(range(
        min = 1,
        max = 1_000_000,
        message = "Cache max entries must be between 1 and 1000000"
    ))]
    pub max_entries: usize,

    #[validate(range(
        min = 1,
        max = 1_000_000,
        message = "Cache max table readers must be between 1 and 1000000"
    ))]
    pub max_table_readers: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let defaults = QueryCacheConfig::default();
        Self {
            enabled: defaults.enabled,
            max_entries: defaults.max_entries,
            max_table_readers: defaults.max_table_readers,
        }
    }
}

/// Engine-wide translation settings.
#[derive(Clone, Debug, PartialEq, Default, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// SQL dialect statements are rendered in
    pub dialect: DialectName,

    /// Push every non-predicate projection to the server
    pub maximize_server_load: bool,

    /// Bind primitive constants of lambda bodies as statement parameters
    pub parameterize_constants: bool,

    /// Strip trailing blanks from string columns when reading rows
    pub trim_strings: bool,

    #[validate(nested)]
    pub cache: CacheSettings,
}

impl EngineConfig {
    /// Reads `CHAINQL_*` variables; unset ones take the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            dialect: parse_env_var("CHAINQL_DIALECT", "generic")?,
            maximize_server_load: parse_env_var("CHAINQL_MAXIMIZE_SERVER_LOAD", "false")?,
            parameterize_constants: parse_env_var("CHAINQL_PARAMETERIZE_CONSTANTS", "false")?,
            trim_strings: parse_env_var("CHAINQL_TRIM_STRINGS", "false")?,
            cache: CacheSettings {
                enabled: parse_env_var("CHAINQL_QUERY_CACHE_ENABLED", "true")?,
                max_entries: parse_env_var("CHAINQL_QUERY_CACHE_MAX_ENTRIES", "1000")?,
                max_table_readers: parse_env_var("CHAINQL_QUERY_CACHE_MAX_TABLE_READERS", "256")?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            field: "config file".to_string(),
            value: path.display().to_string(),
            source: Box::new(e),
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            field: "config yaml".to_string(),
            value: content.to_string(),
            source: Box::new(e),
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn cache_config(&self) -> QueryCacheConfig {
        QueryCacheConfig {
            enabled: self.cache.enabled,
            max_entries: self.cache.max_entries,
            max_table_readers: self.cache.max_table_readers,
        }
    }

    /// Build flags of this configuration applied to `schema`.
    pub fn query_context(
        &self,
        schema: Arc<dyn SchemaMapper>,
    ) -> Result<QueryContext, SqlGenerationError> {
        Ok(QueryContext::builder(schema, self.dialect.dialect()?)
            .maximize_server_load(self.maximize_server_load)
            .parameterize_constants(self.parameterize_constants)
            .trim_strings(self.trim_strings)
            .build())
    }
}

/// `key` parsed as `T`, or `default` when unset.
fn parse_env_var<T: std::str::FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    value.parse().map_err(|e| ConfigError::Parse {
        field: key.to_string(),
        value,
        source: Box::new(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dialect, DialectName::Generic);
        assert!(!config.maximize_server_load);
        assert!(config.cache.enabled);
        assert_eq!(config.cache.max_entries, 1000);
    }

    #[test]
    fn test_invalid_cache_size() {
        let config = EngineConfig {
            cache: CacheSettings {
                max_entries: 0, // Invalid
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_partial_config() {
        let config = EngineConfig::from_yaml_str(
            "dialect: oracle\nparameterize_constants: true\ncache:\n  max_entries: 10\n",
        )
        .unwrap();
        assert_eq!(config.dialect, DialectName::Oracle);
        assert!(config.parameterize_constants);
        assert_eq!(config.cache.max_entries, 10);
        assert_eq!(config.cache.max_table_readers, 256);
    }

    #[test]
    fn test_yaml_unknown_dialect() {
        assert!(matches!(
            EngineConfig::from_yaml_str("dialect: sybase\n"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "dialect: postgres\ntrim_strings: true").unwrap();
        let config = EngineConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.dialect, DialectName::Postgres);
        assert!(config.trim_strings);
    }

    #[test]
    #[serial]
    fn test_from_env() {
        env::set_var("CHAINQL_DIALECT", "Oracle");
        env::set_var("CHAINQL_QUERY_CACHE_MAX_ENTRIES", "42");
        let config = EngineConfig::from_env();
        env::remove_var("CHAINQL_DIALECT");
        env::remove_var("CHAINQL_QUERY_CACHE_MAX_ENTRIES");

        let config = config.unwrap();
        assert_eq!(config.dialect, DialectName::Oracle);
        assert_eq!(config.cache.max_entries, 42);
        assert_eq!(config.cache_config().max_entries, 42);
    }

    #[test]
    #[serial]
    fn test_from_env_parse_error() {
        env::set_var("CHAINQL_TRIM_STRINGS", "sometimes");
        let result = EngineConfig::from_env();
        env::remove_var("CHAINQL_TRIM_STRINGS");

        match result {
            Err(ConfigError::Parse { field, value, .. }) => {
                assert_eq!(field, "CHAINQL_TRIM_STRINGS");
                assert_eq!(value, "sometimes");
            }
            other => panic!("expected a parse error, got {:?}", other),
        }
    }
}
