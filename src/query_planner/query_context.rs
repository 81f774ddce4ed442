//! Per-build inputs: the schema mapper, the dialect and the build flags.
//!
//! ```ignore
//! let query = QueryContextBuilder::new(schema, dialect)
//!     .maximize_server_load(true)
//!     .parameterize_constants(true)
//!     .build();
//! ```

use std::fmt;
use std::sync::Arc;

use crate::materializer::RowReadingContext;
use crate::schema_catalog::SchemaMapper;
use crate::sql_generator::SqlDialect;

#[derive(Clone)]
pub struct QueryContext {
    pub schema: Arc<dyn SchemaMapper>,
    pub dialect: Arc<dyn SqlDialect>,
    /// Push every non-predicate expression to the server instead of only
    /// what the server must evaluate
    pub maximize_server_load: bool,
    /// Lift primitive constants inside lambda bodies into statement parameters
    pub parameterize_constants: bool,
    pub reading: RowReadingContext,
}

impl fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryContext")
            .field("schema", &self.schema.schema_name())
            .field("dialect", &self.dialect.name())
            .field("maximize_server_load", &self.maximize_server_load)
            .field("parameterize_constants", &self.parameterize_constants)
            .field("reading", &self.reading)
            .finish()
    }
}

impl QueryContext {
    pub fn new(schema: Arc<dyn SchemaMapper>, dialect: Arc<dyn SqlDialect>) -> Self {
        QueryContextBuilder::new(schema, dialect).build()
    }

    pub fn builder(
        schema: Arc<dyn SchemaMapper>,
        dialect: Arc<dyn SqlDialect>,
    ) -> QueryContextBuilder {
        QueryContextBuilder::new(schema, dialect)
    }
}

pub struct QueryContextBuilder {
    // Required
    schema: Arc<dyn SchemaMapper>,
    dialect: Arc<dyn SqlDialect>,

    // Optional with defaults
    maximize_server_load: bool,
    parameterize_constants: bool,
    trim_strings: bool,
}

impl QueryContextBuilder {
    pub fn new(schema: Arc<dyn SchemaMapper>, dialect: Arc<dyn SqlDialect>) -> Self {
        QueryContextBuilder {
            schema,
            dialect,
            maximize_server_load: false,
            parameterize_constants: false,
            trim_strings: false,
        }
    }

    pub fn maximize_server_load(mut self, value: bool) -> Self {
        self.maximize_server_load = value;
        self
    }

    pub fn parameterize_constants(mut self, value: bool) -> Self {
        self.parameterize_constants = value;
        self
    }

    pub fn trim_strings(mut self, value: bool) -> Self {
        self.trim_strings = value;
        self
    }

    pub fn build(self) -> QueryContext {
        QueryContext {
            schema: self.schema,
            dialect: self.dialect,
            maximize_server_load: self.maximize_server_load,
            parameterize_constants: self.parameterize_constants,
            reading: RowReadingContext {
                trim_strings: self.trim_strings,
            },
        }
    }
}
