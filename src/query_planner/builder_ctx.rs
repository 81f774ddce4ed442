//! Traversal state threaded through the dispatcher.
//!
//! A `BuilderContext` is a small value. Nested traversals (quoted lambdas,
//! nested selects) work on a derived copy so bindings made inside them never
//! reach the parent.

use std::collections::HashMap;

use crate::query_expr::{QueryExpr, ScopeId};

#[derive(Debug, Clone, PartialEq)]
pub struct BuilderContext {
    /// Scope receiving tables, filters and operands
    pub current_scope: ScopeId,
    /// Lambda parameter name to its analyzed value
    pub bindings: HashMap<String, QueryExpr>,
    /// The next construction is a table tuple (SelectMany/Join result)
    pub expect_meta_table_definition: bool,
    /// The operation being analyzed is the last link of the whole chain
    pub is_external_in_chain: bool,
    pub in_lambda_body: bool,
}

impl BuilderContext {
    pub fn new(scope: ScopeId) -> Self {
        BuilderContext {
            current_scope: scope,
            bindings: HashMap::new(),
            expect_meta_table_definition: false,
            is_external_in_chain: false,
            in_lambda_body: false,
        }
    }

    /// Copy for a quoted sub-lambda.
    pub fn new_quote(&self) -> Self {
        self.clone()
    }

    /// Copy targeting a nested scope. Nothing analyzed there is the terminal
    /// link of the outer chain.
    pub fn new_select(&self, scope: ScopeId) -> Self {
        BuilderContext {
            current_scope: scope,
            expect_meta_table_definition: false,
            is_external_in_chain: false,
            ..self.clone()
        }
    }

    /// Copy analyzing a table-tuple producing selector.
    pub fn expecting_meta_table(&self) -> Self {
        BuilderContext {
            expect_meta_table_definition: true,
            ..self.clone()
        }
    }

    pub fn binding(&self, name: &str) -> Option<&QueryExpr> {
        self.bindings.get(name)
    }
}
