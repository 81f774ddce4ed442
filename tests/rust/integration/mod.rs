//! Integration tests - full translations through the public API
//!
//! These tests build queries against a YAML mapping and check the rendered
//! statement, the parameter descriptors and the compiled materializer.

mod cache_tests;
mod direct_statement_tests;
mod fixtures;
mod translation_tests;
