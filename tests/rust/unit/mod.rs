//! Unit tests - single-concern checks through the public API
//!
//! Mapping validation, dialect-specific rendering and engine configuration.

mod dialect_rendering_tests;
mod mapping_validation_tests;
