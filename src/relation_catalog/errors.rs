//! # Relation Catalog Error Types
//!
//! Errors raised while registering entities/relations and while resolving a
//! join edge against the closed catalog.
//!
//! ## Error Categories
//!
//! - **Registration Errors**: duplicate or dangling entity/relation definitions
//! - **Resolution Errors**: a requested relation that matches nothing, or more than one thing
//! - **Configuration Errors**: file I/O and YAML parsing while loading a catalog

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CatalogError {
    #[error("Entity `{entity}` is registered more than once")]
    DuplicateEntity { entity: String },
    #[error("No entity named `{entity}` in the relation catalog")]
    UnknownEntity { entity: String },
    #[error("Entity `{entity}` has no field `{field}`")]
    UnknownField { entity: String, field: String },
    #[error("Entity `{entity}` declares no primary key")]
    MissingPrimaryKey { entity: String },
    #[error("Relation name `{relation_name}` is declared twice on `{owner}`")]
    DuplicateRelationName { owner: String, relation_name: String },
    #[error("Related name `{related_name}` is declared twice on `{target}`")]
    DuplicateRelatedName { target: String, related_name: String },
    #[error("No relation `{name}` found on `{model}`")]
    RelationNotFound { model: String, name: String },
    #[error("Relation `{name}` on `{model}` is ambiguous: {candidates} candidates match")]
    AmbiguousRelation {
        model: String,
        name: String,
        candidates: usize,
    },
    #[error("Relation `{name}` on `{model}` leads to `{expected}`, but the joined node targets `{found}`")]
    RelationModelMismatch {
        model: String,
        name: String,
        expected: String,
        found: String,
    },
    #[error("Failed to read catalog file: {error}")]
    ConfigReadError { error: String },
    #[error("Failed to parse catalog: {error}")]
    ConfigParseError { error: String },
}

impl CatalogError {
    /// True for errors that come from resolving a join edge (as opposed to
    /// building the catalog).
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            CatalogError::RelationNotFound { .. }
                | CatalogError::AmbiguousRelation { .. }
                | CatalogError::RelationModelMismatch { .. }
        )
    }
}
