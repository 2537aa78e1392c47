pub mod catalog;
pub mod config;
pub mod entity;
pub mod errors;
pub mod relation;

// Re-export commonly used types
pub use catalog::{CatalogBuilder, RelationCatalog};
pub use config::{CatalogConfig, EntityDefinition, DEFAULT_CONNECTION};
pub use entity::{EntityDescriptor, FieldDescriptor};
pub use errors::CatalogError;
pub use relation::{Direction, RelationDescriptor, ResolvedRelation};
