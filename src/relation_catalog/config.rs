//! Relation catalog definitions loaded from YAML.
//!
//! ```yaml
//! entities:
//!   - name: Company
//!     connection: default      # optional, defaults to "default"
//!     primary_key: [id]
//!     fields:
//!       - { name: id, auto_generated: true }
//!       - { name: name }
//! relations:
//!   - owner: User
//!     owner_field: company_id
//!     target: Company
//!     target_field: id
//!     relation_name: company
//!     related_name: users
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::catalog::{CatalogBuilder, RelationCatalog};
use super::entity::{EntityDescriptor, FieldDescriptor};
use super::errors::CatalogError;
use super::relation::RelationDescriptor;

pub const DEFAULT_CONNECTION: &str = "default";

fn default_connection() -> String {
    DEFAULT_CONNECTION.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    #[serde(default = "default_connection")]
    pub connection: String,
    pub primary_key: Vec<String>,
    pub fields: Vec<FieldDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub entities: Vec<EntityDefinition>,
    #[serde(default)]
    pub relations: Vec<RelationDescriptor>,
}

impl CatalogConfig {
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CatalogError::ConfigReadError {
                error: format!("{}: {}", path.as_ref().display(), e),
            }
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, CatalogError> {
        serde_yaml::from_str(yaml).map_err(|e| CatalogError::ConfigParseError {
            error: e.to_string(),
        })
    }

    pub fn into_builder(self) -> CatalogBuilder {
        let mut builder = CatalogBuilder::new();
        for def in self.entities {
            let mut entity = EntityDescriptor::new(def.name, def.connection)
                .primary_key(def.primary_key);
            entity.fields = def.fields;
            builder.add_entity(entity);
        }
        for relation in self.relations {
            builder.add_relation(relation);
        }
        builder
    }

    pub fn to_catalog(&self) -> Result<RelationCatalog, CatalogError> {
        self.clone().into_builder().build()
    }
}
