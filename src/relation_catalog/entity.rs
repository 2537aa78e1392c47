use serde::{Deserialize, Serialize};

/// One stored field of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(default)]
    pub nullable: bool,
    /// A default is computed by the storage side (or the model layer) when omitted.
    #[serde(default)]
    pub has_default: bool,
    /// Generated by the storage on insert (e.g. autoincrement ids).
    #[serde(default)]
    pub auto_generated: bool,
    #[serde(default)]
    pub unique: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nullable: false,
            has_default: false,
            auto_generated: false,
            unique: false,
        }
    }

    pub fn auto_generated(mut self) -> Self {
        self.auto_generated = true;
        self.unique = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }
}

/// Resolved description of a stored entity type.
///
/// Built once during catalog registration and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub name: String,
    /// Name of the adapter connection this entity is stored on.
    pub connection: String,
    pub fields: Vec<FieldDescriptor>,
    pub primary_key: Vec<String>,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>, connection: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection: connection.into(),
            fields: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn primary_key<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.get_field(name).is_some()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Fields whose value is produced by the storage on insert.
    pub fn generated_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.auto_generated)
    }

    /// The single-column primary key, if the key is not composite.
    pub fn single_primary_key(&self) -> Option<&str> {
        match self.primary_key.as_slice() {
            [pk] => Some(pk.as_str()),
            _ => None,
        }
    }
}
