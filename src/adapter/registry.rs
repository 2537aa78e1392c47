use std::collections::HashMap;
use std::sync::Arc;

use super::errors::AdapterError;
use super::Adapter;

/// Connection name -> adapter.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, connection: impl Into<String>, adapter: Arc<dyn Adapter>) -> Self {
        self.register(connection, adapter);
        self
    }

    pub fn register(&mut self, connection: impl Into<String>, adapter: Arc<dyn Adapter>) {
        let connection = connection.into();
        if self.adapters.insert(connection.clone(), adapter).is_some() {
            log::warn!("Replacing adapter registered for connection '{}'", connection);
        }
    }

    pub fn get(&self, connection: &str) -> Result<Arc<dyn Adapter>, AdapterError> {
        self.adapters
            .get(connection)
            .cloned()
            .ok_or_else(|| AdapterError::UnknownConnection(connection.to_string()))
    }

    pub fn connections(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("connections", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}
