//! Model Registry - named model handles shared across an application

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::{Model, ModelDefinition};
use crate::backends::DatabaseAdapter;
use crate::error::{ModelError, ModelResult};

/// Thread-safe map of model name to handle
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Arc<DashMap<String, Model>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle under its model name, replacing any previous one
    pub fn register(&self, model: Model) -> Option<Model> {
        debug!("Registering model '{}' on table '{}'", model.name(), model.table());
        self.models.insert(model.name().to_string(), model)
    }

    /// Build a handle from a definition and register it
    pub fn define(&self, definition: ModelDefinition, adapter: Arc<dyn DatabaseAdapter>) -> Model {
        let model = Model::new(definition, adapter);
        self.register(model.clone());
        model
    }

    pub fn get(&self, name: &str) -> ModelResult<Model> {
        self.models
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ModelError::Configuration(format!("Model '{}' is not registered", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn remove(&self, name: &str) -> Option<Model> {
        self.models.remove(name).map(|(_, model)| model)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqlDialect;
    use crate::test_support::MockAdapter;

    fn definition(name: &str, table: &str) -> ModelDefinition {
        ModelDefinition::builder(name).table(table).build().unwrap()
    }

    #[test]
    fn test_register_replaces_by_name() {
        let registry = ModelRegistry::new();
        let adapter: Arc<dyn DatabaseAdapter> = Arc::new(MockAdapter::new(SqlDialect::SQLite));

        assert!(registry.register(Model::new(definition("User", "users"), adapter.clone())).is_none());
        registry.define(definition("Post", "posts"), adapter.clone());
        let previous = registry.register(Model::new(definition("User", "people"), adapter));

        assert_eq!(previous.map(|m| m.table().to_string()), Some("users".to_string()));
        assert_eq!(registry.get("User").unwrap().table(), "people");
        assert_eq!(registry.names(), vec!["Post".to_string(), "User".to_string()]);
    }

    #[test]
    fn test_unknown_model_is_a_configuration_error() {
        let registry = ModelRegistry::new();
        assert!(matches!(registry.get("Ghost"), Err(ModelError::Configuration(_))));
        assert!(registry.remove("Ghost").is_none());
        assert!(registry.is_empty());
    }
}
