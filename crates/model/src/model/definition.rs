//! Model descriptor
//!
//! A [`ModelDefinition`] is built once and shared read-only by every handle
//! and operation of the model.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::config::{ModelConfig, Timestamps};
use super::instance::VirtualField;
use super::lifecycle::{Hooks, ModelHooks};
use crate::conditions::{Condition, IntoCondition};
use crate::error::{ModelError, ModelResult};
use crate::migration::IndexDefinition;
use crate::schema::{FieldDefinition, FieldType, Record, Schema};
use crate::security::validate_identifier;
use crate::soft_delete::SoftDeletePolicy;

/// Immutable description of one model
#[derive(Debug, Clone)]
pub struct ModelDefinition {
    name: String,
    config: ModelConfig,
    schema: Schema,
    hooks: Hooks,
    scopes: HashMap<String, Condition>,
    virtuals: Vec<VirtualField>,
    indexes: Vec<IndexDefinition>,
    soft_delete: SoftDeletePolicy,
}

impl ModelDefinition {
    pub fn builder(name: impl Into<String>) -> ModelDefinitionBuilder {
        ModelDefinitionBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn table(&self) -> &str {
        self.config.get_table_name()
    }

    pub fn primary_key(&self) -> &str {
        self.config.get_primary_key()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn scope(&self, name: &str) -> Option<&Condition> {
        self.scopes.get(name)
    }

    pub fn scope_names(&self) -> impl Iterator<Item = &str> {
        self.scopes.keys().map(String::as_str)
    }

    pub fn virtuals(&self) -> &[VirtualField] {
        &self.virtuals
    }

    pub fn indexes(&self) -> &[IndexDefinition] {
        &self.indexes
    }

    pub fn soft_delete(&self) -> &SoftDeletePolicy {
        &self.soft_delete
    }

    pub fn timestamps(&self) -> &Timestamps {
        self.config.get_timestamps()
    }

    /// Declared type of `field`; undeclared fields are [`FieldType::Any`]
    pub fn field_type(&self, field: &str) -> FieldType {
        self.schema.field_type(field).unwrap_or(FieldType::Any)
    }

    /// Apply `get` transforms of the schema to a decoded record
    pub fn apply_get_transforms(&self, record: &mut Record) {
        for (name, definition) in self.schema.iter() {
            let Some(transform) = &definition.get else {
                continue;
            };
            if let Some(value) = record.get_mut(name) {
                *value = transform(std::mem::take(value));
            }
        }
    }

    /// Apply `set` transforms to every payload field that has one
    pub fn apply_set_transforms(&self, record: &mut Record) {
        for (name, definition) in self.schema.iter() {
            let Some(transform) = &definition.set else {
                continue;
            };
            if let Some(value) = record.get_mut(name) {
                *value = transform(std::mem::take(value));
            }
        }
    }

    /// Fill absent fields from their schema defaults
    pub fn apply_defaults(&self, record: &mut Record) {
        for (name, definition) in self.schema.iter() {
            if let Some(default) = &definition.default {
                if !record.contains_key(name) {
                    record.insert(name.to_string(), default.resolve());
                }
            }
        }
    }

    /// Reject explicit nulls on non-nullable fields
    pub fn check_nullability(&self, record: &Record) -> ModelResult<()> {
        for (name, value) in record {
            let nullable = self.schema.get(name).map(|d| d.nullable).unwrap_or(true);
            if !nullable && value.is_null() {
                return Err(ModelError::validation(name, format!("{} cannot be null", name)));
            }
        }
        Ok(())
    }
}

/// Fluent builder for [`ModelDefinition`]
pub struct ModelDefinitionBuilder {
    name: String,
    config: Option<ModelConfig>,
    table: Option<String>,
    schema: Schema,
    hooks: Hooks,
    scopes: Vec<(String, ModelResult<Condition>)>,
    virtuals: Vec<VirtualField>,
    indexes: Vec<IndexDefinition>,
}

impl ModelDefinitionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: None,
            table: None,
            schema: Schema::new(),
            hooks: Hooks::new(),
            scopes: Vec::new(),
            virtuals: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn config(mut self, config: ModelConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Shorthand for a default configuration on `table`
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    pub fn field(mut self, name: impl Into<String>, definition: FieldDefinition) -> Self {
        self.schema = self.schema.field(name, definition);
        self
    }

    pub fn hooks(mut self, hooks: impl ModelHooks + 'static) -> Self {
        self.hooks.register(Arc::new(hooks));
        self
    }

    pub fn scope(mut self, name: impl Into<String>, condition: impl IntoCondition) -> Self {
        self.scopes.push((name.into(), condition.into_condition()));
        self
    }

    pub fn virtual_field<F>(mut self, name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        self.virtuals.push(VirtualField::new(name, compute));
        self
    }

    pub fn index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn build(self) -> ModelResult<ModelDefinition> {
        let config = match (self.config, self.table) {
            (Some(config), Some(table)) => config.with_table(table),
            (Some(config), None) => {
                let table = config.get_table_name().clone();
                config.with_table(table)
            }
            (None, Some(table)) => ModelConfig::new(table.trim()),
            (None, None) => {
                return Err(ModelError::Configuration(format!(
                    "Model '{}' has no table name",
                    self.name
                )))
            }
        };
        config.validate()?;

        let mut schema = self.schema;
        for name in schema.names() {
            validate_identifier(name)
                .map_err(|e| ModelError::Configuration(format!("Invalid field '{}': {}", name, e)))?;
        }
        if let Some((created, updated)) = config.get_timestamps().fields() {
            for field in [created, updated] {
                if !schema.contains(field) {
                    schema = schema.field(field, FieldDefinition::new(FieldType::Timestamp));
                }
            }
        }
        if *config.get_soft_delete() && !schema.contains(config.get_deleted_at_field()) {
            schema = schema.field(config.get_deleted_at_field().clone(), FieldDefinition::new(FieldType::Timestamp));
        }

        for virtual_field in &self.virtuals {
            if schema.contains(&virtual_field.name) {
                return Err(ModelError::Configuration(format!(
                    "Virtual field '{}' collides with a schema field",
                    virtual_field.name
                )));
            }
        }

        let mut scopes = HashMap::new();
        for (name, condition) in self.scopes {
            let condition = condition
                .map_err(|e| ModelError::Configuration(format!("Invalid scope '{}': {}", name, e)))?;
            scopes.insert(name, condition);
        }

        let soft_delete = SoftDeletePolicy::new(*config.get_soft_delete(), config.get_deleted_at_field().clone());
        Ok(ModelDefinition {
            name: self.name,
            config,
            schema,
            hooks: self.hooks,
            scopes,
            virtuals: self.virtuals,
            indexes: self.indexes,
            soft_delete,
        })
    }
}
