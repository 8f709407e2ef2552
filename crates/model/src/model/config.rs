//! Model configuration

use std::time::Duration;

use service_builder::builder;

use crate::error::{ModelError, ModelResult};
use crate::security::validate_identifier;

/// Automatic creation/update timestamps
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Timestamps {
    #[default]
    Disabled,
    /// `createdAt` / `updatedAt`
    Enabled,
    Custom {
        created_at: String,
        updated_at: String,
    },
}

impl Timestamps {
    /// `(created, updated)` column names when enabled
    pub fn fields(&self) -> Option<(&str, &str)> {
        match self {
            Timestamps::Disabled => None,
            Timestamps::Enabled => Some(("createdAt", "updatedAt")),
            Timestamps::Custom { created_at, updated_at } => Some((created_at.as_str(), updated_at.as_str())),
        }
    }

    pub fn created_at(&self) -> Option<&str> {
        self.fields().map(|(created, _)| created)
    }

    pub fn updated_at(&self) -> Option<&str> {
        self.fields().map(|(_, updated)| updated)
    }
}

/// Table-level settings of a model
#[derive(Debug, Clone)]
#[builder]
pub struct ModelConfig {
    /// Backing table
    #[builder(getter)]
    pub table_name: String,

    #[builder(default = "\"id\".to_string()", getter)]
    pub primary_key: String,

    /// Tombstone deletes instead of removing rows
    #[builder(default = "false", getter)]
    pub soft_delete: bool,

    #[builder(default = "\"deletedAt\".to_string()", getter)]
    pub deleted_at_field: String,

    #[builder(default = "Timestamps::Disabled", getter)]
    pub timestamps: Timestamps,

    /// TTL of cached reads
    #[builder(default = "Duration::from_secs(300)", getter)]
    pub cache_ttl: Duration,

    /// Try single-statement upserts before the portable path
    #[builder(default = "true", getter)]
    pub native_upsert: bool,

    /// Bound of the per-model rendered cache key memo
    #[builder(default = "1000", getter)]
    pub signature_cache_capacity: usize,
}

impl ModelConfig {
    /// Configuration with every default and the given table
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            primary_key: "id".to_string(),
            soft_delete: false,
            deleted_at_field: "deletedAt".to_string(),
            timestamps: Timestamps::Disabled,
            cache_ttl: Duration::from_secs(300),
            native_upsert: true,
            signature_cache_capacity: 1000,
        }
    }

    pub fn primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    pub fn soft_delete(mut self, enabled: bool) -> Self {
        self.soft_delete = enabled;
        self
    }

    pub fn deleted_at_field(mut self, field: impl Into<String>) -> Self {
        self.deleted_at_field = field.into();
        self
    }

    pub fn timestamps(mut self, timestamps: Timestamps) -> Self {
        self.timestamps = timestamps;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn native_upsert(mut self, enabled: bool) -> Self {
        self.native_upsert = enabled;
        self
    }

    /// Replace the backing table, trimming surrounding whitespace
    pub fn with_table(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into().trim().to_string();
        self
    }

    /// Check every configured identifier
    pub fn validate(&self) -> ModelResult<()> {
        if self.table_name.trim().is_empty() {
            return Err(ModelError::Configuration("Model table name is missing".to_string()));
        }

        let mut identifiers = vec![
            ("table name", self.table_name.as_str()),
            ("primary key", self.primary_key.as_str()),
        ];
        if self.soft_delete {
            identifiers.push(("deleted-at field", self.deleted_at_field.as_str()));
        }
        if let Some((created, updated)) = self.timestamps.fields() {
            identifiers.push(("created-at field", created));
            identifiers.push(("updated-at field", updated));
        }

        for (what, identifier) in identifiers {
            validate_identifier(identifier).map_err(|e| {
                ModelError::Configuration(format!("Invalid {} '{}': {}", what, identifier, e))
            })?;
        }
        Ok(())
    }
}

impl ModelConfigBuilder {
    pub fn table(self, table_name: impl Into<String>) -> Self {
        self.table_name(table_name.into())
    }

    pub fn with_timestamps(self) -> Self {
        self.timestamps(Timestamps::Enabled)
    }

    pub fn with_soft_delete(self) -> Self {
        self.soft_delete(true)
    }

    /// Build and validate, mapping builder failures to configuration errors
    pub fn build_config(self) -> ModelResult<ModelConfig> {
        let config = self
            .build()
            .map_err(|e| ModelError::Configuration(format!("Invalid model configuration: {:?}", e)))?;
        config.validate()?;
        Ok(config)
    }
}
