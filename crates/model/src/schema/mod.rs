//! Declarative model schema
//!
//! An ordered mapping of field name to [`FieldDefinition`]. A schema is built
//! once at model-definition time and shared by every operation on the model.

pub mod coercion;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::validation::ValidationRule;

pub use coercion::{from_db, generic_to_db, to_db};

/// A plain record: field name to JSON value
pub type Record = serde_json::Map<String, Value>;

/// Value transform applied on read (`get`) or write (`set`)
pub type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Closed set of storable field types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Number,
    BigInt,
    Decimal,
    Boolean,
    Date,
    Timestamp,
    Array,
    Object,
    Json,
    Enum,
    Uuid,
    Text,
    Binary,
    Any,
}

impl FieldType {
    /// Whether a record value has an acceptable shape for this type
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::String | FieldType::Text | FieldType::Enum => value.is_string(),
            FieldType::Uuid => value.as_str().map(|s| uuid::Uuid::parse_str(s).is_ok()).unwrap_or(false),
            FieldType::Number => value.is_number(),
            FieldType::BigInt => value.is_i64() || value.as_str().map(|s| s.parse::<i64>().is_ok()).unwrap_or(false),
            FieldType::Decimal => {
                value.is_number() || value.as_str().map(|s| s.trim().parse::<f64>().is_ok()).unwrap_or(false)
            }
            FieldType::Boolean => value.is_boolean(),
            FieldType::Date | FieldType::Timestamp => coercion::parse_date_value(value).is_some(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
            FieldType::Binary => value.is_string() || value.is_array(),
            FieldType::Json | FieldType::Any => true,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Number | FieldType::BigInt | FieldType::Decimal)
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::BigInt => "bigint",
            FieldType::Decimal => "decimal",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::Timestamp => "timestamp",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::Json => "json",
            FieldType::Enum => "enum",
            FieldType::Uuid => "uuid",
            FieldType::Text => "text",
            FieldType::Binary => "binary",
            FieldType::Any => "any",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Default applied to a field absent from a create payload
#[derive(Clone)]
pub enum DefaultValue {
    Value(Value),
    Generator(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl DefaultValue {
    pub fn resolve(&self) -> Value {
        match self {
            DefaultValue::Value(v) => v.clone(),
            DefaultValue::Generator(f) => f(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Value(v) => write!(f, "Value({})", v),
            DefaultValue::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

/// One schema field
#[derive(Clone)]
pub struct FieldDefinition {
    pub field_type: FieldType,
    pub default: Option<DefaultValue>,
    pub validation: Option<ValidationRule>,
    pub get: Option<Transform>,
    pub set: Option<Transform>,
    /// Whether an explicit null may be persisted
    pub nullable: bool,
}

impl FieldDefinition {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            default: None,
            validation: None,
            get: None,
            set: None,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Value(value.into()));
        self
    }

    pub fn default_with<F>(mut self, generator: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::Generator(Arc::new(generator)));
        self
    }

    pub fn validate(mut self, rule: ValidationRule) -> Self {
        self.validation = Some(rule);
        self
    }

    pub fn get<F>(mut self, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.get = Some(Arc::new(transform));
        self
    }

    pub fn set<F>(mut self, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.set = Some(Arc::new(transform));
        self
    }
}

impl fmt::Debug for FieldDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDefinition")
            .field("field_type", &self.field_type)
            .field("default", &self.default)
            .field("validation", &self.validation.is_some())
            .field("nullable", &self.nullable)
            .finish()
    }
}

/// Ordered field map
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<(String, FieldDefinition)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a field, keeping its original position on replace
    pub fn field(mut self, name: impl Into<String>, definition: FieldDefinition) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = definition,
            None => self.fields.push((name, definition)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.get(name).map(|d| d.field_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldDefinition)> {
        self.fields.iter().map(|(n, d)| (n.as_str(), d))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn has_validation(&self) -> bool {
        self.fields.iter().any(|(_, d)| d.validation.is_some())
    }

    /// Whether any field present in `record` carries a store-backed rule
    pub fn has_async_validation_for(&self, record: &Record) -> bool {
        self.fields.iter().any(|(name, d)| {
            record.contains_key(name) && d.validation.as_ref().is_some_and(|rule| rule.has_async_checks())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_keeps_declaration_order() {
        let schema = Schema::new()
            .field("name", FieldDefinition::new(FieldType::String))
            .field("age", FieldDefinition::new(FieldType::Number))
            .field("name", FieldDefinition::new(FieldType::Text));

        let names: Vec<_> = schema.names().collect();
        assert_eq!(names, vec!["name", "age"]);
        assert_eq!(schema.field_type("name"), Some(FieldType::Text));
    }

    #[test]
    fn test_defaults() {
        let field = FieldDefinition::new(FieldType::String).default_value("active");
        assert_eq!(field.default.as_ref().map(|d| d.resolve()), Some(json!("active")));

        let field = FieldDefinition::new(FieldType::Uuid)
            .default_with(|| json!(uuid::Uuid::new_v4().to_string()));
        let generated = field.default.as_ref().map(|d| d.resolve()).unwrap();
        assert!(FieldType::Uuid.accepts(&generated));
    }

    #[test]
    fn test_type_acceptance() {
        assert!(FieldType::Number.accepts(&json!(3)));
        assert!(!FieldType::Number.accepts(&json!("3")));
        assert!(FieldType::Date.accepts(&json!("2024-01-01 00:00:00")));
        assert!(!FieldType::Boolean.accepts(&json!(1)));
        assert!(FieldType::Any.accepts(&json!({"x": 1})));
    }

    #[test]
    fn test_async_validation_follows_payload_fields() {
        let schema = Schema::new()
            .field("name", FieldDefinition::new(FieldType::String).validate(ValidationRule::new().required()))
            .field("email", FieldDefinition::new(FieldType::String).validate(ValidationRule::new().unique()));

        let name_only = json!({"name": "Ada"}).as_object().cloned().unwrap();
        let with_email = json!({"email": "ada@example.com"}).as_object().cloned().unwrap();
        assert!(!schema.has_async_validation_for(&name_only));
        assert!(schema.has_async_validation_for(&with_email));
    }
}
