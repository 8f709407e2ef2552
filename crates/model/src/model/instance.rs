//! Hydrated rows

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::schema::Record;

/// Computed field derived from the persisted fields of a record
pub type VirtualFn = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

/// Named virtual field
#[derive(Clone)]
pub struct VirtualField {
    pub name: String,
    pub compute: VirtualFn,
}

impl VirtualField {
    pub fn new<F>(name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            compute: Arc::new(compute),
        }
    }
}

impl fmt::Debug for VirtualField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualField").field("name", &self.name).finish()
    }
}

/// A persisted record plus its computed virtual fields.
///
/// Virtuals are never written back; [`Instance::into_record`] drops them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Instance {
    data: Record,
    virtuals: Record,
}

impl Instance {
    pub fn new(data: Record) -> Self {
        Self {
            data,
            virtuals: Record::new(),
        }
    }

    /// Hydrate `data` and compute `virtuals` from it
    pub fn hydrate(data: Record, virtuals: &[VirtualField]) -> Self {
        let computed = virtuals
            .iter()
            .map(|v| (v.name.clone(), (v.compute)(&data)))
            .collect();
        Self {
            data,
            virtuals: computed,
        }
    }

    /// Persisted value first, then virtual
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field).or_else(|| self.virtuals.get(field))
    }

    pub fn data(&self) -> &Record {
        &self.data
    }

    pub fn virtuals(&self) -> &Record {
        &self.virtuals
    }

    pub fn into_record(self) -> Record {
        self.data
    }

    /// Persisted and virtual fields as one JSON object
    pub fn to_json(&self) -> Value {
        let mut merged = self.data.clone();
        for (name, value) in &self.virtuals {
            merged.entry(name.clone()).or_insert_with(|| value.clone());
        }
        Value::Object(merged)
    }
}

impl Serialize for Instance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_virtuals_are_computed_not_persisted() {
        let full_name = VirtualField::new("fullName", |r: &Record| {
            let first = r.get("first").and_then(Value::as_str).unwrap_or_default();
            let last = r.get("last").and_then(Value::as_str).unwrap_or_default();
            json!(format!("{} {}", first, last))
        });
        let data = json!({"first": "Ada", "last": "Lovelace"}).as_object().cloned().unwrap();
        let instance = Instance::hydrate(data.clone(), &[full_name]);

        assert_eq!(instance.get("fullName"), Some(&json!("Ada Lovelace")));
        assert_eq!(instance.to_json()["fullName"], json!("Ada Lovelace"));
        assert_eq!(serde_json::to_value(&instance).unwrap()["first"], json!("Ada"));
        assert_eq!(instance.into_record(), data);
    }
}
