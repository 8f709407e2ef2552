//! FieldType coercion table
//!
//! One pure function pair per declared type: [`to_db`] on every write and
//! [`from_db`] on every read.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use super::FieldType;
use crate::backends::DatabaseValue;
use crate::dialect::{parse_datetime, SqlDialect};
use crate::error::{ModelError, ModelResult};

/// Serialize a record value for the given field type and dialect
pub fn to_db(field_type: FieldType, value: &Value, dialect: SqlDialect) -> ModelResult<DatabaseValue> {
    if value.is_null() {
        return Ok(DatabaseValue::Null);
    }

    match field_type {
        FieldType::String | FieldType::Text | FieldType::Uuid | FieldType::Enum => Ok(match value {
            Value::String(s) => DatabaseValue::String(s.clone()),
            Value::Array(_) | Value::Object(_) => DatabaseValue::String(value.to_string()),
            other => DatabaseValue::String(scalar_text(other)),
        }),
        FieldType::Number => number_to_db(value),
        FieldType::BigInt => bigint_to_db(value),
        FieldType::Decimal => decimal_to_db(value),
        FieldType::Boolean => {
            let flag = parse_bool(value).ok_or_else(|| mismatch(field_type, value))?;
            Ok(dialect.encode_bool(flag))
        }
        FieldType::Date | FieldType::Timestamp => {
            let dt = parse_date_value(value).ok_or_else(|| mismatch(field_type, value))?;
            Ok(dialect.encode_datetime(&dt))
        }
        FieldType::Array if !value.is_array() => Err(mismatch(field_type, value)),
        FieldType::Object if !value.is_object() => Err(mismatch(field_type, value)),
        FieldType::Array | FieldType::Object | FieldType::Json => Ok(json_to_db(value, dialect)),
        FieldType::Binary => binary_to_db(value).ok_or_else(|| mismatch(field_type, value)),
        FieldType::Any => Ok(generic_to_db(value, dialect)),
    }
}

/// Deserialize a driver value for the given field type
pub fn from_db(field_type: FieldType, value: DatabaseValue) -> Value {
    if value.is_null() {
        return Value::Null;
    }

    match field_type {
        FieldType::String | FieldType::Text | FieldType::Uuid | FieldType::Enum => match value {
            DatabaseValue::String(s) => Value::String(s),
            DatabaseValue::Bytes(b) => Value::String(String::from_utf8_lossy(&b).into_owned()),
            other => match other.to_json() {
                Value::String(s) => Value::String(s),
                json => Value::String(scalar_text(&json)),
            },
        },
        FieldType::Number => match value {
            DatabaseValue::String(s) => parse_number(&s).unwrap_or(Value::String(s)),
            DatabaseValue::Bool(b) => Value::from(i64::from(b)),
            other => other.to_json(),
        },
        FieldType::BigInt => match value {
            DatabaseValue::String(s) => s.parse::<i64>().map(Value::from).unwrap_or(Value::String(s)),
            DatabaseValue::Float64(f) if f.fract() == 0.0 => Value::from(f as i64),
            other => other.to_json(),
        },
        FieldType::Decimal => match value {
            DatabaseValue::String(s) => Value::String(s),
            other => Value::String(scalar_text(&other.to_json())),
        },
        FieldType::Boolean => match value {
            DatabaseValue::Bool(b) => Value::Bool(b),
            other => {
                let json = other.to_json();
                parse_bool(&json).map(Value::Bool).unwrap_or(json)
            }
        },
        FieldType::Date | FieldType::Timestamp => match value {
            DatabaseValue::DateTime(dt) => date_to_json(&dt),
            DatabaseValue::String(s) => parse_datetime(&s).map(|dt| date_to_json(&dt)).unwrap_or(Value::String(s)),
            DatabaseValue::Int64(secs) => DateTime::from_timestamp(secs, 0)
                .map(|dt| date_to_json(&dt))
                .unwrap_or(Value::from(secs)),
            other => other.to_json(),
        },
        FieldType::Array | FieldType::Object | FieldType::Json => match value {
            DatabaseValue::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
            DatabaseValue::Bytes(b) => serde_json::from_slice(&b).unwrap_or_else(|_| DatabaseValue::Bytes(b).to_json()),
            other => other.to_json(),
        },
        FieldType::Binary | FieldType::Any => value.to_json(),
    }
}

/// Serialize a value with no declared type
pub fn generic_to_db(value: &Value, dialect: SqlDialect) -> DatabaseValue {
    match value {
        Value::Bool(b) => dialect.encode_bool(*b),
        Value::Array(_) | Value::Object(_) => json_to_db(value, dialect),
        other => DatabaseValue::from_json(other.clone()),
    }
}

/// Canonical JSON form of a timestamp: RFC 3339, UTC, second precision
pub fn date_to_json(value: &DateTime<Utc>) -> Value {
    Value::String(value.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Interpret a record value as a timestamp: date string or epoch seconds
pub fn parse_date_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_datetime(s),
        Value::Number(n) => n.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0)),
        _ => None,
    }
}

pub(crate) fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Some(true),
            "false" | "f" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn number_to_db(value: &Value) -> ModelResult<DatabaseValue> {
    match value {
        Value::Number(_) => Ok(DatabaseValue::from_json(value.clone())),
        Value::String(s) => parse_number(s)
            .map(DatabaseValue::from_json)
            .ok_or_else(|| mismatch(FieldType::Number, value)),
        Value::Bool(b) => Ok(DatabaseValue::Int64(i64::from(*b))),
        _ => Err(mismatch(FieldType::Number, value)),
    }
}

fn bigint_to_db(value: &Value) -> ModelResult<DatabaseValue> {
    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed
        .map(DatabaseValue::Int64)
        .ok_or_else(|| mismatch(FieldType::BigInt, value))
}

fn decimal_to_db(value: &Value) -> ModelResult<DatabaseValue> {
    match value {
        Value::Number(n) => Ok(DatabaseValue::String(n.to_string())),
        Value::String(s) if s.trim().parse::<f64>().is_ok() => Ok(DatabaseValue::String(s.trim().to_string())),
        _ => Err(mismatch(FieldType::Decimal, value)),
    }
}

fn json_to_db(value: &Value, dialect: SqlDialect) -> DatabaseValue {
    if dialect.supports_json() {
        DatabaseValue::Json(value.clone())
    } else {
        DatabaseValue::String(value.to_string())
    }
}

fn binary_to_db(value: &Value) -> Option<DatabaseValue> {
    match value {
        Value::String(s) => Some(DatabaseValue::Bytes(s.clone().into_bytes())),
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
            .collect::<Option<Vec<u8>>>()
            .map(DatabaseValue::Bytes),
        _ => None,
    }
}

fn parse_number(s: &str) -> Option<Value> {
    let trimmed = s.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(Value::from(i));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn mismatch(field_type: FieldType, value: &Value) -> ModelError {
    ModelError::Serialization(format!("Cannot store {} as {}", value, field_type))
}
