//! Declarative validation rules
//!
//! A [`ValidationRule`] is a bag of independent checks built fluently:
//!
//! ```
//! use elif_model::validation::{Format, ValidationRule};
//!
//! let rule = ValidationRule::new().required().format(Format::Email).max_length(255).unique();
//! assert!(rule.has_async_checks());
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use regex::Regex;
use serde_json::Value;

use super::formats::Format;
use crate::conditions::Condition;
use crate::error::ModelError;
use crate::schema::Record;

/// Predicate over the whole candidate record
pub type RecordPredicate = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// Synchronous caller check: `Err(message)` fails the field
pub type CustomCheck = Arc<dyn Fn(&Value, &Record) -> Result<(), String> + Send + Sync>;

/// Asynchronous caller check: resolves to `Err(message)` to fail the field
pub type AsyncCustomCheck =
    Arc<dyn Fn(Value, Record, AsyncRuleContext) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// Context handed to async custom checks
#[derive(Clone)]
pub struct AsyncRuleContext {
    pub field_name: String,
    pub instance_id: Option<Value>,
    pub model: Option<crate::model::Model>,
}

/// Comparison operators for cross-field and cross-table checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Gt,
    Lt,
    Gte,
    Lte,
}

impl CompareOp {
    pub fn holds(&self, ordering: std::cmp::Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering.is_eq(),
            CompareOp::Gt => ordering.is_gt(),
            CompareOp::Lt => ordering.is_lt(),
            CompareOp::Gte => ordering.is_ge(),
            CompareOp::Lte => ordering.is_le(),
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Gte => ">=",
            CompareOp::Lte => "<=",
        }
    }
}

impl FromStr for CompareOp {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "=" | "==" | "eq" => Ok(CompareOp::Eq),
            ">" | "gt" => Ok(CompareOp::Gt),
            "<" | "lt" => Ok(CompareOp::Lt),
            ">=" | "gte" => Ok(CompareOp::Gte),
            "<=" | "lte" => Ok(CompareOp::Lte),
            other => Err(ModelError::Configuration(format!("Unknown comparison operator '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumericRule {
    pub integer: bool,
    pub positive: bool,
    pub negative: bool,
    pub multiple_of: Option<f64>,
    /// Maximum number of decimal places
    pub precision: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringRule {
    pub trim: bool,
    pub lowercase: bool,
    pub uppercase: bool,
    pub starts_with: Option<String>,
    pub ends_with: Option<String>,
    pub contains: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateRule {
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub past: bool,
    pub future: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordStrength {
    pub min_length: usize,
    pub uppercase: bool,
    pub lowercase: bool,
    pub digit: bool,
    pub symbol: bool,
}

impl Default for PasswordStrength {
    fn default() -> Self {
        Self {
            min_length: 8,
            uppercase: true,
            lowercase: true,
            digit: true,
            symbol: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ArrayRule {
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    pub unique_items: bool,
    pub each: Option<Box<ValidationRule>>,
}

/// Uniqueness within the model's own table
#[derive(Debug, Clone, Default)]
pub struct UniqueRule {
    /// Extra condition narrowing the rows considered
    pub scope: Option<Condition>,
}

/// Existence of the value in a (possibly different) table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistsRule {
    /// Defaults to the model's own table
    pub table: Option<String>,
    /// Defaults to the field name
    pub column: Option<String>,
}

/// Compare against a value resolved from the record or a live query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareValueRule {
    pub operator: CompareOp,
    pub target_field: String,
    /// Table holding the target; `None` means the model's own table
    pub table: Option<String>,
    /// Candidate field whose value identifies the target row
    pub reference_field: Option<String>,
    /// Column matched against the reference value; defaults to the primary key
    pub key_column: Option<String>,
}

/// Composite of independent validation checks for one field
#[derive(Clone, Default)]
pub struct ValidationRule {
    pub required: bool,
    pub required_when: Option<RecordPredicate>,
    pub when: Option<RecordPredicate>,
    pub groups: Vec<String>,
    pub format: Option<Format>,
    pub type_check: bool,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub pattern: Option<Regex>,
    pub numeric: NumericRule,
    pub string: StringRule,
    pub date: DateRule,
    pub password: Option<PasswordStrength>,
    pub one_of: Option<Vec<Value>>,
    pub array: Option<ArrayRule>,
    pub equals: Option<String>,
    pub not_equals: Option<String>,
    pub compare: Option<(CompareOp, String)>,
    pub custom: Option<CustomCheck>,
    pub unique: Option<UniqueRule>,
    pub exists: Option<ExistsRule>,
    pub not_exists: Option<ExistsRule>,
    pub compare_value: Option<CompareValueRule>,
    pub async_custom: Option<AsyncCustomCheck>,
    /// Replaces the default message of whichever check fails
    pub message: Option<String>,
}

impl ValidationRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn required_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.required_when = Some(Arc::new(predicate));
        self
    }

    /// Only validate this field when `predicate` holds
    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.when = Some(Arc::new(predicate));
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn email(self) -> Self {
        self.format(Format::Email)
    }

    /// Check the value against the field's declared type
    pub fn typed(mut self) -> Self {
        self.type_check = true;
        self
    }

    pub fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }

    pub fn length(self, min: usize, max: usize) -> Self {
        self.min_length(min).max_length(max)
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn range(self, min: f64, max: f64) -> Self {
        self.min(min).max(max)
    }

    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn integer(mut self) -> Self {
        self.numeric.integer = true;
        self
    }

    pub fn positive(mut self) -> Self {
        self.numeric.positive = true;
        self
    }

    pub fn negative(mut self) -> Self {
        self.numeric.negative = true;
        self
    }

    pub fn multiple_of(mut self, step: f64) -> Self {
        self.numeric.multiple_of = Some(step);
        self
    }

    pub fn precision(mut self, places: u32) -> Self {
        self.numeric.precision = Some(places);
        self
    }

    /// Trim the working value in place
    pub fn trim(mut self) -> Self {
        self.string.trim = true;
        self
    }

    /// Lowercase the working value in place
    pub fn lowercase(mut self) -> Self {
        self.string.lowercase = true;
        self
    }

    /// Uppercase the working value in place
    pub fn uppercase(mut self) -> Self {
        self.string.uppercase = true;
        self
    }

    pub fn starts_with(mut self, prefix: impl Into<String>) -> Self {
        self.string.starts_with = Some(prefix.into());
        self
    }

    pub fn ends_with(mut self, suffix: impl Into<String>) -> Self {
        self.string.ends_with = Some(suffix.into());
        self
    }

    pub fn contains(mut self, needle: impl Into<String>) -> Self {
        self.string.contains = Some(needle.into());
        self
    }

    pub fn after(mut self, instant: DateTime<Utc>) -> Self {
        self.date.after = Some(instant);
        self
    }

    pub fn before(mut self, instant: DateTime<Utc>) -> Self {
        self.date.before = Some(instant);
        self
    }

    pub fn past(mut self) -> Self {
        self.date.past = true;
        self
    }

    pub fn future(mut self) -> Self {
        self.date.future = true;
        self
    }

    pub fn password(mut self, strength: PasswordStrength) -> Self {
        self.password = Some(strength);
        self
    }

    /// Restrict the value to a fixed set
    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.one_of = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn array(mut self, rule: ArrayRule) -> Self {
        self.array = Some(rule);
        self
    }

    pub fn equals(mut self, other_field: impl Into<String>) -> Self {
        self.equals = Some(other_field.into());
        self
    }

    pub fn not_equals(mut self, other_field: impl Into<String>) -> Self {
        self.not_equals = Some(other_field.into());
        self
    }

    pub fn compare(mut self, op: CompareOp, other_field: impl Into<String>) -> Self {
        self.compare = Some((op, other_field.into()));
        self
    }

    pub fn custom<F>(mut self, check: F) -> Self
    where
        F: Fn(&Value, &Record) -> Result<(), String> + Send + Sync + 'static,
    {
        self.custom = Some(Arc::new(check));
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = Some(UniqueRule::default());
        self
    }

    pub fn unique_within(mut self, scope: Condition) -> Self {
        self.unique = Some(UniqueRule { scope: Some(scope) });
        self
    }

    pub fn exists_in(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.exists = Some(ExistsRule {
            table: Some(table.into()),
            column: Some(column.into()),
        });
        self
    }

    pub fn not_exists_in(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.not_exists = Some(ExistsRule {
            table: Some(table.into()),
            column: Some(column.into()),
        });
        self
    }

    pub fn compare_value(mut self, rule: CompareValueRule) -> Self {
        self.compare_value = Some(rule);
        self
    }

    pub fn async_custom<F>(mut self, check: F) -> Self
    where
        F: Fn(Value, Record, AsyncRuleContext) -> BoxFuture<'static, Result<(), String>> + Send + Sync + 'static,
    {
        self.async_custom = Some(Arc::new(check));
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Whether this rule carries database-backed or async checks
    pub fn has_async_checks(&self) -> bool {
        self.unique.is_some()
            || self.exists.is_some()
            || self.not_exists.is_some()
            || self.compare_value.is_some()
            || self.async_custom.is_some()
    }

    /// Whether the rule belongs to any of the active groups
    pub fn in_groups(&self, active: Option<&[String]>) -> bool {
        match active {
            None => true,
            Some(active) => self.groups.iter().any(|g| active.contains(g)),
        }
    }
}

impl fmt::Debug for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationRule")
            .field("required", &self.required)
            .field("groups", &self.groups)
            .field("format", &self.format)
            .field("min_length", &self.min_length)
            .field("max_length", &self.max_length)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("unique", &self.unique.is_some())
            .field("async", &self.has_async_checks())
            .finish_non_exhaustive()
    }
}
