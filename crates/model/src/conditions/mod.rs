//! Query conditions
//!
//! A condition is either a bare primary-key value or a map of field to
//! predicates. Field absence means "no constraint".

pub mod compiler;
pub mod ordering;

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{ModelError, ModelResult};

pub use compiler::{compile_condition, CompileContext, CompiledPredicate};
pub use ordering::{SortDirection, SortSpec};

/// Placeholder field name standing for the model's primary key. Used when
/// field predicates are added to a [`Condition::ByKey`].
pub const PRIMARY_KEY_ALIAS: &str = "$pk";

/// A single comparison against one field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldPredicate {
    Eq(Value),
    Gt(Value),
    Lt(Value),
    Gte(Value),
    Lte(Value),
    Ne(Value),
    In(Vec<Value>),
    Like(String),
    IsNull,
}

impl FieldPredicate {
    /// Emission order within one field
    fn rank(&self) -> u8 {
        match self {
            FieldPredicate::Eq(_) | FieldPredicate::IsNull => 0,
            FieldPredicate::Gt(_) => 1,
            FieldPredicate::Lt(_) => 2,
            FieldPredicate::Gte(_) => 3,
            FieldPredicate::Lte(_) => 4,
            FieldPredicate::Ne(_) => 5,
            FieldPredicate::In(_) => 6,
            FieldPredicate::Like(_) => 7,
        }
    }

    pub fn operator(&self) -> &'static str {
        match self {
            FieldPredicate::Eq(_) => "$eq",
            FieldPredicate::Gt(_) => "$gt",
            FieldPredicate::Lt(_) => "$lt",
            FieldPredicate::Gte(_) => "$gte",
            FieldPredicate::Lte(_) => "$lte",
            FieldPredicate::Ne(_) => "$ne",
            FieldPredicate::In(_) => "$in",
            FieldPredicate::Like(_) => "$like",
            FieldPredicate::IsNull => "$null",
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldPredicate::Eq(v)
            | FieldPredicate::Gt(v)
            | FieldPredicate::Lt(v)
            | FieldPredicate::Gte(v)
            | FieldPredicate::Lte(v)
            | FieldPredicate::Ne(v) => v.clone(),
            FieldPredicate::In(values) => Value::Array(values.clone()),
            FieldPredicate::Like(pattern) => Value::String(pattern.clone()),
            FieldPredicate::IsNull => Value::Null,
        }
    }

    /// Evaluate against an in-memory value. Used for scope checks and tests,
    /// never for persisted data.
    pub fn matches(&self, value: Option<&Value>) -> bool {
        let value = value.unwrap_or(&Value::Null);
        match self {
            FieldPredicate::IsNull => value.is_null(),
            FieldPredicate::Eq(v) => value == v,
            FieldPredicate::Ne(v) => value != v,
            FieldPredicate::In(values) => values.contains(value),
            FieldPredicate::Gt(v) => compare(value, v).map(|o| o.is_gt()).unwrap_or(false),
            FieldPredicate::Lt(v) => compare(value, v).map(|o| o.is_lt()).unwrap_or(false),
            FieldPredicate::Gte(v) => compare(value, v).map(|o| o.is_ge()).unwrap_or(false),
            FieldPredicate::Lte(v) => compare(value, v).map(|o| o.is_le()).unwrap_or(false),
            FieldPredicate::Like(pattern) => value.as_str().map(|s| like_matches(s, pattern)).unwrap_or(false),
        }
    }
}

/// Where condition: primary-key lookup or per-field predicates
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    ByKey(Value),
    Fields(BTreeMap<String, Vec<FieldPredicate>>),
}

impl Default for Condition {
    fn default() -> Self {
        Condition::Fields(BTreeMap::new())
    }
}

impl Condition {
    /// Condition matching every row
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_key(key: impl Into<Value>) -> Self {
        Condition::ByKey(key.into())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Condition::Fields(map) if map.is_empty())
    }

    /// Add a predicate on `field`.
    ///
    /// Equality and null checks replace whatever the field had; other
    /// operators replace only a predicate with the same operator.
    pub fn insert(&mut self, field: impl Into<String>, predicate: FieldPredicate) {
        let predicate = match predicate {
            FieldPredicate::Eq(Value::Null) => FieldPredicate::IsNull,
            other => other,
        };
        let map = self.fields_mut();
        let entry = map.entry(field.into()).or_default();
        if predicate.rank() == 0 {
            *entry = vec![predicate];
            return;
        }
        entry.retain(|p| p.rank() != 0 && p.rank() != predicate.rank());
        entry.push(predicate);
        entry.sort_by_key(FieldPredicate::rank);
    }

    pub fn with(mut self, field: impl Into<String>, predicate: FieldPredicate) -> Self {
        self.insert(field, predicate);
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, FieldPredicate::Eq(value.into()))
    }

    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, FieldPredicate::Ne(value.into()))
    }

    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, FieldPredicate::Gt(value.into()))
    }

    pub fn gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, FieldPredicate::Gte(value.into()))
    }

    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, FieldPredicate::Lt(value.into()))
    }

    pub fn lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, FieldPredicate::Lte(value.into()))
    }

    pub fn is_in<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.with(field, FieldPredicate::In(values.into_iter().map(Into::into).collect()))
    }

    pub fn like(self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.with(field, FieldPredicate::Like(pattern.into()))
    }

    pub fn is_null(self, field: impl Into<String>) -> Self {
        self.with(field, FieldPredicate::IsNull)
    }

    /// Predicates for one field
    pub fn get(&self, field: &str) -> Option<&[FieldPredicate]> {
        match self {
            Condition::Fields(map) => map.get(field).map(Vec::as_slice),
            Condition::ByKey(_) => None,
        }
    }

    /// Value of a plain equality predicate on `field`
    pub fn equality(&self, field: &str) -> Option<&Value> {
        match self.get(field) {
            Some([FieldPredicate::Eq(v)]) => Some(v),
            _ => None,
        }
    }

    /// Resolve the primary-key value if this condition pins exactly one key
    pub fn key_value(&self, primary_key: &str) -> Option<&Value> {
        match self {
            Condition::ByKey(v) => Some(v),
            Condition::Fields(_) => self.equality(primary_key).or_else(|| self.equality(PRIMARY_KEY_ALIAS)),
        }
    }

    /// Rewrite a key lookup (and any alias) into an ordinary field map
    pub fn normalize(self, primary_key: &str) -> Self {
        match self {
            Condition::ByKey(key) => Condition::new().eq(primary_key, key),
            Condition::Fields(mut map) => {
                if let Some(preds) = map.remove(PRIMARY_KEY_ALIAS) {
                    let mut normalized = Condition::Fields(map);
                    for pred in preds {
                        normalized.insert(primary_key, pred);
                    }
                    normalized
                } else {
                    Condition::Fields(map)
                }
            }
        }
    }

    /// Overlay `other` on top of `self`. For fields present in both, the
    /// predicates of `other` win.
    pub fn merge(self, other: Condition) -> Self {
        let mut merged = self;
        for (field, preds) in other.into_field_map() {
            merged.fields_mut().insert(field, preds);
        }
        merged
    }

    /// Evaluate in memory against a record
    pub fn matches(&self, record: &Map<String, Value>, primary_key: &str) -> bool {
        match self {
            Condition::ByKey(key) => record.get(primary_key) == Some(key),
            Condition::Fields(map) => map.iter().all(|(field, preds)| {
                let name = if field == PRIMARY_KEY_ALIAS { primary_key } else { field.as_str() };
                preds.iter().all(|p| p.matches(record.get(name)))
            }),
        }
    }

    /// Parse the object form: a scalar is a key lookup; an object maps fields
    /// to a scalar (equality), `null` (IS NULL) or an operator map.
    pub fn from_json(value: &Value) -> ModelResult<Self> {
        match value {
            Value::Null => Ok(Condition::new()),
            Value::Object(map) => {
                let mut condition = Condition::new();
                for (field, raw) in map {
                    match raw {
                        Value::Null => condition.insert(field.clone(), FieldPredicate::IsNull),
                        Value::Object(ops) if is_operator_map(ops) => {
                            for (op, operand) in ops {
                                condition.insert(field.clone(), parse_operator(field, op, operand)?);
                            }
                        }
                        other => condition.insert(field.clone(), FieldPredicate::Eq(other.clone())),
                    }
                }
                Ok(condition)
            }
            Value::Array(_) => Err(ModelError::Query(
                "A condition must be a primary key value or an object".to_string(),
            )),
            scalar => Ok(Condition::ByKey(scalar.clone())),
        }
    }

    /// Object form of this condition, operators spelled with `$`
    pub fn to_json(&self) -> Value {
        match self {
            Condition::ByKey(v) => v.clone(),
            Condition::Fields(map) => {
                let mut out = Map::new();
                for (field, preds) in map {
                    let value = match preds.as_slice() {
                        [FieldPredicate::Eq(v)] => v.clone(),
                        [FieldPredicate::IsNull] => Value::Null,
                        _ => Value::Object(
                            preds.iter().map(|p| (p.operator().to_string(), p.to_json())).collect(),
                        ),
                    };
                    out.insert(field.clone(), value);
                }
                Value::Object(out)
            }
        }
    }

    /// Canonical text form; equal conditions always give the same string
    pub fn signature(&self) -> String {
        match self {
            Condition::ByKey(v) => format!("key={}", canonical_json(v)),
            Condition::Fields(_) => canonical_json(&self.to_json()),
        }
    }

    fn fields_mut(&mut self) -> &mut BTreeMap<String, Vec<FieldPredicate>> {
        if let Condition::ByKey(_) = self {
            let map = std::mem::take(self).into_field_map();
            *self = Condition::Fields(map);
        }
        match self {
            Condition::Fields(map) => map,
            Condition::ByKey(_) => unreachable!("key lookup was converted above"),
        }
    }

    fn into_field_map(self) -> BTreeMap<String, Vec<FieldPredicate>> {
        match self {
            Condition::Fields(map) => map,
            Condition::ByKey(key) => {
                let mut map = BTreeMap::new();
                map.insert(PRIMARY_KEY_ALIAS.to_string(), vec![FieldPredicate::Eq(key)]);
                map
            }
        }
    }
}

/// Anything that can be turned into a [`Condition`]: a condition, a bare
/// primary-key value, or the JSON object form.
pub trait IntoCondition {
    fn into_condition(self) -> ModelResult<Condition>;
}

impl IntoCondition for Condition {
    fn into_condition(self) -> ModelResult<Condition> {
        Ok(self)
    }
}

impl IntoCondition for Value {
    fn into_condition(self) -> ModelResult<Condition> {
        Condition::from_json(&self)
    }
}

impl IntoCondition for &Value {
    fn into_condition(self) -> ModelResult<Condition> {
        Condition::from_json(self)
    }
}

impl IntoCondition for i64 {
    fn into_condition(self) -> ModelResult<Condition> {
        Ok(Condition::ByKey(Value::from(self)))
    }
}

impl IntoCondition for i32 {
    fn into_condition(self) -> ModelResult<Condition> {
        Ok(Condition::ByKey(Value::from(self)))
    }
}

impl IntoCondition for &str {
    fn into_condition(self) -> ModelResult<Condition> {
        Ok(Condition::ByKey(Value::from(self)))
    }
}

impl IntoCondition for String {
    fn into_condition(self) -> ModelResult<Condition> {
        Ok(Condition::ByKey(Value::from(self)))
    }
}

fn is_operator_map(ops: &Map<String, Value>) -> bool {
    !ops.is_empty() && ops.keys().all(|k| operator_name(k).is_some())
}

fn operator_name(key: &str) -> Option<&str> {
    let name = key.strip_prefix('$').unwrap_or(key);
    matches!(name, "eq" | "gt" | "lt" | "gte" | "lte" | "ne" | "in" | "like").then_some(name)
}

fn parse_operator(field: &str, op: &str, operand: &Value) -> ModelResult<FieldPredicate> {
    let predicate = match operator_name(op) {
        Some("eq") => FieldPredicate::Eq(operand.clone()),
        Some("gt") => FieldPredicate::Gt(operand.clone()),
        Some("lt") => FieldPredicate::Lt(operand.clone()),
        Some("gte") => FieldPredicate::Gte(operand.clone()),
        Some("lte") => FieldPredicate::Lte(operand.clone()),
        Some("ne") => FieldPredicate::Ne(operand.clone()),
        Some("in") => match operand {
            Value::Array(values) => FieldPredicate::In(values.clone()),
            other => FieldPredicate::In(vec![other.clone()]),
        },
        Some("like") => match operand {
            Value::String(pattern) => FieldPredicate::Like(pattern.clone()),
            _ => {
                return Err(ModelError::Query(format!(
                    "$like on '{}' expects a string pattern",
                    field
                )))
            }
        },
        _ => return Err(ModelError::Query(format!("Unknown operator '{}' on '{}'", op, field))),
    };
    Ok(predicate)
}

/// JSON text with object keys sorted at every level
pub(crate) fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", body.join(","))
        }
        scalar => scalar.to_string(),
    }
}

fn compare(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// SQL LIKE with `%` and `_` wildcards, case-insensitive like SQLite/MySQL
fn like_matches(text: &str, pattern: &str) -> bool {
    fn go(t: &[char], p: &[char]) -> bool {
        match p.split_first() {
            None => t.is_empty(),
            Some(('%', rest)) => (0..=t.len()).any(|i| go(&t[i..], rest)),
            Some(('_', rest)) => !t.is_empty() && go(&t[1..], rest),
            Some((c, rest)) => t
                .first()
                .map(|tc| tc.eq_ignore_ascii_case(c) && go(&t[1..], rest))
                .unwrap_or(false),
        }
    }
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    go(&t, &p)
}
