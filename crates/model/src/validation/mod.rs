//! Validation engine
//!
//! [`validate`] runs every applicable rule of a schema against a candidate
//! record. Synchronous checks run field by field in schema order and stop at
//! the first failure. Database-backed and caller-supplied async checks are
//! collected for the non-empty fields and awaited together; the first
//! rejection aborts the batch.

pub mod checks;
pub mod formats;
pub mod rules;

use std::cmp::Ordering;

use async_trait::async_trait;
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use serde_json::Value;
use tracing::debug;

pub use formats::Format;
pub use rules::{
    ArrayRule, AsyncCustomCheck, AsyncRuleContext, CompareOp, CompareValueRule, CustomCheck, DateRule,
    ExistsRule, NumericRule, PasswordStrength, RecordPredicate, StringRule, UniqueRule, ValidationRule,
};

use crate::conditions::Condition;
use crate::error::{ModelError, ModelResult, ValidationError};
use crate::model::Model;
use crate::schema::coercion::parse_date_value;
use crate::schema::{Record, Schema};

/// Lookups the async rules need from the store
#[async_trait]
pub trait ValidationStore: Send + Sync {
    /// Whether any live row of the model matches `condition`, ignoring the
    /// row whose primary key is `exclude_key`
    async fn exists_in_model(&self, condition: Condition, exclude_key: Option<Value>) -> ModelResult<bool>;

    /// Whether `column = value` matches a row of `table` (the model's own
    /// table when `None`)
    async fn exists_in_table(&self, table: Option<&str>, column: &str, value: &Value) -> ModelResult<bool>;

    /// Read `field` from the row of `table` whose `key_column` (primary key
    /// when `None`) equals `key`
    async fn lookup_field(
        &self,
        table: Option<&str>,
        key_column: Option<&str>,
        key: &Value,
        field: &str,
    ) -> ModelResult<Option<Value>>;

    /// Model handle passed to async custom checks
    fn as_model(&self) -> Option<Model> {
        None
    }
}

/// Per-call validation switches
#[derive(Debug, Clone, Default)]
pub struct ValidationOptions {
    /// Primary key of the row being updated
    pub instance_id: Option<Value>,
    /// Active validation groups; `None` validates every rule
    pub groups: Option<Vec<String>>,
    /// Only validate fields present in the candidate
    pub partial: bool,
}

impl ValidationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_instance(mut self, id: Value) -> Self {
        self.instance_id = Some(id);
        self
    }

    pub fn groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = Some(groups.into_iter().map(Into::into).collect());
        self
    }

    pub fn partial(mut self) -> Self {
        self.partial = true;
        self
    }
}

/// Validate `record` against `schema`.
///
/// String normalization rules rewrite the candidate in place.
pub async fn validate(
    schema: &Schema,
    record: &mut Record,
    options: &ValidationOptions,
    store: &dyn ValidationStore,
) -> ModelResult<()> {
    let active = options.groups.as_deref();
    let mut pending = Vec::new();

    for (name, definition) in schema.iter() {
        let Some(rule) = &definition.validation else {
            continue;
        };
        if !rule.in_groups(active) {
            continue;
        }
        if options.partial && !record.contains_key(name) {
            continue;
        }
        if let Some(when) = &rule.when {
            if !when(&*record) {
                continue;
            }
        }

        checks::run_sync(name, rule, definition.field_type, record)?;

        let has_value = record.get(name).map(|v| !checks::is_empty(v)).unwrap_or(false);
        if rule.has_async_checks() && has_value {
            pending.push((name, rule));
        }
    }

    if pending.is_empty() {
        return Ok(());
    }

    debug!("Running async validation for {} field(s)", pending.len());
    let snapshot = record.clone();
    let batch = pending
        .into_iter()
        .flat_map(|(name, rule)| async_checks(name, rule, &snapshot, options, store))
        .collect::<Vec<_>>();
    try_join_all(batch).await?;
    Ok(())
}

fn rejection(rule: &ValidationRule, field: &str, default: String) -> ModelError {
    ModelError::Validation(ValidationError::new(field, rule.message.clone().unwrap_or(default)))
}

fn async_checks<'a>(
    field: &'a str,
    rule: &'a ValidationRule,
    snapshot: &'a Record,
    options: &'a ValidationOptions,
    store: &'a dyn ValidationStore,
) -> Vec<BoxFuture<'a, ModelResult<()>>> {
    let value = snapshot.get(field).cloned().unwrap_or(Value::Null);
    let mut batch: Vec<BoxFuture<'a, ModelResult<()>>> = Vec::new();

    if let Some(unique) = &rule.unique {
        let value = value.clone();
        batch.push(
            async move {
                let condition = unique.scope.clone().unwrap_or_default().eq(field, value);
                if store.exists_in_model(condition, options.instance_id.clone()).await? {
                    return Err(rejection(rule, field, format!("{} has already been taken", field)));
                }
                Ok(())
            }
            .boxed(),
        );
    }

    if let Some(exists) = &rule.exists {
        let value = value.clone();
        batch.push(
            async move {
                let column = exists.column.as_deref().unwrap_or(field);
                if !store.exists_in_table(exists.table.as_deref(), column, &value).await? {
                    return Err(rejection(rule, field, format!("The selected {} is invalid", field)));
                }
                Ok(())
            }
            .boxed(),
        );
    }

    if let Some(not_exists) = &rule.not_exists {
        let value = value.clone();
        batch.push(
            async move {
                let column = not_exists.column.as_deref().unwrap_or(field);
                if store.exists_in_table(not_exists.table.as_deref(), column, &value).await? {
                    return Err(rejection(rule, field, format!("{} already exists", field)));
                }
                Ok(())
            }
            .boxed(),
        );
    }

    if let Some(compare) = &rule.compare_value {
        let value = value.clone();
        batch.push(
            async move {
                let target = resolve_compare_target(compare, snapshot, options, store).await?;
                let holds = target
                    .as_ref()
                    .and_then(|t| compare_values(&value, t))
                    .map(|o| compare.operator.holds(o))
                    .unwrap_or(false);
                if !holds {
                    return Err(rejection(
                        rule,
                        field,
                        format!("{} must be {} {}", field, compare.operator.symbol(), compare.target_field),
                    ));
                }
                Ok(())
            }
            .boxed(),
        );
    }

    if let Some(check) = &rule.async_custom {
        let context = AsyncRuleContext {
            field_name: field.to_string(),
            instance_id: options.instance_id.clone(),
            model: store.as_model(),
        };
        let pending = check(value, snapshot.clone(), context);
        batch.push(
            async move {
                pending
                    .await
                    .map_err(|message| rejection(rule, field, message))
            }
            .boxed(),
        );
    }

    batch
}

/// Same-table targets come from the in-flight record when it carries them;
/// everything else is a live lookup.
async fn resolve_compare_target(
    rule: &CompareValueRule,
    snapshot: &Record,
    options: &ValidationOptions,
    store: &dyn ValidationStore,
) -> ModelResult<Option<Value>> {
    if rule.table.is_none() && rule.reference_field.is_none() {
        if let Some(local) = snapshot.get(&rule.target_field) {
            return Ok(Some(local.clone()));
        }
    }

    let key = match &rule.reference_field {
        Some(reference) => snapshot.get(reference).cloned(),
        None => options.instance_id.clone(),
    };
    match key.filter(|k| !k.is_null()) {
        Some(key) => {
            store
                .lookup_field(rule.table.as_deref(), rule.key_column.as_deref(), &key, &rule.target_field)
                .await
        }
        None => Ok(None),
    }
}

/// Order two record values: numbers numerically, dates chronologically,
/// other strings lexically
pub(crate) fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => {
            if let (Ok(x), Ok(y)) = (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
                return x.partial_cmp(&y);
            }
            match (parse_date_value(left), parse_date_value(right)) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => Some(a.cmp(b)),
            }
        }
        (Value::Number(a), Value::String(b)) => a.as_f64()?.partial_cmp(&b.trim().parse::<f64>().ok()?),
        (Value::String(a), Value::Number(b)) => a.trim().parse::<f64>().ok()?.partial_cmp(&b.as_f64()?),
        (a, b) if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDefinition, FieldType};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    /// Store backed by a fixed list of rows
    struct FakeStore {
        rows: Vec<Record>,
        calls: AtomicUsize,
    }

    impl FakeStore {
        fn new(rows: Vec<Value>) -> Self {
            Self {
                rows: rows.into_iter().filter_map(|r| r.as_object().cloned()).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ValidationStore for FakeStore {
        async fn exists_in_model(&self, condition: Condition, exclude_key: Option<Value>) -> ModelResult<bool> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(self
                .rows
                .iter()
                .filter(|r| exclude_key.as_ref().map(|k| r.get("id") != Some(k)).unwrap_or(true))
                .any(|r| condition.matches(r, "id")))
        }

        async fn exists_in_table(&self, table: Option<&str>, column: &str, value: &Value) -> ModelResult<bool> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if table == Some("missing") {
                return Err(ModelError::Query("no such table".into()));
            }
            Ok(self.rows.iter().any(|r| r.get(column) == Some(value)))
        }

        async fn lookup_field(
            &self,
            _table: Option<&str>,
            key_column: Option<&str>,
            key: &Value,
            field: &str,
        ) -> ModelResult<Option<Value>> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            let column = key_column.unwrap_or("id");
            Ok(self
                .rows
                .iter()
                .find(|r| r.get(column) == Some(key))
                .and_then(|r| r.get(field).cloned()))
        }
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    fn user_schema() -> Schema {
        Schema::new()
            .field("name", FieldDefinition::new(FieldType::String).validate(ValidationRule::new().required()))
            .field(
                "email",
                FieldDefinition::new(FieldType::String)
                    .validate(ValidationRule::new().required().trim().lowercase().email().unique()),
            )
    }

    #[tokio::test]
    async fn test_unique_rejects_taken_value() {
        let store = FakeStore::new(vec![json!({"id": 1, "email": "a@x.com"})]);
        let mut candidate = record(json!({"name": "B", "email": "  A@X.com"}));

        let err = validate(&user_schema(), &mut candidate, &ValidationOptions::new(), &store)
            .await
            .unwrap_err();
        assert_eq!(err.as_validation().unwrap().field, "email");
        assert_eq!(candidate["email"], json!("a@x.com"));
    }

    #[tokio::test]
    async fn test_unique_excludes_current_instance() {
        let store = FakeStore::new(vec![json!({"id": 1, "email": "a@x.com"})]);
        let mut candidate = record(json!({"email": "a@x.com"}));
        let options = ValidationOptions::new().for_instance(json!(1)).partial();

        validate(&user_schema(), &mut candidate, &options, &store).await.unwrap();
    }

    #[tokio::test]
    async fn test_first_failing_field_follows_schema_order() {
        let store = FakeStore::new(vec![]);
        let mut candidate = record(json!({"email": "bad"}));
        let err = validate(&user_schema(), &mut candidate, &ValidationOptions::new(), &store)
            .await
            .unwrap_err();
        assert_eq!(err.as_validation().unwrap().field, "name");
        assert_eq!(store.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_groups_and_partial_skip_fields() {
        let schema = Schema::new()
            .field(
                "nickname",
                FieldDefinition::new(FieldType::String).validate(ValidationRule::new().required().group("profile")),
            )
            .field("age", FieldDefinition::new(FieldType::Number).validate(ValidationRule::new().min(18.0)));
        let store = FakeStore::new(vec![]);

        let mut candidate = record(json!({"age": 20}));
        let options = ValidationOptions::new().groups(["signup"]);
        validate(&schema, &mut candidate, &options, &store).await.unwrap();

        let mut candidate = record(json!({"age": 20}));
        validate(&schema, &mut candidate, &ValidationOptions::new().partial(), &store)
            .await
            .unwrap();

        let mut candidate = record(json!({"age": 20}));
        assert!(validate(&schema, &mut candidate, &ValidationOptions::new(), &store).await.is_err());
    }

    #[tokio::test]
    async fn test_when_guard() {
        let schema = Schema::new().field(
            "vat",
            FieldDefinition::new(FieldType::String).validate(
                ValidationRule::new()
                    .required()
                    .when(|r: &Record| r.get("country") == Some(&json!("DE"))),
            ),
        );
        let store = FakeStore::new(vec![]);
        let mut candidate = record(json!({"country": "US"}));
        validate(&schema, &mut candidate, &ValidationOptions::new(), &store).await.unwrap();
        let mut candidate = record(json!({"country": "DE"}));
        assert!(validate(&schema, &mut candidate, &ValidationOptions::new(), &store).await.is_err());
    }

    #[tokio::test]
    async fn test_exists_and_not_exists() {
        let schema = Schema::new()
            .field(
                "teamId",
                FieldDefinition::new(FieldType::Number).validate(ValidationRule::new().exists_in("teams", "id")),
            )
            .field(
                "handle",
                FieldDefinition::new(FieldType::String).validate(ValidationRule::new().not_exists_in("users", "handle")),
            );
        let store = FakeStore::new(vec![json!({"id": 7, "handle": "taken"})]);

        let mut ok = record(json!({"teamId": 7, "handle": "free"}));
        validate(&schema, &mut ok, &ValidationOptions::new(), &store).await.unwrap();

        let mut bad_team = record(json!({"teamId": 8, "handle": "free"}));
        let err = validate(&schema, &mut bad_team, &ValidationOptions::new(), &store).await.unwrap_err();
        assert_eq!(err.as_validation().unwrap().field, "teamId");

        let mut bad_handle = record(json!({"teamId": 7, "handle": "taken"}));
        let err = validate(&schema, &mut bad_handle, &ValidationOptions::new(), &store).await.unwrap_err();
        assert_eq!(err.as_validation().unwrap().field, "handle");
    }

    #[tokio::test]
    async fn test_empty_values_skip_async_checks() {
        let store = FakeStore::new(vec![json!({"id": 1, "email": ""})]);
        let schema = Schema::new().field(
            "email",
            FieldDefinition::new(FieldType::String).validate(ValidationRule::new().unique()),
        );
        let mut candidate = record(json!({"email": ""}));
        validate(&schema, &mut candidate, &ValidationOptions::new(), &store).await.unwrap();
        assert_eq!(store.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_compare_value_local_and_remote() {
        let local = Schema::new().field(
            "maxPrice",
            FieldDefinition::new(FieldType::Number).validate(ValidationRule::new().compare_value(CompareValueRule {
                operator: CompareOp::Gte,
                target_field: "minPrice".into(),
                table: None,
                reference_field: None,
                key_column: None,
            })),
        );
        let store = FakeStore::new(vec![json!({"id": 3, "limit": 100})]);
        let mut candidate = record(json!({"minPrice": 10, "maxPrice": 5}));
        assert!(validate(&local, &mut candidate, &ValidationOptions::new(), &store).await.is_err());

        let remote = Schema::new().field(
            "amount",
            FieldDefinition::new(FieldType::Number).validate(ValidationRule::new().compare_value(CompareValueRule {
                operator: CompareOp::Lte,
                target_field: "limit".into(),
                table: Some("accounts".into()),
                reference_field: Some("accountId".into()),
                key_column: None,
            })),
        );
        let mut within = record(json!({"accountId": 3, "amount": 99}));
        validate(&remote, &mut within, &ValidationOptions::new(), &store).await.unwrap();
        let mut over = record(json!({"accountId": 3, "amount": 101}));
        assert!(validate(&remote, &mut over, &ValidationOptions::new(), &store).await.is_err());
        let mut unknown = record(json!({"accountId": 4, "amount": 1}));
        assert!(validate(&remote, &mut unknown, &ValidationOptions::new(), &store).await.is_err());
    }

    #[tokio::test]
    async fn test_async_custom_receives_context() {
        let schema = Schema::new().field(
            "code",
            FieldDefinition::new(FieldType::String).validate(ValidationRule::new().async_custom(
                |value: Value, all: Record, ctx: AsyncRuleContext| {
                    async move {
                        assert_eq!(ctx.field_name, "code");
                        assert!(all.contains_key("code"));
                        if value == json!("ok") && ctx.instance_id == Some(json!(9)) {
                            Ok(())
                        } else {
                            Err("code rejected".to_string())
                        }
                    }
                    .boxed()
                },
            )),
        );
        let store = FakeStore::new(vec![]);
        let options = ValidationOptions::new().for_instance(json!(9));

        let mut good = record(json!({"code": "ok"}));
        validate(&schema, &mut good, &options, &store).await.unwrap();
        let mut bad = record(json!({"code": "nope"}));
        let err = validate(&schema, &mut bad, &options, &store).await.unwrap_err();
        assert_eq!(err.as_validation().unwrap().message, "code rejected");
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let schema = Schema::new().field(
            "ref",
            FieldDefinition::new(FieldType::String).validate(ValidationRule::new().exists_in("missing", "id")),
        );
        let store = FakeStore::new(vec![]);
        let mut candidate = record(json!({"ref": "x"}));
        let err = validate(&schema, &mut candidate, &ValidationOptions::new(), &store).await.unwrap_err();
        assert!(matches!(err, ModelError::Query(_)));
    }

    #[test]
    fn test_compare_values() {
        assert_eq!(compare_values(&json!(2), &json!(10)), Some(Ordering::Less));
        assert_eq!(compare_values(&json!("10"), &json!("9")), Some(Ordering::Greater));
        assert_eq!(
            compare_values(&json!("2024-01-02"), &json!("2024-01-01 23:00:00")),
            Some(Ordering::Greater)
        );
        assert_eq!(compare_values(&json!(true), &json!(true)), Some(Ordering::Equal));
        assert_eq!(compare_values(&json!(true), &json!(1.5)), None);
    }
}
