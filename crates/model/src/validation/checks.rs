//! Synchronous checks
//!
//! String normalization (trim, lowercase, uppercase) is applied first, so every
//! check sees the value that will be persisted. Checks then run in a fixed
//! order and the first failure wins: required, format, type, length/bounds,
//! pattern, numeric, string, date, password, enum, array, cross-field, custom.

use chrono::Utc;
use serde_json::Value;

use super::rules::ValidationRule;
use super::compare_values;
use crate::error::ValidationError;
use crate::schema::coercion::parse_date_value;
use crate::schema::{FieldType, Record};

/// Run the synchronous checks for `field`, writing any normalization back
/// into `record`.
pub(crate) fn run_sync(
    field: &str,
    rule: &ValidationRule,
    field_type: FieldType,
    record: &mut Record,
) -> Result<(), ValidationError> {
    let present = record.contains_key(field);
    let mut value = record.get(field).cloned().unwrap_or(Value::Null);
    let result = check_value(field, rule, field_type, &mut value, record);
    if present || !value.is_null() {
        record.insert(field.to_string(), value);
    }
    result
}

/// Null and the empty string carry no value
pub(crate) fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        other => is_empty(other),
    }
}

fn fail(rule: &ValidationRule, field: &str, default: String) -> ValidationError {
    ValidationError::new(field, rule.message.clone().unwrap_or(default))
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn check_value(
    field: &str,
    rule: &ValidationRule,
    field_type: FieldType,
    value: &mut Value,
    record: &Record,
) -> Result<(), ValidationError> {
    normalize(rule, value);

    let required = rule.required || rule.required_when.as_ref().map(|p| p(record)).unwrap_or(false);
    if required && is_blank(value) {
        return Err(fail(rule, field, format!("{} is required", field)));
    }
    if is_empty(value) {
        return Ok(());
    }

    if let Some(format) = rule.format {
        if !value.as_str().map(|s| format.matches(s)).unwrap_or(false) {
            return Err(fail(rule, field, format!("{} must be {}", field, format.description())));
        }
    }

    if rule.type_check && !field_type.accepts(value) {
        return Err(fail(rule, field, format!("{} must be of type {}", field, field_type)));
    }

    check_length_and_bounds(field, rule, value)?;

    if let Some(pattern) = &rule.pattern {
        if !value.as_str().map(|s| pattern.is_match(s)).unwrap_or(false) {
            return Err(fail(rule, field, format!("{} format is invalid", field)));
        }
    }

    check_numeric(field, rule, value)?;
    check_string(field, rule, value)?;
    check_date(field, rule, value)?;
    check_password(field, rule, value)?;

    if let Some(allowed) = &rule.one_of {
        if !allowed.contains(value) {
            let list: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
            return Err(fail(rule, field, format!("{} must be one of: {}", field, list.join(", "))));
        }
    }

    check_array(field, rule, value, record)?;
    check_cross_field(field, rule, value, record)?;

    if let Some(custom) = &rule.custom {
        if let Err(message) = custom(value, record) {
            return Err(ValidationError::new(field, rule.message.clone().unwrap_or(message)));
        }
    }

    Ok(())
}

fn check_length_and_bounds(field: &str, rule: &ValidationRule, value: &Value) -> Result<(), ValidationError> {
    let length = match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    };
    if let Some(len) = length {
        if let Some(min) = rule.min_length.filter(|min| len < *min) {
            return Err(fail(rule, field, format!("{} must be at least {} characters", field, min)));
        }
        if let Some(max) = rule.max_length.filter(|max| len > *max) {
            return Err(fail(rule, field, format!("{} must not exceed {} characters", field, max)));
        }
    }

    if rule.min.is_some() || rule.max.is_some() {
        let number = as_number(value).ok_or_else(|| fail(rule, field, format!("{} must be a number", field)))?;
        if let Some(min) = rule.min.filter(|min| number < *min) {
            return Err(fail(rule, field, format!("{} must be at least {}", field, min)));
        }
        if let Some(max) = rule.max.filter(|max| number > *max) {
            return Err(fail(rule, field, format!("{} must not be greater than {}", field, max)));
        }
    }
    Ok(())
}

fn check_numeric(field: &str, rule: &ValidationRule, value: &Value) -> Result<(), ValidationError> {
    let numeric = &rule.numeric;
    if *numeric == Default::default() {
        return Ok(());
    }
    let number = as_number(value).ok_or_else(|| fail(rule, field, format!("{} must be a number", field)))?;

    if numeric.integer && number.fract() != 0.0 {
        return Err(fail(rule, field, format!("{} must be an integer", field)));
    }
    if numeric.positive && number <= 0.0 {
        return Err(fail(rule, field, format!("{} must be positive", field)));
    }
    if numeric.negative && number >= 0.0 {
        return Err(fail(rule, field, format!("{} must be negative", field)));
    }
    if let Some(step) = numeric.multiple_of.filter(|s| *s != 0.0) {
        let ratio = number / step;
        if (ratio - ratio.round()).abs() > 1e-9 {
            return Err(fail(rule, field, format!("{} must be a multiple of {}", field, step)));
        }
    }
    if let Some(places) = numeric.precision {
        let text = match value {
            Value::String(s) => s.trim().to_string(),
            other => other.to_string(),
        };
        let decimals = text.split_once('.').map(|(_, frac)| frac.len()).unwrap_or(0);
        if decimals > places as usize {
            return Err(fail(rule, field, format!("{} must have at most {} decimal places", field, places)));
        }
    }
    Ok(())
}

fn normalize(rule: &ValidationRule, value: &mut Value) {
    let Value::String(text) = value else {
        return;
    };
    let refinements = &rule.string;

    if refinements.trim {
        *text = text.trim().to_string();
    }
    if refinements.lowercase {
        *text = text.to_lowercase();
    }
    if refinements.uppercase {
        *text = text.to_uppercase();
    }
}

fn check_string(field: &str, rule: &ValidationRule, value: &Value) -> Result<(), ValidationError> {
    let Value::String(text) = value else {
        return Ok(());
    };
    let refinements = &rule.string;

    if let Some(prefix) = refinements.starts_with.as_deref().filter(|p| !text.starts_with(*p)) {
        return Err(fail(rule, field, format!("{} must start with {}", field, prefix)));
    }
    if let Some(suffix) = refinements.ends_with.as_deref().filter(|s| !text.ends_with(*s)) {
        return Err(fail(rule, field, format!("{} must end with {}", field, suffix)));
    }
    if let Some(needle) = refinements.contains.as_deref().filter(|n| !text.contains(*n)) {
        return Err(fail(rule, field, format!("{} must contain {}", field, needle)));
    }
    Ok(())
}

fn check_date(field: &str, rule: &ValidationRule, value: &Value) -> Result<(), ValidationError> {
    let date_rule = &rule.date;
    if *date_rule == Default::default() {
        return Ok(());
    }
    let instant = parse_date_value(value).ok_or_else(|| fail(rule, field, format!("{} must be a valid date", field)))?;
    let now = Utc::now();

    if let Some(after) = date_rule.after.filter(|a| instant <= *a) {
        return Err(fail(rule, field, format!("{} must be after {}", field, after.to_rfc3339())));
    }
    if let Some(before) = date_rule.before.filter(|b| instant >= *b) {
        return Err(fail(rule, field, format!("{} must be before {}", field, before.to_rfc3339())));
    }
    if date_rule.past && instant >= now {
        return Err(fail(rule, field, format!("{} must be in the past", field)));
    }
    if date_rule.future && instant <= now {
        return Err(fail(rule, field, format!("{} must be in the future", field)));
    }
    Ok(())
}

fn check_password(field: &str, rule: &ValidationRule, value: &Value) -> Result<(), ValidationError> {
    let Some(strength) = &rule.password else {
        return Ok(());
    };
    let password = value.as_str().unwrap_or_default();

    if password.chars().count() < strength.min_length {
        return Err(fail(rule, field, format!("{} must be at least {} characters", field, strength.min_length)));
    }
    if strength.uppercase && !password.chars().any(|c| c.is_uppercase()) {
        return Err(fail(rule, field, format!("{} must contain an uppercase letter", field)));
    }
    if strength.lowercase && !password.chars().any(|c| c.is_lowercase()) {
        return Err(fail(rule, field, format!("{} must contain a lowercase letter", field)));
    }
    if strength.digit && !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(fail(rule, field, format!("{} must contain a digit", field)));
    }
    if strength.symbol && !password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()) {
        return Err(fail(rule, field, format!("{} must contain a symbol", field)));
    }
    Ok(())
}

fn check_array(field: &str, rule: &ValidationRule, value: &mut Value, record: &Record) -> Result<(), ValidationError> {
    let Some(array_rule) = &rule.array else {
        return Ok(());
    };
    let Value::Array(items) = value else {
        return Err(fail(rule, field, format!("{} must be an array", field)));
    };

    if let Some(min) = array_rule.min_items.filter(|min| items.len() < *min) {
        return Err(fail(rule, field, format!("{} must have at least {} items", field, min)));
    }
    if let Some(max) = array_rule.max_items.filter(|max| items.len() > *max) {
        return Err(fail(rule, field, format!("{} must not have more than {} items", field, max)));
    }
    if array_rule.unique_items {
        for (i, item) in items.iter().enumerate() {
            if items[..i].contains(item) {
                return Err(fail(rule, field, format!("{} must not contain duplicate items", field)));
            }
        }
    }
    if let Some(each) = &array_rule.each {
        for (i, item) in items.iter_mut().enumerate() {
            check_value(&format!("{}[{}]", field, i), each, FieldType::Any, item, record)?;
        }
    }
    Ok(())
}

fn check_cross_field(field: &str, rule: &ValidationRule, value: &Value, record: &Record) -> Result<(), ValidationError> {
    let other = |name: &str| record.get(name).cloned().unwrap_or(Value::Null);

    if let Some(name) = &rule.equals {
        if *value != other(name) {
            return Err(fail(rule, field, format!("{} must match {}", field, name)));
        }
    }
    if let Some(name) = &rule.not_equals {
        if *value == other(name) {
            return Err(fail(rule, field, format!("{} must differ from {}", field, name)));
        }
    }
    if let Some((op, name)) = &rule.compare {
        let holds = compare_values(value, &other(name)).map(|o| op.holds(o)).unwrap_or(false);
        if !holds {
            return Err(fail(rule, field, format!("{} must be {} {}", field, op.symbol(), name)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{ArrayRule, CompareOp, Format, PasswordStrength};
    use regex::Regex;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    fn check(rule: &ValidationRule, field: &str, rec: &mut Record) -> Result<(), ValidationError> {
        run_sync(field, rule, FieldType::Any, rec)
    }

    #[test]
    fn test_required_and_empty_skip() {
        let rule = ValidationRule::new().required().min_length(3);
        let mut rec = record(json!({"name": "  "}));
        assert_eq!(check(&rule, "name", &mut rec).unwrap_err().message, "name is required");

        let optional = ValidationRule::new().min_length(3).email();
        let mut rec = record(json!({"name": ""}));
        assert!(check(&optional, "name", &mut rec).is_ok());
    }

    #[test]
    fn test_required_when() {
        let rule = ValidationRule::new()
            .required_when(|r: &Record| r.get("shipping").and_then(Value::as_bool).unwrap_or(false));
        let mut rec = record(json!({"shipping": true}));
        assert!(check(&rule, "address", &mut rec).is_err());
        let mut rec = record(json!({"shipping": false}));
        assert!(check(&rule, "address", &mut rec).is_ok());
    }

    #[test]
    fn test_order_format_before_length() {
        let rule = ValidationRule::new().max_length(3).format(Format::Email);
        let mut rec = record(json!({"email": "too-long-and-invalid"}));
        let err = check(&rule, "email", &mut rec).unwrap_err();
        assert_eq!(err.message, "email must be a valid email address");
    }

    #[test]
    fn test_bounds_and_numeric() {
        let rule = ValidationRule::new().range(1.0, 10.0).integer();
        let mut rec = record(json!({"qty": 11}));
        assert!(check(&rule, "qty", &mut rec).unwrap_err().message.contains("greater than"));
        let mut rec = record(json!({"qty": 2.5}));
        assert!(check(&rule, "qty", &mut rec).unwrap_err().message.contains("integer"));

        let money = ValidationRule::new().precision(2).positive().multiple_of(0.05);
        let mut rec = record(json!({"price": 1.25}));
        assert!(check(&money, "price", &mut rec).is_ok());
        let mut rec = record(json!({"price": 1.255}));
        assert!(check(&money, "price", &mut rec).is_err());
    }

    #[test]
    fn test_string_mutation_is_written_back() {
        let rule = ValidationRule::new().trim().lowercase().ends_with(".com");
        let mut rec = record(json!({"email": "  Alice@Example.COM "}));
        check(&rule, "email", &mut rec).unwrap();
        assert_eq!(rec["email"], json!("alice@example.com"));
    }

    #[test]
    fn test_padded_input_is_normalized_before_checks() {
        let rule = ValidationRule::new().required().trim().lowercase().email().max_length(17);
        let mut rec = record(json!({"email": "   Alice@Example.COM   "}));
        check(&rule, "email", &mut rec).unwrap();
        assert_eq!(rec["email"], json!("alice@example.com"));

        let code = ValidationRule::new()
            .trim()
            .uppercase()
            .pattern(Regex::new(r"^[A-Z]{3}$").unwrap())
            .one_of(["USD", "EUR"]);
        let mut rec = record(json!({"currency": " usd "}));
        check(&code, "currency", &mut rec).unwrap();
        assert_eq!(rec["currency"], json!("USD"));
    }

    #[test]
    fn test_pattern_and_enum() {
        let rule = ValidationRule::new()
            .pattern(Regex::new(r"^[A-Z]{3}$").unwrap())
            .one_of(["USD", "EUR"]);
        let mut rec = record(json!({"currency": "GBP"}));
        assert!(check(&rule, "currency", &mut rec).unwrap_err().message.contains("one of"));
        let mut rec = record(json!({"currency": "usd"}));
        assert!(check(&rule, "currency", &mut rec).unwrap_err().message.contains("format"));
    }

    #[test]
    fn test_password_strength() {
        let rule = ValidationRule::new().password(PasswordStrength { symbol: true, ..Default::default() });
        let mut rec = record(json!({"password": "Password1"}));
        assert!(check(&rule, "password", &mut rec).unwrap_err().message.contains("symbol"));
        let mut rec = record(json!({"password": "Password1!"}));
        assert!(check(&rule, "password", &mut rec).is_ok());
    }

    #[test]
    fn test_array_rules() {
        let rule = ValidationRule::new().array(ArrayRule {
            max_items: Some(3),
            unique_items: true,
            each: Some(Box::new(ValidationRule::new().trim().min_length(2))),
            ..Default::default()
        });
        let mut rec = record(json!({"tags": ["rust", " db "]}));
        check(&rule, "tags", &mut rec).unwrap();
        assert_eq!(rec["tags"], json!(["rust", "db"]));

        let mut rec = record(json!({"tags": ["a", "a"]}));
        assert!(check(&rule, "tags", &mut rec).unwrap_err().message.contains("duplicate"));
        let mut rec = record(json!({"tags": ["ok", "x"]}));
        assert_eq!(check(&rule, "tags", &mut rec).unwrap_err().field, "tags[1]");
    }

    #[test]
    fn test_cross_field() {
        let confirm = ValidationRule::new().equals("password");
        let mut rec = record(json!({"password": "a", "confirm": "b"}));
        assert!(check(&confirm, "confirm", &mut rec).is_err());

        let ends = ValidationRule::new().compare(CompareOp::Gt, "startsAt");
        let mut rec = record(json!({"startsAt": "2024-01-01 10:00:00", "endsAt": "2024-01-01 09:00:00"}));
        assert!(check(&ends, "endsAt", &mut rec).is_err());
        let mut rec = record(json!({"startsAt": "2024-01-01 10:00:00", "endsAt": "2024-01-02T00:00:00Z"}));
        assert!(check(&ends, "endsAt", &mut rec).is_ok());
    }

    #[test]
    fn test_custom_and_message_override() {
        let rule = ValidationRule::new().custom(|v: &Value, _: &Record| {
            if v.as_str() == Some("admin") {
                Err("is reserved".to_string())
            } else {
                Ok(())
            }
        });
        let mut rec = record(json!({"username": "admin"}));
        assert_eq!(check(&rule, "username", &mut rec).unwrap_err().message, "is reserved");

        let rule = ValidationRule::new().min_length(5).message("too short, pick another");
        let mut rec = record(json!({"username": "bob"}));
        assert_eq!(check(&rule, "username", &mut rec).unwrap_err().message, "too short, pick another");
    }

    #[test]
    fn test_date_refinements() {
        let rule = ValidationRule::new().past();
        let mut rec = record(json!({"born": "2999-01-01"}));
        assert!(check(&rule, "born", &mut rec).is_err());
        let mut rec = record(json!({"born": "not a date"}));
        assert!(check(&rule, "born", &mut rec).unwrap_err().message.contains("valid date"));
    }
}
