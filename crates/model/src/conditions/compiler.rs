//! Condition compiler
//!
//! Turns a [`Condition`] plus a trash filter into a parameterized predicate.
//! Values are coerced through the schema's field types; identifiers are
//! validated and quoted for the dialect.

use serde_json::Value;

use super::{Condition, FieldPredicate, PRIMARY_KEY_ALIAS};
use crate::backends::DatabaseValue;
use crate::dialect::{BindParams, SqlDialect};
use crate::error::ModelResult;
use crate::schema::{generic_to_db, to_db, Schema};
use crate::security::quote;
use crate::soft_delete::{SoftDeletePolicy, TrashFilter};

/// Everything the compiler needs to know about the target model
#[derive(Debug, Clone, Copy)]
pub struct CompileContext<'a> {
    pub dialect: SqlDialect,
    pub primary_key: &'a str,
    pub schema: Option<&'a Schema>,
    pub soft_delete: Option<&'a SoftDeletePolicy>,
}

impl<'a> CompileContext<'a> {
    pub fn new(dialect: SqlDialect, primary_key: &'a str) -> Self {
        Self {
            dialect,
            primary_key,
            schema: None,
            soft_delete: None,
        }
    }

    pub fn with_schema(mut self, schema: &'a Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_soft_delete(mut self, policy: &'a SoftDeletePolicy) -> Self {
        self.soft_delete = Some(policy);
        self
    }

    /// Coerce a condition operand for `field`
    pub fn encode(&self, field: &str, value: &Value) -> ModelResult<DatabaseValue> {
        match self.schema.and_then(|s| s.field_type(field)) {
            Some(field_type) => to_db(field_type, value, self.dialect),
            None => Ok(generic_to_db(value, self.dialect)),
        }
    }

    /// Validate and quote a column name
    pub fn column(&self, field: &str) -> ModelResult<String> {
        quote(self.dialect, field)
    }
}

/// A predicate string with its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPredicate {
    pub sql: String,
    pub params: Vec<DatabaseValue>,
}

/// Compile a condition into a fresh parameter list
pub fn compile_condition(
    condition: &Condition,
    filter: TrashFilter,
    ctx: &CompileContext<'_>,
) -> ModelResult<CompiledPredicate> {
    let mut params = BindParams::new(ctx.dialect);
    let sql = compile_into(condition, filter, ctx, &mut params)?;
    Ok(CompiledPredicate {
        sql,
        params: params.into_values(),
    })
}

/// Compile a condition, appending its parameters to `params`.
///
/// Used when the predicate follows other bound values (e.g. an UPDATE's SET
/// list) so placeholders keep counting.
pub fn compile_into(
    condition: &Condition,
    filter: TrashFilter,
    ctx: &CompileContext<'_>,
    params: &mut BindParams,
) -> ModelResult<String> {
    let mut clauses = Vec::new();

    match condition {
        Condition::ByKey(key) => {
            let column = ctx.column(ctx.primary_key)?;
            let placeholder = params.push(ctx.encode(ctx.primary_key, key)?);
            clauses.push(format!("{} = {}", column, placeholder));
        }
        Condition::Fields(map) => {
            for (field, predicates) in map {
                let field = if field == PRIMARY_KEY_ALIAS { ctx.primary_key } else { field.as_str() };
                let column = ctx.column(field)?;
                for predicate in predicates {
                    clauses.push(compile_predicate(field, &column, predicate, ctx, params)?);
                }
            }
        }
    }

    if let Some(marker) = ctx.soft_delete.and_then(|p| p.predicate(filter, ctx.dialect)) {
        clauses.push(marker);
    }

    if clauses.is_empty() {
        Ok("1=1".to_string())
    } else {
        Ok(clauses.join(" AND "))
    }
}

fn compile_predicate(
    field: &str,
    column: &str,
    predicate: &FieldPredicate,
    ctx: &CompileContext<'_>,
    params: &mut BindParams,
) -> ModelResult<String> {
    let binary = |op: &str, value: &Value, params: &mut BindParams| -> ModelResult<String> {
        let placeholder = params.push(ctx.encode(field, value)?);
        Ok(format!("{} {} {}", column, op, placeholder))
    };

    match predicate {
        FieldPredicate::IsNull | FieldPredicate::Eq(Value::Null) => Ok(format!("{} IS NULL", column)),
        FieldPredicate::Ne(Value::Null) => Ok(format!("{} IS NOT NULL", column)),
        FieldPredicate::Eq(v) => binary("=", v, params),
        FieldPredicate::Gt(v) => binary(">", v, params),
        FieldPredicate::Lt(v) => binary("<", v, params),
        FieldPredicate::Gte(v) => binary(">=", v, params),
        FieldPredicate::Lte(v) => binary("<=", v, params),
        FieldPredicate::Ne(v) => binary("!=", v, params),
        FieldPredicate::Like(pattern) => {
            let placeholder = params.push(DatabaseValue::String(pattern.clone()));
            Ok(format!("{} LIKE {}", column, placeholder))
        }
        FieldPredicate::In(values) if values.is_empty() => Ok("1=0".to_string()),
        FieldPredicate::In(values) => {
            let placeholders = values
                .iter()
                .map(|v| Ok(params.push(ctx.encode(field, v)?)))
                .collect::<ModelResult<Vec<_>>>()?;
            Ok(format!("{} IN ({})", column, placeholders.join(", ")))
        }
    }
}
