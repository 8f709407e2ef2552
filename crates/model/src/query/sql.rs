//! Statement builders
//!
//! Every builder quotes identifiers through the dialect and binds values as
//! positional parameters. WHERE clauses come from the condition compiler.

use crate::backends::DatabaseValue;
use crate::conditions::compiler::compile_into;
use crate::conditions::{CompileContext, Condition};
use crate::dialect::{BindParams, UpsertStyle};
use crate::error::ModelResult;
use crate::soft_delete::TrashFilter;

use super::state::QueryState;

/// SQL text with its bound parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<DatabaseValue>,
}

impl Statement {
    fn new(sql: String, params: BindParams) -> Self {
        Self {
            sql,
            params: params.into_values(),
        }
    }
}

/// Column name and encoded value
pub type Assignment = (String, DatabaseValue);

fn projection(ctx: &CompileContext<'_>, fields: &[String]) -> ModelResult<String> {
    if fields.is_empty() {
        return Ok("*".to_string());
    }
    let columns = fields.iter().map(|f| ctx.column(f)).collect::<ModelResult<Vec<_>>>()?;
    Ok(columns.join(", "))
}

fn returning(ctx: &CompileContext<'_>, wanted: bool) -> &'static str {
    if wanted && ctx.dialect.supports_returning() {
        " RETURNING *"
    } else {
        ""
    }
}

/// `SELECT` honoring projection, ordering and window
pub fn select(ctx: &CompileContext<'_>, table: &str, state: &QueryState) -> ModelResult<Statement> {
    let mut params = BindParams::new(ctx.dialect);
    let predicate = compile_into(&state.condition, state.trash_filter(), ctx, &mut params)?;
    let sql = format!(
        "SELECT {} FROM {} WHERE {}{}{}",
        projection(ctx, &state.fields)?,
        ctx.column(table)?,
        predicate,
        state.sort.to_sql(ctx.dialect)?,
        ctx.dialect.limit_offset(state.limit, state.skip)
    );
    Ok(Statement::new(sql, params))
}

pub fn count(ctx: &CompileContext<'_>, table: &str, state: &QueryState) -> ModelResult<Statement> {
    let mut params = BindParams::new(ctx.dialect);
    let predicate = compile_into(&state.condition, state.trash_filter(), ctx, &mut params)?;
    let sql = format!("SELECT COUNT(*) AS count FROM {} WHERE {}", ctx.column(table)?, predicate);
    Ok(Statement::new(sql, params))
}

pub fn exists(ctx: &CompileContext<'_>, table: &str, condition: &Condition, filter: TrashFilter) -> ModelResult<Statement> {
    let mut params = BindParams::new(ctx.dialect);
    let predicate = compile_into(condition, filter, ctx, &mut params)?;
    let sql = format!("SELECT 1 AS found FROM {} WHERE {} LIMIT 1", ctx.column(table)?, predicate);
    Ok(Statement::new(sql, params))
}

pub fn distinct(ctx: &CompileContext<'_>, table: &str, field: &str, state: &QueryState) -> ModelResult<Statement> {
    let mut params = BindParams::new(ctx.dialect);
    let predicate = compile_into(&state.condition, state.trash_filter(), ctx, &mut params)?;
    let sql = format!(
        "SELECT DISTINCT {} FROM {} WHERE {}{}",
        ctx.column(field)?,
        ctx.column(table)?,
        predicate,
        state.sort.to_sql(ctx.dialect)?
    );
    Ok(Statement::new(sql, params))
}

/// `INSERT`; an empty column list inserts a row of defaults
pub fn insert(ctx: &CompileContext<'_>, table: &str, values: &[Assignment], with_returning: bool) -> ModelResult<Statement> {
    let mut params = BindParams::new(ctx.dialect);
    let table = ctx.column(table)?;
    let body = if values.is_empty() {
        match ctx.dialect.upsert_style() {
            UpsertStyle::OnDuplicateKey => "() VALUES ()".to_string(),
            UpsertStyle::OnConflict => "DEFAULT VALUES".to_string(),
        }
    } else {
        let (columns, placeholders) = column_list(ctx, values, &mut params)?;
        format!("({}) VALUES ({})", columns.join(", "), placeholders.join(", "))
    };
    let sql = format!("INSERT INTO {} {}{}", table, body, returning(ctx, with_returning));
    Ok(Statement::new(sql, params))
}

fn column_list(
    ctx: &CompileContext<'_>,
    values: &[Assignment],
    params: &mut BindParams,
) -> ModelResult<(Vec<String>, Vec<String>)> {
    let mut columns = Vec::with_capacity(values.len());
    let mut placeholders = Vec::with_capacity(values.len());
    for (column, value) in values {
        columns.push(ctx.column(column)?);
        placeholders.push(params.push(value.clone()));
    }
    Ok((columns, placeholders))
}

/// `UPDATE .. SET col = ?` over the rows matching `condition`
pub fn update(
    ctx: &CompileContext<'_>,
    table: &str,
    values: &[Assignment],
    condition: &Condition,
    filter: TrashFilter,
    with_returning: bool,
) -> ModelResult<Statement> {
    let mut params = BindParams::new(ctx.dialect);
    let mut sets = Vec::with_capacity(values.len());
    for (column, value) in values {
        sets.push(format!("{} = {}", ctx.column(column)?, params.push(value.clone())));
    }
    let predicate = compile_into(condition, filter, ctx, &mut params)?;
    let sql = format!(
        "UPDATE {} SET {} WHERE {}{}",
        ctx.column(table)?,
        sets.join(", "),
        predicate,
        returning(ctx, with_returning)
    );
    Ok(Statement::new(sql, params))
}

/// `UPDATE .. SET col = col + ?` plus plain assignments
pub fn increment(
    ctx: &CompileContext<'_>,
    table: &str,
    deltas: &[Assignment],
    values: &[Assignment],
    condition: &Condition,
    filter: TrashFilter,
    with_returning: bool,
) -> ModelResult<Statement> {
    let mut params = BindParams::new(ctx.dialect);
    let mut sets = Vec::with_capacity(deltas.len() + values.len());
    for (column, delta) in deltas {
        let column = ctx.column(column)?;
        sets.push(format!("{} = {} + {}", column, column, params.push(delta.clone())));
    }
    for (column, value) in values {
        sets.push(format!("{} = {}", ctx.column(column)?, params.push(value.clone())));
    }
    let predicate = compile_into(condition, filter, ctx, &mut params)?;
    let sql = format!(
        "UPDATE {} SET {} WHERE {}{}",
        ctx.column(table)?,
        sets.join(", "),
        predicate,
        returning(ctx, with_returning)
    );
    Ok(Statement::new(sql, params))
}

pub fn delete(ctx: &CompileContext<'_>, table: &str, condition: &Condition, filter: TrashFilter) -> ModelResult<Statement> {
    let mut params = BindParams::new(ctx.dialect);
    let predicate = compile_into(condition, filter, ctx, &mut params)?;
    let sql = format!("DELETE FROM {} WHERE {}", ctx.column(table)?, predicate);
    Ok(Statement::new(sql, params))
}

/// Single-statement insert-or-update keyed on `conflict` columns.
///
/// `update_columns` are overwritten from the inserted values on conflict.
pub fn upsert(
    ctx: &CompileContext<'_>,
    table: &str,
    values: &[Assignment],
    conflict: &[String],
    update_columns: &[String],
) -> ModelResult<Statement> {
    let mut params = BindParams::new(ctx.dialect);
    let (columns, placeholders) = column_list(ctx, values, &mut params)?;
    let conflict_columns = conflict.iter().map(|c| ctx.column(c)).collect::<ModelResult<Vec<_>>>()?;
    let updates = update_columns.iter().map(|c| ctx.column(c)).collect::<ModelResult<Vec<_>>>()?;

    let on_conflict = match ctx.dialect.upsert_style() {
        UpsertStyle::OnConflict if updates.is_empty() => {
            format!(" ON CONFLICT ({}) DO NOTHING", conflict_columns.join(", "))
        }
        UpsertStyle::OnConflict => format!(
            " ON CONFLICT ({}) DO UPDATE SET {}",
            conflict_columns.join(", "),
            updates
                .iter()
                .map(|c| format!("{} = excluded.{}", c, c))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        UpsertStyle::OnDuplicateKey => {
            let assignments = if updates.is_empty() {
                conflict_columns.iter().map(|c| format!("{} = {}", c, c)).collect::<Vec<_>>()
            } else {
                updates.iter().map(|c| format!("{} = VALUES({})", c, c)).collect::<Vec<_>>()
            };
            format!(" ON DUPLICATE KEY UPDATE {}", assignments.join(", "))
        }
    };

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}){}{}",
        ctx.column(table)?,
        columns.join(", "),
        placeholders.join(", "),
        on_conflict,
        returning(ctx, true)
    );
    Ok(Statement::new(sql, params))
}
