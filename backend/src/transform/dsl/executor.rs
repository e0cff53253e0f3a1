//! DSL Executor
//!
//! Evaluates cell, row and table transformations against a [`Context`].
//! Cell chains fold left from the empty string; row and table chains thread
//! a table through each step.

use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, warn};
use uuid::Uuid;

use super::cell::{apply_character, apply_divide, apply_multiply, apply_replace, CellTransformation, MetaValue};
use super::row::RowTransformation;
use super::table::{self, TableTransformation};
use crate::error::{EvalError, EvalResult};
use crate::models::{Row, Table};
use crate::parser;
use crate::transform::context::Context;

/// A row dropped because of a recoverable evaluation error.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRow {
    /// File name of the table the row came from
    pub source: String,
    pub reason: String,
}

impl SkippedRow {
    pub(crate) fn new(row: &Row, error: &EvalError) -> Self {
        Self {
            source: row.source_name(),
            reason: error.to_string(),
        }
    }
}

// =============================================================================
// Cells
// =============================================================================

/// Evaluate one cell transformation with `value` as the running string.
pub fn evaluate_cell<'a>(
    transformation: &'a CellTransformation,
    value: String,
    row: &'a Row,
    ctx: &'a Context,
) -> BoxFuture<'a, EvalResult<String>> {
    async move {
        match transformation {
            CellTransformation::Column { index } => row.cell(*index).map(str::to_string),
            CellTransformation::Literal { value: literal } => Ok(literal.clone()),
            CellTransformation::Counter => Ok(ctx.counter.next().to_string()),
            CellTransformation::Concat { with, separator } => {
                let extra = evaluate_cell_chain(with, row, ctx).await?;
                Ok(format!("{}{}{}", extra, separator, value))
            }
            CellTransformation::Multiply { with } => {
                let extra = evaluate_cell_chain(with, row, ctx).await?;
                apply_multiply(&value, &extra)
            }
            CellTransformation::Divide { with } => {
                let extra = evaluate_cell_chain(with, row, ctx).await?;
                apply_divide(&value, &extra)
            }
            CellTransformation::Equals { with } => {
                let extra = evaluate_cell_chain(with, row, ctx).await?;
                Ok((extra == value).to_string())
            }
            CellTransformation::Coerce(coercion) => coercion.apply(&value, ctx.year),
            CellTransformation::Replace { find, substring, all, put } => Ok(apply_replace(
                &value,
                find.as_deref(),
                substring.as_deref(),
                all.as_deref(),
                put,
            )),
            CellTransformation::Trim => Ok(value.trim().to_string()),
            CellTransformation::Character { select, action } => Ok(apply_character(&value, select, *action)),
            CellTransformation::Meta { value: meta } => meta_value(*meta, row, ctx),
            CellTransformation::Reference { table, match_column, take, group } => Ok(ctx
                .references
                .resolve(table, match_column, take, group, &value)
                .await?),
        }
    }
    .boxed()
}

/// Evaluate a chain, starting from the empty string.
pub fn evaluate_cell_chain<'a>(
    chain: &'a [CellTransformation],
    row: &'a Row,
    ctx: &'a Context,
) -> BoxFuture<'a, EvalResult<String>> {
    async move {
        let mut value = String::new();
        for transformation in chain {
            value = evaluate_cell(transformation, value, row, ctx).await?;
        }
        Ok(value)
    }
    .boxed()
}

fn meta_value(meta: MetaValue, row: &Row, ctx: &Context) -> EvalResult<String> {
    match meta {
        MetaValue::QuarterLastDay => ctx
            .quarter
            .last_day(ctx.year)
            .map(|d| d.format("%m/%d/%Y").to_string())
            .ok_or_else(|| EvalError::InvalidDate {
                value: format!("{} {}", ctx.quarter, ctx.year),
            }),
        MetaValue::QuarterNumber => Ok(ctx.quarter.number().to_string()),
        MetaValue::RowSource => Ok(row.source_name()),
    }
}

// =============================================================================
// Row-wise helpers shared by both families
// =============================================================================

async fn filter_rows(
    rows: Vec<Row>,
    criteria: &[CellTransformation],
    ctx: &Context,
    skipped: &mut Vec<SkippedRow>,
) -> EvalResult<Vec<Row>> {
    let mut kept = Vec::with_capacity(rows.len());
    for row in rows {
        match evaluate_cell_chain(criteria, &row, ctx).await {
            Ok(result) if result == "true" => kept.push(row),
            Ok(result) if result == "false" => {}
            Ok(result) => skipped.push(SkippedRow::new(&row, &EvalError::NotBoolean { value: result })),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => skipped.push(SkippedRow::new(&row, &e)),
        }
    }
    Ok(kept)
}

async fn set_column(
    rows: Vec<Row>,
    column: usize,
    to: &[CellTransformation],
    ctx: &Context,
    skipped: &mut Vec<SkippedRow>,
) -> EvalResult<Vec<Row>> {
    let mut updated = Vec::with_capacity(rows.len());
    for mut row in rows {
        match evaluate_cell_chain(to, &row, ctx).await {
            Ok(value) => {
                if row.cells.len() <= column {
                    row.cells.resize(column + 1, String::new());
                }
                row.cells[column] = value;
                updated.push(row);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => skipped.push(SkippedRow::new(&row, &e)),
        }
    }
    Ok(updated)
}

async fn dump(table: &Table, name: &str, ctx: &Context) {
    let path = ctx
        .directory
        .join("debug")
        .join(name)
        .join(format!("{}.csv", Uuid::new_v4()));

    match parser::write_file(&path, &table.to_grid()).await {
        Ok(()) => debug!(path = %path.display(), rows = table.len(), "Debug dump written"),
        Err(e) => warn!(error = %e, "Debug dump failed"),
    }
}

// =============================================================================
// Tables
// =============================================================================

/// Apply one table transformation.
///
/// Recoverable row errors inside `filter`/`set` drop the row and are pushed
/// to `skipped`; reference errors abort.
pub async fn evaluate_table(
    transformation: &TableTransformation,
    mut table: Table,
    ctx: &Context,
    skipped: &mut Vec<SkippedRow>,
) -> EvalResult<Table> {
    let result = match transformation {
        TableTransformation::Filter { criteria } => {
            let rows = filter_rows(std::mem::take(&mut table.rows), criteria, ctx, skipped).await?;
            table.with_rows(rows)
        }
        TableTransformation::Select { column, is, isnt, action } => {
            let rows = table::select_rows(std::mem::take(&mut table.rows), *column, is.as_ref(), isnt.as_ref(), *action);
            table.with_rows(rows)
        }
        TableTransformation::Chop { column, is, keep, otherwise } => {
            let rows = table::chop_rows(std::mem::take(&mut table.rows), *column, is, *keep, *otherwise);
            table.with_rows(rows)
        }
        TableTransformation::Trim { top, bottom } => {
            let rows = table::trim_rows(std::mem::take(&mut table.rows), top.unwrap_or(0), bottom.unwrap_or(0));
            table.with_rows(rows)
        }
        TableTransformation::Debug { name } => {
            dump(&table, name, ctx).await;
            table
        }
        TableTransformation::Header { names, action } => table::header(table, names, *action),
        TableTransformation::Percolate { columns, matches } => table::percolate(table, columns, matches),
        TableTransformation::Coalesce { match_columns, combine } => table::coalesce(table, match_columns, combine)?,
        TableTransformation::Set { column, to } => {
            let rows = set_column(std::mem::take(&mut table.rows), column.get(), to, ctx, skipped).await?;
            table.with_rows(rows)
        }
    };
    Ok(result)
}

/// Apply a table chain in order.
pub async fn evaluate_table_chain(
    chain: &[TableTransformation],
    mut table: Table,
    ctx: &Context,
    skipped: &mut Vec<SkippedRow>,
) -> EvalResult<Table> {
    for transformation in chain {
        table = evaluate_table(transformation, table, ctx, skipped).await?;
    }
    Ok(table)
}

// =============================================================================
// Rows
// =============================================================================

/// Apply one row transformation to a freshly read sheet.
pub async fn evaluate_rows(
    transformation: &RowTransformation,
    mut table: Table,
    ctx: &Context,
    skipped: &mut Vec<SkippedRow>,
) -> EvalResult<Table> {
    let rows = match transformation {
        RowTransformation::Filter { criteria } => filter_rows(std::mem::take(&mut table.rows), criteria, ctx, skipped).await?,
        RowTransformation::Select { column, is, isnt, action } => {
            table::select_rows(std::mem::take(&mut table.rows), *column, is.as_ref(), isnt.as_ref(), *action)
        }
        RowTransformation::Chop { column, is, keep, otherwise } => {
            table::chop_rows(std::mem::take(&mut table.rows), *column, is, *keep, *otherwise)
        }
        RowTransformation::Trim { top, bottom } => table::trim_rows(
            std::mem::take(&mut table.rows),
            RowTransformation::leading_rows(*top),
            bottom.unwrap_or(0),
        ),
    };
    Ok(table.with_rows(rows))
}

pub async fn evaluate_row_chain(
    chain: &[RowTransformation],
    mut table: Table,
    ctx: &Context,
    skipped: &mut Vec<SkippedRow>,
) -> EvalResult<Table> {
    for transformation in chain {
        table = evaluate_rows(transformation, table, ctx, skipped).await?;
    }
    Ok(table)
}
