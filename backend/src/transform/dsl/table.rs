//! Table transformations.
//!
//! These run over whole tables before the per-cell step (`preprocess`) and
//! after recombination (`postprocess`). The synchronous helpers here are
//! shared with the row family; anything that evaluates cells lives in the
//! executor.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::cell::{add_cells, Action, CellTransformation};
use crate::error::EvalResult;
use crate::models::{ColumnIndex, Row, Table};

/// All available table operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum TableTransformation {
    /// Keep rows whose criteria chain yields `"true"`.
    Filter { criteria: Vec<CellTransformation> },

    /// Keep or drop rows by the value of one column.
    Select {
        column: ColumnIndex,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is: Option<Values>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        isnt: Option<Values>,
        #[serde(default)]
        action: Action,
    },

    /// Cut the table at the first row whose column matches.
    Chop {
        column: ColumnIndex,
        is: Values,
        #[serde(default)]
        keep: Keep,
        #[serde(default)]
        otherwise: Otherwise,
    },

    /// Remove `top` rows from the start and `bottom` rows from the end.
    Trim {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        top: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bottom: Option<usize>,
    },

    /// Dump the table to `debug/<name>/<uuid>.csv`, unchanged.
    Debug {
        #[serde(default = "default_debug_name")]
        name: String,
    },

    /// Keep or drop columns by their first-row name.
    Header {
        names: Values,
        #[serde(default)]
        action: Action,
    },

    /// Fill blank cells from the row above.
    Percolate {
        columns: Vec<ColumnIndex>,
        #[serde(default = "default_percolate_matches")]
        matches: Vec<String>,
    },

    /// Merge rows sharing the `match` columns, summing `combine` columns.
    Coalesce {
        #[serde(rename = "match")]
        match_columns: Vec<ColumnIndex>,
        #[serde(default)]
        combine: Vec<ColumnIndex>,
    },

    /// Overwrite a column with a chain evaluated per row.
    Set {
        column: ColumnIndex,
        to: Vec<CellTransformation>,
    },
}

fn default_debug_name() -> String {
    "DEBUG".to_string()
}

fn default_percolate_matches() -> Vec<String> {
    vec![String::new()]
}

/// Which side of a `chop` survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Keep {
    /// Rows before the match.
    Top,
    /// The match and every row after it.
    #[default]
    Bottom,
}

/// What `chop` does when nothing matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Otherwise {
    #[default]
    Drop,
    Take,
}

/// One value or a set of values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Values {
    One(String),
    Many(Vec<String>),
}

impl Values {
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Values::One(v) => v == value,
            Values::Many(vs) => vs.iter().any(|v| v == value),
        }
    }

    pub fn as_slice(&self) -> &[String] {
        match self {
            Values::One(v) => std::slice::from_ref(v),
            Values::Many(vs) => vs,
        }
    }
}

impl TableTransformation {
    pub fn name(&self) -> &'static str {
        match self {
            TableTransformation::Filter { .. } => "filter",
            TableTransformation::Select { .. } => "select",
            TableTransformation::Chop { .. } => "chop",
            TableTransformation::Trim { .. } => "trim",
            TableTransformation::Debug { .. } => "debug",
            TableTransformation::Header { .. } => "header",
            TableTransformation::Percolate { .. } => "percolate",
            TableTransformation::Coalesce { .. } => "coalesce",
            TableTransformation::Set { .. } => "set",
        }
    }
}

// =============================================================================
// Row selection helpers
// =============================================================================

fn cell_at(row: &Row, column: ColumnIndex) -> Option<&str> {
    row.cells.get(column.get()).map(String::as_str)
}

/// Rows selected by `is`/`isnt`, kept or dropped per `action`.
pub fn select_rows(
    rows: Vec<Row>,
    column: ColumnIndex,
    is: Option<&Values>,
    isnt: Option<&Values>,
    action: Action,
) -> Vec<Row> {
    rows.into_iter()
        .filter(|row| {
            let datum = cell_at(row, column).unwrap_or_default();
            let selected = is.is_some_and(|v| v.contains(datum))
                || isnt.is_some_and(|v| !v.contains(datum));
            action.retains(selected)
        })
        .collect()
}

pub fn chop_rows(
    rows: Vec<Row>,
    column: ColumnIndex,
    is: &Values,
    keep: Keep,
    otherwise: Otherwise,
) -> Vec<Row> {
    let found = rows
        .iter()
        .position(|row| cell_at(row, column).is_some_and(|c| is.contains(c.trim())));

    match (found, keep, otherwise) {
        (None, _, Otherwise::Take) => rows,
        (None, _, Otherwise::Drop) => Vec::new(),
        (Some(index), Keep::Top, _) => {
            let mut rows = rows;
            rows.truncate(index);
            rows
        }
        (Some(index), Keep::Bottom, _) => rows.into_iter().skip(index).collect(),
    }
}

/// Drop `skip_top` leading rows and `drop_bottom` trailing rows.
pub fn trim_rows(rows: Vec<Row>, skip_top: usize, drop_bottom: usize) -> Vec<Row> {
    let end = rows.len().saturating_sub(drop_bottom);
    if skip_top >= end {
        return Vec::new();
    }
    let mut rows = rows;
    rows.truncate(end);
    rows.drain(..skip_top);
    rows
}

// =============================================================================
// Column helpers
// =============================================================================

pub fn header(table: Table, names: &Values, action: Action) -> Table {
    let Some(first) = table.rows.first() else {
        return table;
    };

    let indices: Vec<usize> = match action {
        Action::Keep => names
            .as_slice()
            .iter()
            .filter_map(|name| first.cells.iter().position(|c| c == name))
            .collect(),
        Action::Drop => (0..first.cells.len())
            .filter(|i| !names.contains(&first.cells[*i]))
            .collect(),
    };

    let rows = table
        .rows
        .iter()
        .map(|row| {
            let cells = indices
                .iter()
                .map(|i| row.cells.get(*i).cloned().unwrap_or_default())
                .collect();
            Row::new(cells, row.origin.clone())
        })
        .collect();
    table.with_rows(rows)
}

pub fn percolate(table: Table, columns: &[ColumnIndex], matches: &[String]) -> Table {
    let mut previous: Option<Vec<String>> = None;
    let mut rows = Vec::with_capacity(table.rows.len());

    for row in &table.rows {
        let mut cells = row.cells.clone();
        if let Some(prev) = &previous {
            for column in columns {
                let i = column.get();
                let blank = cells.get(i).is_some_and(|c| matches.contains(c));
                if let (true, Some(above)) = (blank, prev.get(i)) {
                    cells[i] = above.clone();
                }
            }
        }
        previous = Some(cells.clone());
        rows.push(Row::new(cells, row.origin.clone()));
    }

    table.with_rows(rows)
}

pub fn coalesce(table: Table, match_columns: &[ColumnIndex], combine: &[ColumnIndex]) -> EvalResult<Table> {
    let mut groups: IndexMap<Vec<String>, Vec<&Row>> = IndexMap::new();
    for row in &table.rows {
        let key = match_columns
            .iter()
            .map(|c| cell_at(row, *c).unwrap_or_default().to_string())
            .collect();
        groups.entry(key).or_default().push(row);
    }

    let mut rows = Vec::with_capacity(groups.len());
    for members in groups.values() {
        let Some((first, rest)) = members.split_first() else {
            continue;
        };
        let mut merged = (*first).clone();
        for other in rest {
            for column in combine {
                let i = column.get();
                if merged.cells.len() <= i {
                    merged.cells.resize(i + 1, String::new());
                }
                let addend = cell_at(other, *column).unwrap_or("0");
                merged.cells[i] = add_cells(&merged.cells[i], addend)?;
            }
        }
        rows.push(merged);
    }

    Ok(table.with_rows(rows))
}
