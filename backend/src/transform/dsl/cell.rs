//! Cell transformations.
//!
//! A cell transformation turns the running string of a chain into a new
//! string, looking at the current row and the run context when it needs to.
//! Chains fold left from the empty string, so `[column 0, trim]` reads the
//! first cell and then trims it.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::coerce::{parse_decimal, Coercion};
use crate::error::{EvalError, EvalResult};
use crate::models::ColumnIndex;

/// All available cell operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum CellTransformation {
    /// Read a cell of the current row.
    Column { index: ColumnIndex },

    /// A constant. Numbers and booleans are stored as their text.
    Literal {
        #[serde(deserialize_with = "literal_text")]
        value: String,
    },

    /// Next value of the run-wide counter.
    Counter,

    /// `extra + separator + value`, where `extra` is the `with` chain.
    Concat {
        with: Vec<CellTransformation>,
        #[serde(default)]
        separator: String,
    },

    /// Decimal product of the value and the `with` chain.
    Multiply { with: Vec<CellTransformation> },

    /// Decimal quotient of the value by the `with` chain.
    Divide { with: Vec<CellTransformation> },

    /// `"true"` when the `with` chain equals the value as text.
    Equals { with: Vec<CellTransformation> },

    /// Reinterpret the value as a date, number or dollar amount.
    Coerce(Coercion),

    /// Single-occurrence replacements.
    Replace {
        /// Each character replaces its first occurrence.
        #[serde(default, alias = "characters")]
        find: Option<String>,
        /// First occurrence of the whole substring.
        #[serde(default)]
        substring: Option<String>,
        /// Whole value, when it is exactly equal.
        #[serde(default)]
        all: Option<String>,
        #[serde(default)]
        put: String,
    },

    /// Remove leading and trailing whitespace.
    Trim,

    /// Keep or drop a set of characters.
    Character {
        select: String,
        #[serde(default)]
        action: Action,
    },

    /// Facts about the run or the row.
    Meta { value: MetaValue },

    /// Look the value up in a reference table, asking when it is missing.
    Reference {
        table: String,
        #[serde(rename = "match")]
        match_column: String,
        take: String,
        group: String,
    },
}

/// Whether selected things are kept or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[default]
    Keep,
    Drop,
}

impl Action {
    /// Whether an item matching the selection survives.
    pub fn retains(self, selected: bool) -> bool {
        selected == (self == Action::Keep)
    }
}

/// Values exposed by the `meta` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaValue {
    /// Last day of the run's quarter, `MM/DD/YYYY`.
    #[serde(rename = "quarter.lastday")]
    QuarterLastDay,
    #[serde(rename = "quarter.number")]
    QuarterNumber,
    /// File name of the table the row came from.
    #[serde(rename = "row.source")]
    RowSource,
}

fn literal_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "literal value must be a string, number or boolean, got {}",
            other
        ))),
    }
}

impl CellTransformation {
    /// Tag name, as written in configuration files.
    pub fn name(&self) -> &'static str {
        match self {
            CellTransformation::Column { .. } => "column",
            CellTransformation::Literal { .. } => "literal",
            CellTransformation::Counter => "counter",
            CellTransformation::Concat { .. } => "concat",
            CellTransformation::Multiply { .. } => "multiply",
            CellTransformation::Divide { .. } => "divide",
            CellTransformation::Equals { .. } => "equals",
            CellTransformation::Coerce(_) => "coerce",
            CellTransformation::Replace { .. } => "replace",
            CellTransformation::Trim => "trim",
            CellTransformation::Character { .. } => "character",
            CellTransformation::Meta { .. } => "meta",
            CellTransformation::Reference { .. } => "reference",
        }
    }

    /// Nested chain, for operations that embed one.
    pub fn nested(&self) -> Option<&[CellTransformation]> {
        match self {
            CellTransformation::Concat { with, .. }
            | CellTransformation::Multiply { with }
            | CellTransformation::Divide { with }
            | CellTransformation::Equals { with } => Some(with),
            _ => None,
        }
    }
}

// =============================================================================
// Pure string operations
// =============================================================================

/// Replace the first occurrence of each character of `find`, in order.
pub fn replace_characters(value: &str, find: &str, put: &str) -> String {
    let mut result = value.to_string();
    for c in find.chars() {
        if let Some(pos) = result.find(c) {
            result.replace_range(pos..pos + c.len_utf8(), put);
        }
    }
    result
}

/// Apply the `replace` operation.
pub fn apply_replace(
    value: &str,
    find: Option<&str>,
    substring: Option<&str>,
    all: Option<&str>,
    put: &str,
) -> String {
    let mut result = match find {
        Some(find) => replace_characters(value, find, put),
        None => value.to_string(),
    };

    if let Some(sub) = substring.filter(|s| !s.is_empty()) {
        result = result.replacen(sub, put, 1);
    }

    if let Some(all) = all {
        if result == all {
            result = put.to_string();
        }
    }

    result
}

/// Keep (or drop) the characters of `value` present in `select`.
pub fn apply_character(value: &str, select: &str, action: Action) -> String {
    value
        .chars()
        .filter(|c| action.retains(select.contains(*c)))
        .collect()
}

pub fn apply_multiply(value: &str, extra: &str) -> EvalResult<String> {
    let product = parse_decimal(extra)?
        .checked_mul(parse_decimal(value)?)
        .ok_or_else(|| EvalError::Overflow { value: format!("{} * {}", value, extra) })?;
    Ok(product.normalize().to_string())
}

pub fn apply_divide(value: &str, extra: &str) -> EvalResult<String> {
    let divisor = parse_decimal(extra)?;
    if divisor.is_zero() {
        return Err(EvalError::DivisionByZero { value: value.to_string() });
    }
    let quotient = parse_decimal(value)?
        .checked_div(divisor)
        .ok_or_else(|| EvalError::Overflow { value: format!("{} / {}", value, extra) })?;
    Ok(quotient.normalize().to_string())
}

/// Decimal sum of two cells, used when coalescing rows.
pub fn add_cells(a: &str, b: &str) -> EvalResult<String> {
    let sum: Decimal = parse_decimal(a)?
        .checked_add(parse_decimal(b)?)
        .ok_or_else(|| EvalError::Overflow { value: format!("{} + {}", a, b) })?;
    Ok(sum.normalize().to_string())
}
